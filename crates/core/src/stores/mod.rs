mod embedded;
mod relational;

pub use embedded::EmbeddedStore;
pub use relational::RelationalStore;

/// Normalizes a raw distance into the unified relevance score: `1 / (1 + d)`
/// with negative distances clamped to zero. Bounded in `(0, 1]`, defined for
/// `d = 0` (score `1.0`), and insensitive to the metric's absolute scale.
/// Non-finite input yields `0.0` so a broken backend row never ranks first.
pub fn score_from_distance(distance: f64) -> f64 {
    if !distance.is_finite() {
        return 0.0;
    }
    1.0 / (1.0 + distance.max(0.0))
}
