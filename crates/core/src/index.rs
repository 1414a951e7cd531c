use crate::config::EngineConfig;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Recursively collects the eligible ingest files: extension allow-listed,
/// no excluded path segment, at or under the byte ceiling. Sorted so the
/// signature is deterministic across scans.
pub fn scan_files(config: &EngineConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(&config.docs_dir)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();

        let allowed = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                config
                    .allowed_extensions
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(ext))
            });
        if !allowed {
            continue;
        }

        let excluded = path.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .is_some_and(|segment| config.excluded_segments.iter().any(|e| e == segment))
        });
        if excluded {
            continue;
        }

        // oversized files are skipped silently
        match entry.metadata() {
            Ok(meta) if meta.len() <= config.max_file_bytes => {
                files.push(path.to_path_buf());
            }
            _ => {}
        }
    }

    files.sort_unstable();
    files
}

/// Digest over every surviving file's path, byte size, and modification
/// time, concatenated in scan order. Any touch, resize, add, or delete in
/// the ingest set changes the result.
pub fn compute_signature(files: &[PathBuf]) -> Result<String> {
    let mut hasher = Sha256::new();

    for path in files {
        let meta = std::fs::metadata(path)?;
        let modified = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(meta.len().to_le_bytes());
        hasher.update(modified.as_nanos().to_le_bytes());
    }

    Ok(format!("{:x}", hasher.finalize()))
}
