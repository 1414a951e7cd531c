use crate::error::{EngineError, Result};
use crate::models::Document;
use std::fs;
use std::path::Path;

/// Boundary to the file-type-specific parsers. PDF/Word/Excel extraction
/// lives outside this engine; implementations plug in here.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Document>;
}

/// Default parser for plain-text and markdown files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFileParser;

impl DocumentParser for TextFileParser {
    fn parse(&self, path: &Path) -> Result<Document> {
        let content = fs::read_to_string(path)
            .map_err(|error| EngineError::Parse(format!("{}: {error}", path.display())))?;
        let title = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string)
            .ok_or_else(|| {
                EngineError::Parse(format!("path missing filename: {}", path.display()))
            })?;

        Ok(Document {
            title,
            content,
            source_path: Some(path.to_string_lossy().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{DocumentParser, TextFileParser};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parses_title_and_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "# Title\nHello world").unwrap();

        let document = TextFileParser.parse(&path).unwrap();
        assert_eq!(document.title, "notes.md");
        assert!(document.content.contains("Hello world"));
        assert!(document.source_path.is_some());
    }

    #[test]
    fn non_utf8_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("binary.md");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x01]).unwrap();

        assert!(TextFileParser.parse(&path).is_err());
    }
}
