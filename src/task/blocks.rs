//! File blocks carried in a generator transcript.
//!
//! A transcript names each file on a line of its own:
//!
//! ```text
//! # filename: math_utils.py
//! def add(a, b):
//!     return a + b
//! # filename: main.py
//! import math_utils
//! ```
//!
//! Text before the first marker is commentary and is not a file.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, Result};

/// Line prefix that opens a file block.
pub const FILENAME_MARKER: &str = "# filename: ";

/// One generated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlock {
    pub filename: String,
    pub content: String,
}

impl FileBlock {
    #[must_use]
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }

    /// The block's path relative to a workspace, after safety checks.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::UnsafePath`] for empty, absolute, or
    /// parent-traversing names.
    pub fn relative_path(&self) -> Result<PathBuf> {
        safe_relative_path(&self.filename)
    }

    /// Lowercase file extension, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

/// Split a transcript into file blocks.
#[must_use]
pub fn parse_blocks(transcript: &str) -> Vec<FileBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in transcript.lines() {
        if let Some(name) = line.strip_prefix(FILENAME_MARKER) {
            if let Some((filename, body)) = current.take() {
                blocks.push(finish(filename, &body));
            }
            current = Some((name.trim().to_string(), Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((filename, body)) = current {
        blocks.push(finish(filename, &body));
    }

    blocks
}

fn finish(filename: String, body: &[&str]) -> FileBlock {
    // Trailing blank lines separate blocks and are not part of the file.
    let end = body
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(0, |i| i + 1);
    let mut content = body[..end].join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    FileBlock { filename, content }
}

/// Render blocks back into transcript form.
#[must_use]
pub fn render_blocks(blocks: &[FileBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        out.push_str(FILENAME_MARKER);
        out.push_str(&block.filename);
        out.push('\n');
        out.push_str(&block.content);
        if !block.content.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// Validate a generated file name and return it as a relative path.
///
/// # Errors
///
/// Returns [`ConductorError::UnsafePath`] if the name is empty, absolute,
/// drive-prefixed, or contains a `..` component.
pub fn safe_relative_path(name: &str) -> Result<PathBuf> {
    let unsafe_path = || ConductorError::UnsafePath {
        path: name.to_string(),
    };

    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return Err(unsafe_path());
    }
    // Windows drive letters are rejected on every platform.
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(unsafe_path());
    }
    if trimmed.split(['/', '\\']).any(|part| part == "..") {
        return Err(unsafe_path());
    }

    let path = PathBuf::from(trimmed);
    let mut normal = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normal.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path())
            }
        }
    }
    if normal.as_os_str().is_empty() {
        return Err(unsafe_path());
    }
    Ok(normal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multiple_blocks() {
        let transcript = "Here you go.\n\
            # filename: math_utils.py\n\
            def add(a, b):\n    return a + b\n\
            \n\
            # filename: main.py\n\
            import math_utils\n\
            print(math_utils.add(5, 7))\n";

        let blocks = parse_blocks(transcript);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].filename, "math_utils.py");
        assert_eq!(blocks[0].content, "def add(a, b):\n    return a + b\n");
        assert_eq!(blocks[1].filename, "main.py");
        assert!(blocks[1].content.starts_with("import math_utils"));
    }

    #[test]
    fn test_preamble_is_not_a_block() {
        assert!(parse_blocks("just talking, no files\nLOOP_COMPLETE").is_empty());
    }

    #[test]
    fn test_marker_must_start_line() {
        let blocks = parse_blocks("text # filename: nope.py\n# filename: yes.sh\nexit 0\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].filename, "yes.sh");
    }

    #[test]
    fn test_render_parses_back() {
        let blocks = vec![
            FileBlock::new("a.sh", "exit 0\n"),
            FileBlock::new("lib/b.py", "x = 1"),
        ];
        let parsed = parse_blocks(&render_blocks(&blocks));
        assert_eq!(parsed[0], blocks[0]);
        assert_eq!(parsed[1].content, "x = 1\n");
    }

    #[test]
    fn test_extension() {
        assert_eq!(FileBlock::new("Main.PY", "").extension().as_deref(), Some("py"));
        assert_eq!(FileBlock::new("Makefile", "").extension(), None);
    }

    #[test]
    fn test_safe_relative_path_accepts_nested() {
        assert_eq!(
            safe_relative_path("pkg/./mod.py").unwrap(),
            PathBuf::from("pkg").join("mod.py")
        );
    }

    #[test]
    fn test_safe_relative_path_rejects_escapes() {
        for bad in [
            "",
            "   ",
            "/etc/passwd",
            "\\\\server\\share",
            "C:\\Windows\\x.py",
            "c:relative.py",
            "../up.py",
            "a/../../b.py",
            "a\\..\\b.py",
            ".",
        ] {
            assert!(
                matches!(safe_relative_path(bad), Err(ConductorError::UnsafePath { .. })),
                "{bad:?} should be rejected"
            );
        }
    }
}
