//! Source positions for Z diagnostics.
//!
//! Z is a line-oriented language, so a position is a file plus a line
//! number. Files are interned into a [`SourceMap`] and referenced by
//! [`FileId`] so that instructions and diagnostics stay small.

use std::path::{Path, PathBuf};

/// Index of a source file inside a [`SourceMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

/// A source position: file and 1-based line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub file: FileId,
    pub line: u32,
}

impl Span {
    pub fn new(file: FileId, line: u32) -> Span {
        Span { file, line }
    }
}

/// Interned table of source file paths.
///
/// The entry file is always id 0; imported files are appended in the
/// order the module resolver first reaches them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    files: Vec<PathBuf>,
}

impl SourceMap {
    pub fn new() -> SourceMap {
        SourceMap { files: Vec::new() }
    }

    /// Intern a path, returning an id. The same path interned twice
    /// yields two ids; the module resolver deduplicates on canonical
    /// paths before calling this.
    pub fn add(&mut self, path: impl Into<PathBuf>) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files.push(path.into());
        id
    }

    pub fn path(&self, id: FileId) -> &Path {
        &self.files[id.0 as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_paths_in_order() {
        let mut map = SourceMap::new();
        let a = map.add("main.z");
        let b = map.add("lib/util.z");
        assert_eq!(a, FileId(0));
        assert_eq!(b, FileId(1));
        assert_eq!(map.path(b), Path::new("lib/util.z"));
    }
}
