//! Module resolution: `IMPORT` expansion.
//!
//! Expands the entry file and everything reachable through `IMPORT`
//! directives into one flat instruction stream with one shared
//! function table. Expansion is depth-first with a visited set keyed
//! by canonical path: a file imported twice is merged once, a file
//! that transitively imports itself is an `IMPORT_CYCLE`. Import
//! expansion is purely structural; symbol and type resolution happen
//! later, over the merged stream.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::ast::{FunctionSig, Instruction, Opcode, Operand};
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::error::CoreError;
use crate::parser::{self, ParsedFile};
use crate::span::{SourceMap, Span};

/// Source files larger than this are rejected before parsing.
pub const MAX_SOURCE_BYTES: u64 = 1024 * 1024;

/// Canonical extension of Z source files.
pub const SOURCE_EXT: &str = "z";

/// How many `.z` candidates a "not found" diagnostic may suggest.
const MAX_SUGGESTIONS: usize = 5;

/// The merged program: one instruction stream, one function table.
#[derive(Debug)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub functions: BTreeMap<String, FunctionSig>,
    pub sources: SourceMap,
}

/// Result of module resolution. Diagnostics cover parse errors from
/// every reached file plus import-level errors.
#[derive(Debug)]
pub struct ResolveResult {
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
}

/// Load and merge the program rooted at `entry`.
///
/// I/O failures on the entry file are fatal; problems inside imported
/// files are reported as diagnostics so several can surface at once.
pub fn resolve(entry: &Path) -> Result<ResolveResult, CoreError> {
    let mut resolver = Resolver::default();
    let source = resolver.read_source(entry)?;
    let canonical = fs::canonicalize(entry).unwrap_or_else(|_| entry.to_path_buf());
    resolver.visited.insert(canonical.clone());
    resolver.stack.push(canonical);
    resolver.merge(entry, &source);
    resolver.stack.pop();
    Ok(resolver.into_result())
}

/// Merge a program from an in-memory source string. `virtual_path`
/// names the source in diagnostics and anchors relative imports.
pub fn resolve_source(source: &str, virtual_path: &Path) -> ResolveResult {
    let mut resolver = Resolver::default();
    resolver.merge(virtual_path, source);
    resolver.into_result()
}

#[derive(Default)]
struct Resolver {
    instructions: Vec<Instruction>,
    functions: BTreeMap<String, FunctionSig>,
    sources: SourceMap,
    diagnostics: Vec<Diagnostic>,
    /// Canonical paths already merged into the program.
    visited: HashSet<PathBuf>,
    /// Canonical paths currently on the DFS stack.
    stack: Vec<PathBuf>,
}

impl Resolver {
    fn into_result(self) -> ResolveResult {
        ResolveResult {
            program: Program {
                instructions: self.instructions,
                functions: self.functions,
                sources: self.sources,
            },
            diagnostics: self.diagnostics,
        }
    }

    fn read_source(&self, path: &Path) -> Result<String, CoreError> {
        let meta = fs::metadata(path).map_err(|source| CoreError::SourceIo {
            path: path.to_path_buf(),
            source,
        })?;
        if meta.len() > MAX_SOURCE_BYTES {
            return Err(CoreError::SourceTooLarge {
                path: path.to_path_buf(),
            });
        }
        fs::read_to_string(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::InvalidData => CoreError::InvalidEncoding {
                path: path.to_path_buf(),
            },
            _ => CoreError::SourceIo {
                path: path.to_path_buf(),
                source,
            },
        })
    }

    /// Parse `source` and splice it into the merged stream, expanding
    /// imports in place.
    fn merge(&mut self, path: &Path, source: &str) {
        let file_id = self.sources.add(path);
        let parser::ParseResult { file, diagnostics } = parser::parse(file_id, source);
        self.diagnostics.extend(diagnostics);
        self.merge_functions(&file);

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for instruction in file.instructions {
            if instruction.opcode == Opcode::Import {
                if let Some(Operand::Str(import_path)) = instruction.operands.first() {
                    self.import(&dir, import_path, instruction.span);
                }
            } else {
                self.instructions.push(instruction);
            }
        }
    }

    fn merge_functions(&mut self, file: &ParsedFile) {
        for sig in &file.functions {
            if self.functions.contains_key(&sig.name) {
                self.diagnostics.push(Diagnostic::error(
                    ErrorCode::Redeclaration,
                    format!("function '{}' is already defined", sig.name),
                    sig.span,
                ));
            } else {
                self.functions.insert(sig.name.clone(), sig.clone());
            }
        }
    }

    fn import(&mut self, dir: &Path, import_path: &str, span: Span) {
        let mut target = dir.join(import_path);
        if target.extension().is_none() {
            target.set_extension(SOURCE_EXT);
        }

        let canonical = match fs::canonicalize(&target) {
            Ok(canonical) => canonical,
            Err(_) => {
                self.diagnostics.push(Diagnostic::error(
                    ErrorCode::ImportNotFound,
                    self.not_found_message(import_path, dir),
                    span,
                ));
                return;
            }
        };

        if self.stack.contains(&canonical) {
            self.diagnostics.push(Diagnostic::error(
                ErrorCode::ImportCycle,
                format!("import cycle detected through \"{import_path}\""),
                span,
            ));
            return;
        }
        if !self.visited.insert(canonical.clone()) {
            // Already merged through another import; nothing to do.
            return;
        }

        let source = match self.read_source(&target) {
            Ok(source) => source,
            Err(err) => {
                self.diagnostics.push(Diagnostic::error(
                    ErrorCode::FileReadError,
                    err.to_string(),
                    span,
                ));
                return;
            }
        };

        self.stack.push(canonical);
        self.merge(&target, &source);
        self.stack.pop();
    }

    /// List nearby `.z` files so a typo'd import is easy to fix.
    fn not_found_message(&self, import_path: &str, dir: &Path) -> String {
        let mut candidates = Vec::new();
        for entry in WalkDir::new(dir)
            .max_depth(3)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == SOURCE_EXT) {
                let shown = path.strip_prefix(dir).unwrap_or(path);
                candidates.push(shown.display().to_string());
                if candidates.len() >= MAX_SUGGESTIONS {
                    break;
                }
            }
        }
        if candidates.is_empty() {
            format!("imported file \"{import_path}\" was not found")
        } else {
            format!(
                "imported file \"{import_path}\" was not found; available modules: {}",
                candidates.join(", ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).expect("write source file");
        path
    }

    #[test]
    fn merges_imported_instructions_and_functions() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "math.z",
            "FN square(int n) -> int:\n    MUL n n r;\n    RET r;\nEND\n",
        );
        let entry = write(
            dir.path(),
            "main.z",
            "IMPORT \"math\"\nCALL square(4) -> x\nPRINT x\n",
        );

        let result = resolve(&entry).expect("resolve");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert!(result.program.functions.contains_key("square"));
        // The IMPORT itself is consumed during expansion.
        assert!(
            result
                .program
                .instructions
                .iter()
                .all(|i| i.opcode != Opcode::Import)
        );
    }

    #[test]
    fn detects_import_cycles() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.z", "IMPORT \"b\"\nPRINT 1\n");
        write(dir.path(), "b.z", "IMPORT \"a\"\nPRINT 2\n");

        let result = resolve(&dir.path().join("a.z")).expect("resolve");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.code == ErrorCode::ImportCycle)
        );
    }

    #[test]
    fn duplicate_imports_merge_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "util.z", "FN id(int n) -> int:\n    RET n;\nEND\n");
        write(dir.path(), "a.z", "IMPORT \"util\"\n");
        write(dir.path(), "b.z", "IMPORT \"util\"\n");
        let entry = write(dir.path(), "main.z", "IMPORT \"a\"\nIMPORT \"b\"\nPRINT 1\n");

        let result = resolve(&entry).expect("resolve");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let ends = result
            .program
            .instructions
            .iter()
            .filter(|i| i.opcode == Opcode::Fn)
            .count();
        assert_eq!(ends, 1, "util.z should be merged exactly once");
    }

    #[test]
    fn missing_import_reports_candidates() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "helpers.z", "PRINT 1\n");
        let entry = write(dir.path(), "main.z", "IMPORT \"helprs\"\n");

        let result = resolve(&entry).expect("resolve");
        let diag = result
            .diagnostics
            .iter()
            .find(|d| d.code == ErrorCode::ImportNotFound)
            .expect("missing import diagnostic");
        assert!(diag.message.contains("helpers.z"), "{}", diag.message);
    }

    #[test]
    fn function_name_collisions_across_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "one.z", "FN f() -> int:\n    RET 1;\nEND\n");
        write(dir.path(), "two.z", "FN f() -> int:\n    RET 2;\nEND\n");
        let entry = write(dir.path(), "main.z", "IMPORT \"one\"\nIMPORT \"two\"\n");

        let result = resolve(&entry).expect("resolve");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.code == ErrorCode::Redeclaration)
        );
    }

    #[test]
    fn entry_io_errors_are_fatal() {
        let err = resolve(Path::new("/definitely/not/here.z")).unwrap_err();
        assert!(matches!(err, CoreError::SourceIo { .. }));
    }
}
