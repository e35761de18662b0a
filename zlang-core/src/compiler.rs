//! Pipeline orchestration.
//!
//! Runs the stages in order — module resolution (parse + import
//! expansion), semantic analysis, optimization, C generation — each
//! stage consuming the complete artifact of the previous one. A stage
//! with diagnostics aborts the pipeline; the optimizer and the code
//! generator run only over fully validated input.

use std::path::Path;
use std::time::Instant;

use log::debug;

use crate::codegen_c;
use crate::diagnostic::DiagnosticBag;
use crate::error::CoreError;
use crate::modules::{self, ResolveResult};
use crate::optimizer;
use crate::semantics;

/// Output of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationArtifact {
    /// The complete generated C translation unit.
    pub c_source: String,
}

/// Compile the program rooted at `entry` into C source text.
pub fn compile_file(entry: impl AsRef<Path>) -> Result<CompilationArtifact, CoreError> {
    let start = Instant::now();
    let resolved = modules::resolve(entry.as_ref())?;
    debug!("resolved modules in {:?}", start.elapsed());
    finish(resolved)
}

/// Compile an in-memory source. `virtual_path` names the source in
/// diagnostics and anchors any relative imports.
pub fn compile_source(
    source: &str,
    virtual_path: impl AsRef<Path>,
) -> Result<CompilationArtifact, CoreError> {
    let resolved = modules::resolve_source(source, virtual_path.as_ref());
    finish(resolved)
}

fn finish(resolved: ResolveResult) -> Result<CompilationArtifact, CoreError> {
    let ResolveResult {
        program,
        diagnostics,
    } = resolved;
    if !diagnostics.is_empty() {
        return Err(CoreError::Rejected(DiagnosticBag::new(
            diagnostics,
            program.sources,
        )));
    }

    let start = Instant::now();
    let analyzed = semantics::analyze(program);
    debug!("analyzed in {:?}", start.elapsed());
    if !analyzed.diagnostics.is_empty() {
        return Err(CoreError::Rejected(DiagnosticBag::new(
            analyzed.diagnostics,
            analyzed.analysis.sources,
        )));
    }

    let start = Instant::now();
    let optimized = optimizer::optimize(analyzed.analysis);
    debug!("optimized in {:?}", start.elapsed());

    let start = Instant::now();
    let c_source = codegen_c::generate(&optimized);
    debug!("generated C in {:?}", start.elapsed());

    Ok(CompilationArtifact { c_source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::ErrorCode;
    use std::path::Path;

    fn compile(source: &str) -> CompilationArtifact {
        compile_source(source, Path::new("test.z")).expect("compilation should succeed")
    }

    fn compile_err(source: &str) -> DiagnosticBag {
        match compile_source(source, Path::new("test.z")) {
            Err(CoreError::Rejected(bag)) => bag,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn compiles_iterative_fibonacci() {
        let artifact = compile(concat!(
            "FN fibonacci(int n) -> int:\n",
            "    MOV int a 0;\n",
            "    MOV int b 1;\n",
            "    FOR i 1..n:\n",
            "        ADD a b t;\n",
            "        MOV a b;\n",
            "        MOV b t;\n",
            "    RET a;\n",
            "END\n",
            "CALL fibonacci(10) -> result\n",
            "PRINT result\n",
        ));
        let c = &artifact.c_source;
        assert!(c.contains("int z_fibonacci(int n)"), "{c}");
        assert!(c.contains("result = z_fibonacci(10);"));
        assert!(c.contains("print_int(result);"));
        assert!(c.contains("for (int i = 1; i <= n; i++) {"));
        assert!(c.contains("return a;"));
    }

    #[test]
    fn compiles_factorial() {
        let artifact = compile(concat!(
            "FN factorial(int n) -> int:\n",
            "    MOV int acc 1;\n",
            "    FOR i 1..n:\n",
            "        MUL acc i acc;\n",
            "    RET acc;\n",
            "END\n",
            "CALL factorial(5) -> f\n",
            "PRINT f\n",
        ));
        let c = &artifact.c_source;
        assert!(c.contains("int z_factorial(int n)"), "{c}");
        assert!(c.contains("f = z_factorial(5);"));
        assert!(c.contains("print_int(f);"));
    }

    #[test]
    fn constant_folding_matches_direct_assignment() {
        // `ADD 10 20 x` and `MOV x 30` must produce the same
        // observable program: a plain store of 30 and a print of 30,
        // with no arithmetic left.
        let folded = compile("ADD 10 20 x\nPRINT x\n");
        assert!(folded.c_source.contains("x = 30;"), "{}", folded.c_source);
        assert!(folded.c_source.contains("(30);"), "{}", folded.c_source);
        assert!(!folded.c_source.contains("checked_add"));
        let direct = compile("MOV x 30\nPRINT x\n");
        assert!(direct.c_source.contains("x = 30;"));
        assert!(direct.c_source.contains("(30);"));
    }

    #[test]
    fn rejects_with_diagnostics_before_codegen() {
        let bag = compile_err("MOV int x 1\nMOV int x 2\n");
        assert!(bag.has(ErrorCode::Redeclaration));
        let rendered = bag.to_string();
        assert!(rendered.contains("test.z:2"), "{rendered}");
        assert!(rendered.contains("[E22]"), "{rendered}");
    }

    #[test]
    fn collects_independent_errors_in_one_pass() {
        let bag = compile_err(concat!(
            "FN a():\n",
            "    PRINT ghost1;\n",
            "END\n",
            "FN b():\n",
            "    DIV 1 0 q;\n",
            "END\n",
        ));
        assert!(bag.has(ErrorCode::UndefinedSymbol));
        assert!(bag.has(ErrorCode::DivisionByZero));
    }

    #[test]
    fn parse_errors_abort_before_analysis() {
        let bag = compile_err("FROB x\n");
        assert_eq!(bag.codes(), vec![ErrorCode::UnknownOpcode]);
    }

    #[test]
    fn optimizer_output_recompiles_identically() {
        // Compiling twice is deterministic end to end.
        let source = "MOV int x 5\nADD x 2 y\nPRINT y\n";
        assert_eq!(compile(source).c_source, compile(source).c_source);
    }
}
