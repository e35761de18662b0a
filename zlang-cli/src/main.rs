use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use zlang_core::compile_file;

mod toolchain;

#[derive(Parser, Debug)]
#[command(version, about = "Compile Z source to C or a native executable", long_about = None)]
struct Cli {
    /// Input .z source file
    input: PathBuf,

    #[arg(
        short,
        long,
        help = "Output file (defaults to the input name with the format's extension)"
    )]
    output: Option<PathBuf>,

    #[arg(short = 'f', long, value_enum, default_value = "c")]
    format: Format,

    #[arg(
        short = 'c',
        long,
        value_enum,
        help = "C compiler for -f exe (defaults to the first of clang, gcc found)"
    )]
    cc: Option<CompilerId>,

    #[arg(short, long, action = clap::ArgAction::Count, help = "Increase log verbosity (-v, -vv)")]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Emit C source text
    C,
    /// Emit a native executable via the C toolchain
    Exe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CompilerId {
    Clang,
    Gcc,
}

impl CompilerId {
    fn command(self) -> &'static str {
        match self {
            CompilerId::Clang => "clang",
            CompilerId::Gcc => "gcc",
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let _ = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    if let Err(err) = execute(cli) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn execute(cli: Cli) -> Result<()> {
    let start = Instant::now();
    let artifact = compile_file(&cli.input)?;
    info!("compiled {} in {:?}", cli.input.display(), start.elapsed());

    let output = cli.output.unwrap_or_else(|| match cli.format {
        Format::C => cli.input.with_extension("c"),
        Format::Exe => cli.input.with_extension("exe"),
    });

    match cli.format {
        Format::C => {
            fs::write(&output, &artifact.c_source)
                .with_context(|| format!("failed to write output file {}", output.display()))?;
            info!("wrote {}", output.display());
        }
        Format::Exe => {
            let c_path = output.with_extension("c");
            fs::write(&c_path, &artifact.c_source)
                .with_context(|| format!("failed to write {}", c_path.display()))?;

            let found = toolchain::find(cli.cc.map(CompilerId::command));
            let result = found.and_then(|tc| {
                let start = Instant::now();
                toolchain::compile(&tc, &c_path, &output)?;
                info!("native compilation took {:?}", start.elapsed());
                Ok(())
            });
            // The intermediate C file is only kept on failure, for
            // inspection.
            if result.is_ok() {
                let _ = fs::remove_file(&c_path);
            }
            result?;
            info!("wrote {}", output.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    const FIB: &str = concat!(
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
    );

    fn zc() -> Command {
        Command::cargo_bin("zlang-cli").expect("binary exists")
    }

    fn have_cc() -> bool {
        ["clang", "gcc"].iter().any(|cc| {
            std::process::Command::new(cc)
                .arg("--version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
    }

    #[test]
    fn emits_c_source() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("fib.z");
        fs::write(&input, FIB).expect("write input");
        let output = dir.path().join("fib.c");

        zc().arg(&input)
            .arg("-f")
            .arg("c")
            .arg("-o")
            .arg(&output)
            .assert()
            .success();

        let c = fs::read_to_string(&output).expect("read output");
        assert!(c.contains("int main(void)"));
        assert!(c.contains("z_fibonacci"));
    }

    #[test]
    fn default_output_derives_from_input_name() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("hello.z");
        fs::write(&input, "PRINT \"hi\"\n").expect("write input");

        zc().arg(&input).assert().success();

        assert!(dir.path().join("hello.c").exists());
    }

    #[test]
    fn reports_diagnostics_with_codes_on_stderr() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("bad.z");
        fs::write(&input, "MOV int x 1\nMOV int x 2\n").expect("write input");

        zc().arg(&input)
            .assert()
            .failure()
            .stderr(predicate::str::contains("[E22]"))
            .stderr(predicate::str::contains("bad.z:2"));
    }

    #[test]
    fn reports_import_cycles() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.z"), "IMPORT \"b\"\nPRINT 1\n").expect("write a");
        fs::write(dir.path().join("b.z"), "IMPORT \"a\"\nPRINT 2\n").expect("write b");

        zc().arg(dir.path().join("a.z"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("[E33]"))
            .stderr(predicate::str::contains("import cycle"));
    }

    #[test]
    fn missing_input_fails_cleanly() {
        zc().arg("/definitely/not/here.z")
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to read source"));
    }

    #[test]
    fn builds_and_runs_fibonacci_executable() {
        if !have_cc() {
            // No native toolchain in this environment.
            return;
        }
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("fib.z");
        fs::write(&input, FIB).expect("write input");
        let exe = dir.path().join("fib");

        zc().arg(&input)
            .arg("-f")
            .arg("exe")
            .arg("-o")
            .arg(&exe)
            .assert()
            .success();

        let out = std::process::Command::new(&exe)
            .output()
            .expect("run generated executable");
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "55");
    }

    #[test]
    fn builds_and_runs_factorial_executable() {
        if !have_cc() {
            return;
        }
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("fact.z");
        fs::write(
            &input,
            concat!(
                "FN factorial(int n) -> int:\n",
                "    MOV int acc 1;\n",
                "    FOR i 1..n:\n",
                "        MUL acc i acc;\n",
                "    RET acc;\n",
                "END\n",
                "CALL factorial(5) -> f\n",
                "PRINT f\n",
            ),
        )
        .expect("write input");
        let exe = dir.path().join("fact");

        zc().arg(&input)
            .arg("-f")
            .arg("exe")
            .arg("-o")
            .arg(&exe)
            .assert()
            .success();

        let out = std::process::Command::new(&exe)
            .output()
            .expect("run generated executable");
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "120");
    }

    #[test]
    fn pointer_roundtrip_prints_target_value() {
        if !have_cc() {
            return;
        }
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("ptr.z");
        fs::write(&input, "MOV int x 42\nPTR int p x\nPRINT *p\n").expect("write input");
        let exe = dir.path().join("ptr");

        zc().arg(&input)
            .arg("-f")
            .arg("exe")
            .arg("-o")
            .arg(&exe)
            .assert()
            .success();

        let out = std::process::Command::new(&exe)
            .output()
            .expect("run generated executable");
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "42");
    }

    #[test]
    fn emitting_c_keeps_the_file() {
        // `-f c` must leave the C file in place; only `-f exe` cleans
        // up its intermediate.
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("keep.z");
        fs::write(&input, "PRINT 1\n").expect("write input");
        let output = dir.path().join("keep.c");

        zc().arg(&input)
            .arg("-o")
            .arg(&output)
            .assert()
            .success();
        assert!(Path::new(&output).exists());
    }
}
