//! Native C toolchain collaborator.
//!
//! The core pipeline only produces C text; turning it into an
//! executable is delegated to whatever C compiler is installed. The
//! collaborator is opaque to the pipeline: compile either succeeds or
//! fails with the captured stderr text.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use log::{debug, info};

/// Compilers probed in order when none is requested.
const CANDIDATES: &[&str] = &["clang", "gcc"];

/// A usable C compiler found on PATH.
#[derive(Debug)]
pub struct Toolchain {
    pub name: String,
}

/// Probe for a C compiler, trying `preferred` first, then clang, then
/// gcc. Availability means `--version` runs successfully.
pub fn find(preferred: Option<&str>) -> Result<Toolchain> {
    let mut candidates: Vec<&str> = Vec::new();
    candidates.extend(preferred);
    candidates.extend(CANDIDATES.iter().copied().filter(|c| Some(*c) != preferred));

    for name in candidates {
        match Command::new(name).arg("--version").output() {
            Ok(out) if out.status.success() => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                let version = stdout.lines().next().unwrap_or("version unknown");
                info!("using {name}: {version}");
                return Ok(Toolchain {
                    name: name.to_string(),
                });
            }
            _ => debug!("compiler '{name}' is not available"),
        }
    }
    bail!("no C compiler found; install clang or gcc and ensure it is on PATH")
}

/// Compile `source` into `output`. On failure the compiler's stderr is
/// carried in the error.
pub fn compile(toolchain: &Toolchain, source: &Path, output: &Path) -> Result<()> {
    debug!("{} {} -> {}", toolchain.name, source.display(), output.display());
    let out = Command::new(&toolchain.name)
        .arg(source)
        .arg("-o")
        .arg(output)
        .arg("-O2")
        .arg("-lm")
        .output()
        .with_context(|| format!("failed to run {}", toolchain.name))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        bail!(
            "compilation with {} failed:\n{}",
            toolchain.name,
            stderr.trim_end()
        );
    }
    Ok(())
}
