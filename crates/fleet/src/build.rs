//! Dependency installation for monitor code

use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};
use crate::monitor::{CodeSource, Runtime};

/// Install command for a runtime: manifest file, program, arguments
fn installer(runtime: Runtime) -> (&'static str, &'static str, &'static [&'static str]) {
    match runtime {
        Runtime::Node => ("package.json", "npm", &["install", "--production"]),
        Runtime::Python => ("requirements.txt", "pip", &["install", "-r", "requirements.txt"]),
    }
}

/// Whether the source directory declares dependencies for `runtime`
pub fn has_manifest(code: &CodeSource, runtime: Runtime) -> bool {
    let (manifest, _, _) = installer(runtime);
    code.src.join(manifest).is_file()
}

/// Install dependencies in the source directory and return the installer's
/// standard output. Without a manifest this does nothing.
pub fn install_dependencies(code: &CodeSource, runtime: Runtime) -> Result<String> {
    if !has_manifest(code, runtime) {
        log::debug!("no {runtime} manifest in {}", code.src.display());
        return Ok(String::new());
    }
    let (_, program, args) = installer(runtime);
    run_in(&code.src, program, args)
}

fn run_in(dir: &Path, program: &str, args: &[&str]) -> Result<String> {
    log::debug!("running {program} {} in {}", args.join(" "), dir.display());
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::Build {
            dir: dir.to_path_buf(),
            stderr: format!("failed to execute {program}: {e}"),
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(Error::Build {
            dir: dir.to_path_buf(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn code(dir: &Path) -> CodeSource {
        CodeSource {
            src: dir.to_path_buf(),
            handler: "index.handler".into(),
            exclude: vec![],
        }
    }

    #[test]
    fn test_without_manifest_is_noop() {
        let dir = TempDir::new().unwrap();
        assert_eq!(install_dependencies(&code(dir.path()), Runtime::Node).unwrap(), "");
        assert_eq!(install_dependencies(&code(dir.path()), Runtime::Python).unwrap(), "");
    }

    #[test]
    fn test_manifest_detection_per_runtime() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "requests\n").unwrap();
        assert!(has_manifest(&code(dir.path()), Runtime::Python));
        assert!(!has_manifest(&code(dir.path()), Runtime::Node));
    }

    #[test]
    fn test_missing_program_is_build_error() {
        let dir = TempDir::new().unwrap();
        let err = run_in(dir.path(), "definitely-not-an-installer-binary", &[]).unwrap_err();
        assert!(matches!(err, Error::Build { .. }));
    }
}
