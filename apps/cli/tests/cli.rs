use std::error::Error;
use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cli() -> Result<Command, Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("runpp")?;
    cmd.env_remove("RUST_LOG");
    Ok(cmd)
}

#[test]
fn sanitize_rewrites_invisible_characters() -> Result<(), Box<dyn Error>> {
    let workspace = tempdir()?;
    let source = workspace.path().join("main.cpp");
    fs::write(&source, "int\u{00A0}x;\u{200B}\n")?;

    cli()?
        .arg("sanitize")
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleaned"));
    assert_eq!(fs::read_to_string(&source)?, "int x;\n");

    cli()?
        .args(["sanitize", "--check"])
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    Ok(())
}

#[test]
fn sanitize_check_fails_without_writing() -> Result<(), Box<dyn Error>> {
    let workspace = tempdir()?;
    let source = workspace.path().join("main.cpp");
    fs::write(&source, "\u{FEFF}int x;")?;

    cli()?
        .args(["sanitize", "--check"])
        .arg(&source)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("invisible characters"));
    assert_eq!(fs::read_to_string(&source)?, "\u{FEFF}int x;");
    Ok(())
}

#[test]
fn highlight_prints_tokens_in_order() -> Result<(), Box<dyn Error>> {
    let workspace = tempdir()?;
    let source = workspace.path().join("main.cpp");
    fs::write(&source, "#include <iostream>\nint main(){ return 42; } // done\n")?;

    cli()?
        .arg("--workspace")
        .arg(workspace.path())
        .arg("highlight")
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("0..8\tpreprocessor\t#include"))
        .stdout(predicate::str::contains("\tnumber\t42"))
        .stdout(predicate::str::contains("\tline_comment\t// done"));
    Ok(())
}

#[test]
fn highlight_json_with_empty_theme_is_empty_array() -> Result<(), Box<dyn Error>> {
    let workspace = tempdir()?;
    let source = workspace.path().join("main.cpp");
    fs::write(&source, "int main(){}")?;
    let theme = workspace.path().join("broken.json");
    fs::write(&theme, "{ not json")?;

    let output = cli()?
        .arg("highlight")
        .arg(&source)
        .arg("--theme")
        .arg(&theme)
        .arg("--json")
        .output()?;
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(parsed, serde_json::json!([]));
    Ok(())
}

#[test]
fn run_reports_missing_source() -> Result<(), Box<dyn Error>> {
    let workspace = tempdir()?;
    cli()?
        .arg("--workspace")
        .arg(workspace.path())
        .arg("run")
        .arg(workspace.path().join("missing.cpp"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.cpp"));
    Ok(())
}

#[cfg(unix)]
mod fake_compiler {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    const FAKE_COMPILER: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "fake g++ 1.0"; exit 0; fi
if grep -q undeclared_fn "$1"; then
  echo "$1: error: 'undeclared_fn' was not declared in this scope" >&2
  exit 1
fi
cp "$1" "$3" && chmod +x "$3"
"#;

    fn install(dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
        let path = dir.join("fake-gxx");
        fs::write(&path, FAKE_COMPILER)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    #[test]
    fn probe_reports_configured_compiler() -> Result<(), Box<dyn Error>> {
        let workspace = tempdir()?;
        let compiler = install(workspace.path())?;
        cli()?
            .arg("probe")
            .arg("--compiler")
            .arg(&compiler)
            .assert()
            .success()
            .stdout(predicate::str::contains("fake-gxx (configured)"));
        Ok(())
    }

    #[test]
    fn run_streams_output_and_propagates_exit_code() -> Result<(), Box<dyn Error>> {
        let workspace = tempdir()?;
        let compiler = install(workspace.path())?;
        let source = workspace.path().join("prog.cpp");
        fs::write(&source, "#!/bin/sh\necho out line\necho err line >&2\nexit 3\n")?;

        cli()?
            .arg("--workspace")
            .arg(workspace.path())
            .arg("run")
            .arg(&source)
            .arg("--compiler")
            .arg(&compiler)
            .assert()
            .code(3)
            .stdout(predicate::str::diff("out line\nerr line\n"))
            .stderr(predicate::str::contains("Compiling..."))
            .stderr(predicate::str::contains("Process exited with code 3"));
        assert!(!workspace.path().join(".runpp").join("preferences.json").exists());
        Ok(())
    }

    #[test]
    fn run_prints_compiler_diagnostics() -> Result<(), Box<dyn Error>> {
        let workspace = tempdir()?;
        let compiler = install(workspace.path())?;
        let source = workspace.path().join("bad.cpp");
        fs::write(&source, "int main(){undeclared_fn();}")?;

        cli()?
            .arg("--workspace")
            .arg(workspace.path())
            .arg("run")
            .arg(&source)
            .arg("--compiler")
            .arg(&compiler)
            .assert()
            .failure()
            .stdout(predicate::str::is_empty())
            .stderr(predicate::str::contains("'undeclared_fn' was not declared"))
            .stderr(predicate::str::contains("compilation failed"));
        Ok(())
    }
}
