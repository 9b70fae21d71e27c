//! Compiler discovery.
//! （編譯器探測。）

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::executor::{RunExecutor, RunSpec};

/// Name probed on the ambient `PATH`.
pub const AMBIENT_COMPILER: &str = "g++";
/// Bundled distribution location, relative to the application directory.
pub const BUNDLED_BIN_DIR: &str = "toolchain/bin";
/// Upper bound for the `--version` probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolchainError {
    #[error("no C++ compiler found on PATH or in the bundled toolchain")]
    NotFound,
}

/// 編譯器來源。 / Where the compiler was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainSource {
    Ambient,
    Bundled,
    Override,
}

/// 已解析的編譯器與執行環境。 / Resolved compiler plus the environment it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainInvocation {
    compiler: PathBuf,
    env: BTreeMap<OsString, OsString>,
    source: ToolchainSource,
}

impl ToolchainInvocation {
    pub fn new(compiler: impl Into<PathBuf>, source: ToolchainSource) -> Self {
        Self {
            compiler: compiler.into(),
            env: BTreeMap::new(),
            source,
        }
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn compiler(&self) -> &Path {
        &self.compiler
    }

    /// Variables layered over the inherited environment for both the
    /// compiler and the programs it produces.
    pub fn env(&self) -> &BTreeMap<OsString, OsString> {
        &self.env
    }

    pub fn source(&self) -> ToolchainSource {
        self.source
    }

    /// 產生編譯指令。 / `<compiler> <source> -o <artifact> -std=c++<standard>`, run from the source directory.
    ///
    /// A `gnu++` prefixed standard is passed as `-std=gnu++<revision>`.
    pub fn compile_spec(&self, source: &Path, artifact: &Path, standard: &str) -> RunSpec {
        let mut spec = RunSpec::new(&self.compiler)
            .push_arg(source.as_os_str())
            .push_arg("-o")
            .push_arg(artifact.as_os_str())
            .push_arg(std_flag(standard))
            .with_envs(&self.env);
        if let Some(dir) = source.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            spec = spec.with_working_dir(dir);
        }
        spec
    }
}

fn std_flag(standard: &str) -> String {
    if standard.starts_with("gnu++") {
        format!("-std={standard}")
    } else {
        format!("-std=c++{standard}")
    }
}

/// Probes for a usable compiler.
///
/// Order: explicit override, then `g++` on the ambient `PATH`, then the
/// bundled distribution under the application directory. The locator is
/// only consulted at startup and on an explicit re-probe.
#[derive(Debug, Clone)]
pub struct ToolchainLocator {
    ambient: PathBuf,
    app_dir: Option<PathBuf>,
    override_path: Option<PathBuf>,
    timeout: Duration,
}

impl Default for ToolchainLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolchainLocator {
    /// Locator rooted at the running executable's directory.
    pub fn new() -> Self {
        let app_dir = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        Self {
            ambient: PathBuf::from(AMBIENT_COMPILER),
            app_dir,
            override_path: None,
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_ambient(mut self, program: impl Into<PathBuf>) -> Self {
        self.ambient = program.into();
        self
    }

    pub fn with_app_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.app_dir = Some(dir.into());
        self
    }

    pub fn with_override(mut self, compiler: Option<PathBuf>) -> Self {
        self.override_path = compiler;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 解析編譯器。 / Resolves a compiler or reports [`ToolchainError::NotFound`].
    pub fn resolve(&self) -> Result<ToolchainInvocation, ToolchainError> {
        if let Some(path) = &self.override_path {
            if self.probe(path, &BTreeMap::new()) {
                tracing::info!(compiler = %path.display(), "using configured compiler");
                return Ok(ToolchainInvocation::new(path, ToolchainSource::Override));
            }
            tracing::warn!(compiler = %path.display(), "configured compiler did not respond; probing defaults");
        }

        if self.probe(&self.ambient, &BTreeMap::new()) {
            tracing::info!(compiler = %self.ambient.display(), "using compiler from PATH");
            return Ok(ToolchainInvocation::new(
                &self.ambient,
                ToolchainSource::Ambient,
            ));
        }

        if let Some(invocation) = self.bundled() {
            tracing::info!(compiler = %invocation.compiler().display(), "using bundled compiler");
            return Ok(invocation);
        }

        tracing::warn!("no C++ compiler available");
        Err(ToolchainError::NotFound)
    }

    fn bundled(&self) -> Option<ToolchainInvocation> {
        let bin_dir = self.app_dir.as_ref()?.join(BUNDLED_BIN_DIR);
        let compiler = bin_dir.join(format!("{AMBIENT_COMPILER}{}", env::consts::EXE_SUFFIX));
        if !compiler.is_file() {
            return None;
        }

        // Runtime libraries live beside the compiler, so it goes first on PATH.
        let mut entries = vec![bin_dir];
        if let Some(path) = env::var_os("PATH") {
            entries.extend(env::split_paths(&path));
        }
        let path = match env::join_paths(entries) {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(error = %err, "bundled toolchain directory cannot be placed on PATH");
                return None;
            }
        };
        let invocation =
            ToolchainInvocation::new(compiler, ToolchainSource::Bundled).with_env("PATH", path);
        self.probe(invocation.compiler(), invocation.env())
            .then_some(invocation)
    }

    fn probe(&self, compiler: &Path, env: &BTreeMap<OsString, OsString>) -> bool {
        let spec = RunSpec::new(compiler)
            .push_arg("--version")
            .with_envs(env)
            .with_timeout(self.timeout);
        match RunExecutor::execute(&spec) {
            Ok(result) if result.success() => true,
            Ok(result) => {
                tracing::debug!(
                    compiler = %compiler.display(),
                    exit_code = ?result.exit_code,
                    timed_out = result.timed_out,
                    "compiler probe failed"
                );
                false
            }
            Err(err) => {
                tracing::debug!(compiler = %compiler.display(), error = %err, "compiler probe failed");
                false
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn ambient_compiler_wins_when_it_answers() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-gxx");
        script(&fake, "echo 'fake 1.0'");

        let invocation = ToolchainLocator::new()
            .with_ambient(&fake)
            .with_app_dir(dir.path())
            .resolve()
            .unwrap();
        assert_eq!(invocation.source(), ToolchainSource::Ambient);
        assert_eq!(invocation.compiler(), fake.as_path());
        assert!(invocation.env().is_empty());
    }

    #[test]
    fn falls_back_to_bundled_with_path_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join(BUNDLED_BIN_DIR);
        fs::create_dir_all(&bin).unwrap();
        script(&bin.join(AMBIENT_COMPILER), "exit 0");

        let invocation = ToolchainLocator::new()
            .with_ambient(dir.path().join("missing"))
            .with_app_dir(dir.path())
            .resolve()
            .unwrap();
        assert_eq!(invocation.source(), ToolchainSource::Bundled);
        let path = invocation.env().get(&OsString::from("PATH")).unwrap();
        assert_eq!(env::split_paths(path).next().unwrap(), bin);
    }

    #[test]
    fn failing_probe_means_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken");
        script(&broken, "exit 1");

        let result = ToolchainLocator::new()
            .with_ambient(&broken)
            .with_app_dir(dir.path())
            .resolve();
        assert_eq!(result, Err(ToolchainError::NotFound));
    }

    #[test]
    fn hanging_probe_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let slow = dir.path().join("slow");
        script(&slow, "sleep 5");

        let result = ToolchainLocator::new()
            .with_ambient(&slow)
            .with_app_dir(dir.path())
            .with_timeout(Duration::from_millis(100))
            .resolve();
        assert_eq!(result, Err(ToolchainError::NotFound));
    }

    #[test]
    fn override_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let ambient = dir.path().join("ambient");
        let pinned = dir.path().join("pinned");
        script(&ambient, "exit 0");
        script(&pinned, "exit 0");

        let invocation = ToolchainLocator::new()
            .with_ambient(&ambient)
            .with_override(Some(pinned.clone()))
            .resolve()
            .unwrap();
        assert_eq!(invocation.source(), ToolchainSource::Override);
        assert_eq!(invocation.compiler(), pinned.as_path());
    }

    #[test]
    fn compile_spec_uses_source_directory() {
        let invocation = ToolchainInvocation::new("g++", ToolchainSource::Ambient);
        let spec = invocation.compile_spec(
            Path::new("/work/a.cpp"),
            Path::new("/work/a"),
            "20",
        );
        let args: Vec<_> = spec.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["/work/a.cpp", "-o", "/work/a", "-std=c++20"]);
        assert_eq!(spec.working_dir.as_deref(), Some(Path::new("/work")));

        let gnu = invocation.compile_spec(
            Path::new("/work/a.cpp"),
            Path::new("/work/a"),
            "gnu++20",
        );
        assert_eq!(
            gnu.args.last().and_then(|arg| arg.to_str()),
            Some("-std=gnu++20")
        );
    }
}
