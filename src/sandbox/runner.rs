//! Invocation of the external sandbox engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::languages::{language_by_id, LanguageSpec};
use super::result::{EngineReport, ExecutionResult};

/// Wall-clock bound when the request carries no time limit.
const DEFAULT_WALL_CLOCK: Duration = Duration::from_secs(30);

/// Extra wall-clock headroom on top of the requested time limit, covering
/// engine startup and compilation.
const WALL_CLOCK_HEADROOM: Duration = Duration::from_secs(10);

/// Timeout for the availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that reject a request before any subprocess is launched.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The language id is not in the static language table.
    #[error("Unsupported language ID: {0}")]
    UnsupportedLanguage(u32),
}

/// One execution request against the sandbox engine.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub language_id: u32,
    pub stdin: Option<String>,
    pub time_limit_secs: Option<u32>,
    pub memory_limit_mb: Option<u32>,
}

/// Abstraction over sandboxed code execution, so the dispatcher and the
/// synchronous entry points can be tested against a scripted fake.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Executes one job and resolves it to a result.
    ///
    /// Engine failures (non-zero exit, malformed output, timeout) resolve
    /// to a result with a terminal status rather than an error; only
    /// pre-launch rejection (unsupported language) is an `Err`.
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError>;

    /// Probes whether the engine binary is usable.
    async fn is_available(&self) -> bool;
}

/// Outcome of an end-to-end self test, for health reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SelfTestReport {
    pub passed: bool,
    pub engine_available: bool,
    pub result: Option<ExecutionResult>,
    pub error: Option<String>,
}

/// Adapter invoking the `rustbox` sandbox binary.
pub struct RustboxRunner {
    binary_path: PathBuf,
    /// Request the engine's strict isolation mode. Only effective when the
    /// process runs as root, which the engine requires for namespaces.
    strict: bool,
}

impl RustboxRunner {
    /// Creates a runner for the engine binary at `binary_path`.
    ///
    /// Strict isolation is requested automatically when running as root.
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            strict: nix::unistd::geteuid().is_root(),
        }
    }

    /// Overrides the strict-isolation flag; used by tests.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Path of the engine binary.
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Builds the engine command line for one request.
    fn build_args(
        &self,
        lang: &LanguageSpec,
        request: &ExecutionRequest,
        box_id: u64,
    ) -> Vec<String> {
        let mut args = vec![
            "execute-code".to_string(),
            "--box-id".to_string(),
            box_id.to_string(),
            "--language".to_string(),
            lang.engine_id.to_string(),
            "--code".to_string(),
            request.source_code.clone(),
        ];

        if let Some(time) = request.time_limit_secs {
            args.push("--time".to_string());
            args.push(time.to_string());
        }
        if let Some(mem) = request.memory_limit_mb {
            args.push("--mem".to_string());
            args.push(mem.to_string());
        }
        if let Some(ref stdin) = request.stdin {
            args.push("--stdin".to_string());
            args.push(stdin.clone());
        }
        if self.strict {
            args.push("--strict".to_string());
        }

        args
    }

    /// Wall-clock bound for one invocation.
    fn wall_clock_bound(request: &ExecutionRequest) -> Duration {
        match request.time_limit_secs {
            Some(secs) => Duration::from_secs(u64::from(secs)) + WALL_CLOCK_HEADROOM,
            None => DEFAULT_WALL_CLOCK,
        }
    }

    /// Runs a canned job end-to-end and checks the expected output.
    pub async fn self_test(&self) -> SelfTestReport {
        let engine_available = self.is_available().await;
        let request = ExecutionRequest {
            source_code: "print('Hello, World!')".to_string(),
            language_id: 1,
            stdin: None,
            time_limit_secs: Some(5),
            memory_limit_mb: Some(128),
        };

        match self.execute(request).await {
            Ok(result) => {
                let passed = result.success
                    && result
                        .stdout
                        .as_deref()
                        .is_some_and(|out| out.contains("Hello, World!"));
                SelfTestReport {
                    passed,
                    engine_available,
                    result: Some(result),
                    error: None,
                }
            }
            Err(e) => SelfTestReport {
                passed: false,
                engine_available,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[async_trait]
impl CodeExecutor for RustboxRunner {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        let lang = language_by_id(request.language_id)
            .ok_or(SandboxError::UnsupportedLanguage(request.language_id))?;

        // Fresh sandbox instance id per invocation.
        let box_id = (Uuid::new_v4().as_u128() % 1_000_000) as u64;
        let args = self.build_args(lang, &request, box_id);

        debug!(
            box_id,
            language = lang.engine_id,
            time_limit = ?request.time_limit_secs,
            memory_limit = ?request.memory_limit_mb,
            "Invoking sandbox engine"
        );

        let invocation = tokio::process::Command::new(&self.binary_path)
            .args(&args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Self::wall_clock_bound(&request), invocation).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!(error = %e, "Failed to launch sandbox engine");
                return Ok(ExecutionResult::internal_error(format!(
                    "Failed to launch sandbox engine: {e}"
                )));
            }
            Err(_) => {
                warn!(box_id, "Sandbox engine exceeded wall-clock bound");
                return Ok(ExecutionResult::time_limit_exceeded("Execution timed out"));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(box_id, %stderr, "Sandbox engine exited with failure");
            return Ok(ExecutionResult::internal_error(format!(
                "Sandbox engine failed: {stderr}"
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match serde_json::from_str::<EngineReport>(&stdout) {
            Ok(report) => {
                let result = ExecutionResult::from_report(report, lang.name);
                info!(box_id, status = %result.status, success = result.success, "Execution finished");
                Ok(result)
            }
            Err(e) => {
                error!(box_id, error = %e, "Failed to parse engine output");
                Ok(ExecutionResult::internal_error(format!(
                    "Failed to parse engine output: {stdout}"
                )))
            }
        }
    }

    async fn is_available(&self) -> bool {
        let probe = tokio::process::Command::new(&self.binary_path)
            .arg("--help")
            .kill_on_drop(true)
            .output();

        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, probe).await,
            Ok(Ok(output)) if output.status.success()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::submission::Status;

    fn request(language_id: u32) -> ExecutionRequest {
        ExecutionRequest {
            source_code: "print('hi')".to_string(),
            language_id,
            stdin: None,
            time_limit_secs: Some(2),
            memory_limit_mb: Some(64),
        }
    }

    /// Writes an executable shell script standing in for the engine binary.
    ///
    /// Payloads with escapes must be emitted via `printf '%s\n'`: dash's
    /// `echo` expands backslash escapes and would corrupt the JSON.
    fn fake_engine(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("rustbox");
        let mut file = std::fs::File::create(&path).expect("create fake engine");
        writeln!(file, "#!/bin/sh").expect("write shebang");
        writeln!(file, "{body}").expect("write body");
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake engine");
        path
    }

    #[test]
    fn test_build_args_full() {
        let runner = RustboxRunner::new("/usr/local/bin/rustbox").with_strict(true);
        let lang = language_by_id(1).expect("python exists");
        let req = ExecutionRequest {
            source_code: "print(1)".to_string(),
            language_id: 1,
            stdin: Some("data".to_string()),
            time_limit_secs: Some(5),
            memory_limit_mb: Some(128),
        };

        let args = runner.build_args(lang, &req, 42);

        assert_eq!(args[0], "execute-code");
        assert!(args.windows(2).any(|w| w == ["--box-id", "42"]));
        assert!(args.windows(2).any(|w| w == ["--language", "python"]));
        assert!(args.windows(2).any(|w| w == ["--time", "5"]));
        assert!(args.windows(2).any(|w| w == ["--mem", "128"]));
        assert!(args.windows(2).any(|w| w == ["--stdin", "data"]));
        assert!(args.contains(&"--strict".to_string()));
    }

    #[test]
    fn test_build_args_omits_absent_options() {
        let runner = RustboxRunner::new("/usr/local/bin/rustbox").with_strict(false);
        let lang = language_by_id(1).expect("python exists");
        let req = ExecutionRequest {
            source_code: "print(1)".to_string(),
            language_id: 1,
            stdin: None,
            time_limit_secs: None,
            memory_limit_mb: None,
        };

        let args = runner.build_args(lang, &req, 7);

        assert!(!args.contains(&"--time".to_string()));
        assert!(!args.contains(&"--mem".to_string()));
        assert!(!args.contains(&"--stdin".to_string()));
        assert!(!args.contains(&"--strict".to_string()));
    }

    #[test]
    fn test_wall_clock_bound() {
        assert_eq!(
            RustboxRunner::wall_clock_bound(&request(1)),
            Duration::from_secs(12)
        );
        let mut no_limit = request(1);
        no_limit.time_limit_secs = None;
        assert_eq!(
            RustboxRunner::wall_clock_bound(&no_limit),
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    async fn test_unknown_language_rejected_before_launch() {
        // Path that would fail loudly if any subprocess were attempted.
        let runner = RustboxRunner::new("/nonexistent/rustbox");
        let err = runner
            .execute(request(99))
            .await
            .expect_err("unknown language must be an error");
        assert!(matches!(err, SandboxError::UnsupportedLanguage(99)));
    }

    #[tokio::test]
    async fn test_launch_failure_resolves_to_internal_error() {
        let runner = RustboxRunner::new("/nonexistent/rustbox");
        let result = runner.execute(request(1)).await.expect("resolves to result");
        assert_eq!(result.status, Status::InternalError);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_successful_report_is_parsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = fake_engine(
            &dir,
            r#"printf '%s\n' '{"status":"Success","exit_code":0,"stdout":"Hello, World!\n","wall_time":0.01}'"#,
        );

        let runner = RustboxRunner::new(engine).with_strict(false);
        let result = runner.execute(request(1)).await.expect("result");

        assert_eq!(result.status, Status::Accepted);
        assert!(result.success);
        assert_eq!(result.stdout.as_deref(), Some("Hello, World!\n"));
        assert_eq!(result.language.as_deref(), Some("Python"));
    }

    #[tokio::test]
    async fn test_malformed_output_preserved_in_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = fake_engine(&dir, "echo 'not json at all'");

        let runner = RustboxRunner::new(engine).with_strict(false);
        let result = runner.execute(request(1)).await.expect("result");

        assert_eq!(result.status, Status::InternalError);
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("not json at all")));
    }

    #[tokio::test]
    async fn test_engine_failure_carries_diagnostics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = fake_engine(&dir, "echo 'box setup failed' >&2; exit 3");

        let runner = RustboxRunner::new(engine).with_strict(false);
        let result = runner.execute(request(1)).await.expect("result");

        assert_eq!(result.status, Status::InternalError);
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("box setup failed")));
    }

    #[tokio::test]
    async fn test_availability_probe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = fake_engine(&dir, "exit 0");

        let runner = RustboxRunner::new(engine).with_strict(false);
        assert!(runner.is_available().await);

        let missing = RustboxRunner::new("/nonexistent/rustbox");
        assert!(!missing.is_available().await);
    }

    #[tokio::test]
    async fn test_self_test_against_fake_engine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = fake_engine(
            &dir,
            r#"case "$1" in --help) exit 0;; *) printf '%s\n' '{"status":"Success","exit_code":0,"stdout":"Hello, World!\n"}';; esac"#,
        );

        let runner = RustboxRunner::new(engine).with_strict(false);
        let report = runner.self_test().await;

        assert!(report.engine_available);
        assert!(report.passed);
    }
}
