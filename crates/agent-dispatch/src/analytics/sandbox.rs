//! Isolated execution of generated code.
//!
//! The production sandbox runs the interpreter as a child process in
//! isolated mode with an embedded harness. The harness seeds a namespace with
//! the dataset handle and the rendering modules for the chosen branch only,
//! captures printed output in a buffer and answers with one JSON envelope.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const HARNESS_SOURCE: &str = include_str!("harness.py");

/// Analytics path chosen before code is generated. The two never mix in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    Plot,
    Narrative,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Plot => "plot",
            Branch::Narrative => "narrative",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub code: String,
    pub branch: Branch,
    /// Full dataset serialized as CSV.
    pub dataset_csv: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxCheck {
    Valid,
    Invalid(String),
}

/// Tagged result of one execution. Failures of the generated code are values, not errors.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Output { stdout: String },
    Figures { figures: Vec<Value>, stdout: String },
    SyntaxError { message: String },
    RuntimeError { message: String },
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn check_syntax(&self, code: &str) -> anyhow::Result<SyntaxCheck>;

    /// Cosmetic reformatting. Callers keep the original code on error.
    async fn format_code(&self, code: &str) -> anyhow::Result<String>;

    /// `Err` means the sandbox itself could not run, not that the code failed.
    async fn execute(&self, request: SandboxRequest) -> anyhow::Result<ExecutionOutcome>;
}

#[derive(Debug, Serialize)]
struct HarnessRequest<'a> {
    mode: &'static str,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<Branch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dataset_csv: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum HarnessReply {
    Valid,
    Formatted { code: String },
    Unformatted { reason: String },
    Output { stdout: String },
    Figures { figures: Vec<Value>, stdout: String },
    SyntaxError { message: String },
    RuntimeError { message: String },
    HarnessError { message: String },
}

pub struct PythonSandbox {
    python_bin: PathBuf,
    timeout: Option<Duration>,
}

impl PythonSandbox {
    pub fn new(python_bin: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            python_bin: python_bin.into(),
            timeout,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.python_bin.clone(),
            config.sandbox_timeout_seconds.map(Duration::from_secs),
        )
    }

    async fn run_harness(&self, request: &HarnessRequest<'_>) -> anyhow::Result<HarnessReply> {
        let payload = serde_json::to_vec(request).context("failed to encode harness request")?;

        let mut child = Command::new(&self.python_bin)
            .arg("-I")
            .arg("-c")
            .arg(HARNESS_SOURCE)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.python_bin.display()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("sandbox stdin unavailable"))?;
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| anyhow!("sandbox run exceeded {}s and was killed", limit.as_secs()))?,
            None => child.wait_with_output().await,
        }
        .context("failed to collect sandbox output")?;

        if let Ok(Err(e)) = writer.await {
            debug!("Sandbox closed stdin early: {}", e);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("Sandbox stderr: {}", stderr.trim());
        }

        let reply: HarnessReply = serde_json::from_slice(&output.stdout).with_context(|| {
            format!(
                "sandbox exited with {} without a valid reply: {}",
                output.status,
                stderr.trim()
            )
        })?;

        if let HarnessReply::HarnessError { message } = reply {
            return Err(anyhow!("sandbox harness failed: {}", message));
        }
        Ok(reply)
    }
}

#[async_trait]
impl Sandbox for PythonSandbox {
    async fn check_syntax(&self, code: &str) -> anyhow::Result<SyntaxCheck> {
        let request = HarnessRequest {
            mode: "check",
            code,
            branch: None,
            dataset_csv: None,
        };
        match self.run_harness(&request).await? {
            HarnessReply::Valid => Ok(SyntaxCheck::Valid),
            HarnessReply::SyntaxError { message } => Ok(SyntaxCheck::Invalid(message)),
            other => Err(anyhow!("unexpected reply to syntax check: {:?}", other)),
        }
    }

    async fn format_code(&self, code: &str) -> anyhow::Result<String> {
        let request = HarnessRequest {
            mode: "format",
            code,
            branch: None,
            dataset_csv: None,
        };
        match self.run_harness(&request).await? {
            HarnessReply::Formatted { code } => Ok(code),
            HarnessReply::Unformatted { reason } => Err(anyhow!("formatter unavailable: {}", reason)),
            other => Err(anyhow!("unexpected reply to format request: {:?}", other)),
        }
    }

    async fn execute(&self, request: SandboxRequest) -> anyhow::Result<ExecutionOutcome> {
        let harness_request = HarnessRequest {
            mode: "execute",
            code: &request.code,
            branch: Some(request.branch),
            dataset_csv: Some(&request.dataset_csv),
        };
        let outcome = match self.run_harness(&harness_request).await? {
            HarnessReply::Output { stdout } => ExecutionOutcome::Output { stdout },
            HarnessReply::Figures { figures, stdout } => ExecutionOutcome::Figures { figures, stdout },
            HarnessReply::SyntaxError { message } => ExecutionOutcome::SyntaxError { message },
            HarnessReply::RuntimeError { message } => ExecutionOutcome::RuntimeError { message },
            other => {
                warn!("Unexpected sandbox reply to execute: {:?}", other);
                return Err(anyhow!("unexpected reply to execute request"));
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
pub use scripted::ScriptedSandbox;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_request_encoding() {
        let request = HarnessRequest {
            mode: "execute",
            code: "print(1)",
            branch: Some(Branch::Plot),
            dataset_csv: Some("a\n1\n"),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["mode"], "execute");
        assert_eq!(value["branch"], "plot");
        assert_eq!(value["dataset_csv"], "a\n1\n");

        let check = HarnessRequest {
            mode: "check",
            code: "x",
            branch: None,
            dataset_csv: None,
        };
        let value = serde_json::to_value(&check).unwrap();
        assert!(value.get("branch").is_none());
    }

    #[test]
    fn test_harness_reply_decoding() {
        let reply: HarnessReply =
            serde_json::from_str(r#"{"status":"figures","figures":[{"data":[]}],"stdout":""}"#).unwrap();
        assert!(matches!(reply, HarnessReply::Figures { ref figures, .. } if figures.len() == 1));

        let reply: HarnessReply =
            serde_json::from_str(r#"{"status":"syntax_error","message":"invalid syntax (line 1)"}"#).unwrap();
        assert!(matches!(reply, HarnessReply::SyntaxError { .. }));
    }

    #[test]
    fn test_harness_source_is_embedded() {
        assert!(HARNESS_SOURCE.contains("redirect_stdout"));
        assert!(HARNESS_SOURCE.contains("def execute"));
        assert!(HARNESS_SOURCE.contains("except BaseException"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_sandbox_error() {
        let sandbox = PythonSandbox::new("/nonexistent/python-for-tests", None);
        assert!(sandbox.check_syntax("print(1)").await.is_err());
    }

    #[tokio::test]
    async fn test_python_syntax_check_when_available() {
        let Ok(python) = which::which("python3") else {
            return;
        };
        let sandbox = PythonSandbox::new(python, Some(Duration::from_secs(30)));
        assert_eq!(sandbox.check_syntax("print(1)").await.unwrap(), SyntaxCheck::Valid);
        assert!(matches!(
            sandbox.check_syntax("print(1").await.unwrap(),
            SyntaxCheck::Invalid(_)
        ));
    }

    fn python_with_pandas() -> Option<PathBuf> {
        let python = which::which("python3").ok()?;
        let check = std::process::Command::new(&python)
            .args(["-I", "-c", "import pandas"])
            .output()
            .ok()?;
        check.status.success().then_some(python)
    }

    #[tokio::test]
    async fn test_exit_in_generated_code_is_runtime_error() {
        let Some(python) = python_with_pandas() else {
            return;
        };
        let sandbox = PythonSandbox::new(python, Some(Duration::from_secs(60)));

        for code in ["print(1)\nraise SystemExit(3)", "raise KeyboardInterrupt()", "exit()"] {
            let outcome = sandbox
                .execute(SandboxRequest {
                    code: code.to_string(),
                    branch: Branch::Narrative,
                    dataset_csv: "a,b\n1,2\n".to_string(),
                })
                .await
                .unwrap();
            assert!(
                matches!(outcome, ExecutionOutcome::RuntimeError { .. }),
                "{} gave {:?}",
                code,
                outcome
            );
        }
    }

    #[tokio::test]
    async fn test_harness_executes_narrative_code() {
        let Some(python) = python_with_pandas() else {
            return;
        };
        let sandbox = PythonSandbox::new(python, Some(Duration::from_secs(60)));
        let outcome = sandbox
            .execute(SandboxRequest {
                code: "print(len(df))".to_string(),
                branch: Branch::Narrative,
                dataset_csv: "a,b\n1,2\n3,4\n".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Output { stdout: "2".into() });
    }
}
