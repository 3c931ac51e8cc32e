//! Analytics code-generation and execution cycle.
//!
//! One turn walks load → classify → synthesize → validate → execute →
//! post-process. Every failure is an [`AnalyticsError`] the capability renders
//! into the reply; nothing here panics or aborts the surrounding turn.

pub mod charts;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod policy;
pub mod profile;
pub mod rephraser;
pub mod sandbox;
pub mod synthesizer;
pub mod upload_area;

pub use dataset::Dataset;
pub use error::AnalyticsError;
pub use sandbox::{Branch, ExecutionOutcome, PythonSandbox, Sandbox, SandboxRequest, SyntaxCheck};
pub use upload_area::UploadArea;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::gateway::CompletionGateway;
use crate::metrics;
use profile::DatasetProfile;
use rephraser::ResultRephraser;
use synthesizer::CodeSynthesizer;

pub const NO_CHART_RESPONSE: &str = "Code executed but no graph was returned.";

/// Artifact of a successful cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsOutcome {
    pub branch: Branch,
    /// Chart markup (plot) or the answer sentence (narrative).
    pub response: String,
    pub summary: String,
    pub code: String,
}

impl AnalyticsOutcome {
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.response, self.summary)
            .trim()
            .to_string()
    }
}

pub struct AnalyticsEngine {
    uploads: UploadArea,
    synthesizer: CodeSynthesizer,
    rephraser: ResultRephraser,
    sandbox: Arc<dyn Sandbox>,
}

impl AnalyticsEngine {
    pub fn new(
        uploads: UploadArea,
        gateway: Arc<dyn CompletionGateway>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        Self {
            uploads,
            synthesizer: CodeSynthesizer::new(gateway.clone()),
            rephraser: ResultRephraser::new(gateway),
            sandbox,
        }
    }

    pub fn uploads(&self) -> &UploadArea {
        &self.uploads
    }

    /// Run one cycle against `file`, or the newest upload when `file` is `None`.
    pub async fn run(
        &self,
        request: &str,
        file: Option<&Path>,
    ) -> Result<AnalyticsOutcome, AnalyticsError> {
        let path = self.uploads.resolve(file).await?;

        let (dataset, profile) = tokio::task::spawn_blocking(move || {
            let dataset = Dataset::load(&path)?;
            let profile = DatasetProfile::build(&dataset)?;
            Ok::<_, AnalyticsError>((dataset, profile))
        })
        .await
        .map_err(|e| AnalyticsError::DatasetParse(format!("loader task failed: {}", e)))??;

        let branch = self.synthesizer.classify(request).await;
        info!("📊 Analytics branch: {}", branch.as_str());

        let synthesized = self.synthesizer.synthesize(branch, &profile, request).await?;
        let code = self.reformat(synthesized.code).await;

        policy::check(&code)?;
        self.validate_syntax(&code).await?;

        let dataset_csv = dataset.to_csv()?;
        let outcome = self
            .sandbox
            .execute(SandboxRequest {
                code: code.clone(),
                branch,
                dataset_csv,
            })
            .await
            .map_err(|e| {
                metrics::inc_sandbox_run("unavailable");
                AnalyticsError::SandboxUnavailable(e.to_string())
            })?;

        self.post_process(branch, request, code, synthesized.summary, outcome)
            .await
    }

    async fn reformat(&self, code: String) -> String {
        match self.sandbox.format_code(&code).await {
            Ok(formatted) if !formatted.trim().is_empty() => formatted.trim_end().to_string(),
            Ok(_) => code,
            Err(e) => {
                debug!("Reformat skipped: {}", e);
                code
            }
        }
    }

    async fn validate_syntax(&self, code: &str) -> Result<(), AnalyticsError> {
        match self.sandbox.check_syntax(code).await {
            Ok(SyntaxCheck::Valid) => Ok(()),
            Ok(SyntaxCheck::Invalid(message)) => {
                metrics::inc_sandbox_run("syntax_error");
                Err(AnalyticsError::SyntaxError {
                    message,
                    code: code.to_string(),
                })
            }
            Err(e) => Err(AnalyticsError::SandboxUnavailable(e.to_string())),
        }
    }

    async fn post_process(
        &self,
        branch: Branch,
        request: &str,
        code: String,
        summary: String,
        outcome: ExecutionOutcome,
    ) -> Result<AnalyticsOutcome, AnalyticsError> {
        match outcome {
            ExecutionOutcome::SyntaxError { message } => {
                metrics::inc_sandbox_run("syntax_error");
                Err(AnalyticsError::SyntaxError { message, code })
            }
            ExecutionOutcome::RuntimeError { message } => {
                metrics::inc_sandbox_run("runtime_error");
                warn!("Generated code raised: {}", message);
                Err(AnalyticsError::RuntimeExecutionError { message, code })
            }
            ExecutionOutcome::Figures { figures, .. } if branch == Branch::Plot => {
                metrics::inc_sandbox_run("figures");
                if figures.is_empty() {
                    return Ok(AnalyticsOutcome {
                        branch,
                        response: NO_CHART_RESPONSE.to_string(),
                        summary,
                        code,
                    });
                }
                info!("📈 Rendering {} chart(s)", figures.len());
                Ok(AnalyticsOutcome {
                    branch,
                    response: charts::render_figures(&figures),
                    summary,
                    code,
                })
            }
            ExecutionOutcome::Output { .. } if branch == Branch::Plot => {
                metrics::inc_sandbox_run("figures");
                Ok(AnalyticsOutcome {
                    branch,
                    response: NO_CHART_RESPONSE.to_string(),
                    summary,
                    code,
                })
            }
            ExecutionOutcome::Output { stdout } | ExecutionOutcome::Figures { stdout, .. } => {
                let output = stdout.trim();
                if output.is_empty() {
                    metrics::inc_sandbox_run("no_output");
                    return Err(AnalyticsError::NoOutputProduced { code });
                }
                metrics::inc_sandbox_run("output");

                match self.rephraser.rephrase(request, output).await {
                    Ok(sentence) => Ok(AnalyticsOutcome {
                        branch,
                        response: sentence,
                        summary: String::new(),
                        code,
                    }),
                    Err(note) => Ok(AnalyticsOutcome {
                        branch,
                        response: output.to_string(),
                        summary: note,
                        code,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn upload(dir: &TempDir, name: &str, body: &str) {
        fs::write(dir.path().join(name), body).unwrap();
    }

    fn engine(dir: &TempDir, gateway: ScriptedGateway, sandbox: sandbox::ScriptedSandbox) -> (AnalyticsEngine, Arc<ScriptedGateway>, Arc<sandbox::ScriptedSandbox>) {
        let gateway = Arc::new(gateway);
        let sandbox = Arc::new(sandbox);
        let engine = AnalyticsEngine::new(UploadArea::new(dir.path()), gateway.clone(), sandbox.clone());
        (engine, gateway, sandbox)
    }

    const CARS: &str = "Brand,Price\nMaruti,400000\n maruti ,600000\nHonda,900000\n";

    // ===== Narrative Branch =====

    #[tokio::test]
    async fn test_maruti_average_narrative() {
        let dir = TempDir::new().unwrap();
        upload(&dir, "cars.csv", CARS);

        let gateway = ScriptedGateway::new()
            .reply("no")
            .reply("```python\nprint(df[df[\"Brand\"].str.strip().str.lower() == \"maruti\"][\"Price\"].mean())\n```\nAverage Maruti price.")
            .reply("The average price for Brand Maruti is 500000.0.");
        let sandbox = sandbox::ScriptedSandbox::new().with_outcome(ExecutionOutcome::Output {
            stdout: "500000.0".into(),
        });
        let (engine, gateway, sandbox) = engine(&dir, gateway, sandbox);

        let outcome = engine.run("average price for Brand Maruti", None).await.unwrap();

        assert_eq!(outcome.branch, Branch::Narrative);
        assert!(outcome.response.contains("Maruti"));
        assert!(outcome.response.contains("500000"));
        assert!(outcome.code.contains(".str.strip().str.lower() == \"maruti\""));

        let executed = sandbox.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].branch, Branch::Narrative);
        assert!(executed[0].dataset_csv.contains(" maruti "));

        let rephrase_prompt = &gateway.requests()[2].messages[0].content;
        assert!(rephrase_prompt.contains("500000.0"));
    }

    #[tokio::test]
    async fn test_missing_print_is_no_output_produced() {
        let dir = TempDir::new().unwrap();
        upload(&dir, "cars.csv", CARS);

        let gateway = ScriptedGateway::new()
            .reply("no")
            .reply("```python\ndf['Price'].mean()\n```");
        let sandbox = sandbox::ScriptedSandbox::new().with_outcome(ExecutionOutcome::Output {
            stdout: "   ".into(),
        });
        let (engine, _, _) = engine(&dir, gateway, sandbox);

        let err = engine.run("average price", None).await.unwrap_err();
        match err {
            AnalyticsError::NoOutputProduced { code } => assert_eq!(code, "df['Price'].mean()"),
            other => panic!("expected NoOutputProduced, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rephrase_failure_keeps_raw_output() {
        let dir = TempDir::new().unwrap();
        upload(&dir, "cars.csv", CARS);

        let gateway = ScriptedGateway::new()
            .reply("no")
            .reply("```python\nprint(len(df))\n```")
            .fail("rate limited");
        let sandbox = sandbox::ScriptedSandbox::new().with_outcome(ExecutionOutcome::Output {
            stdout: "3".into(),
        });
        let (engine, _, _) = engine(&dir, gateway, sandbox);

        let outcome = engine.run("how many rows", None).await.unwrap();
        assert_eq!(outcome.response, "3");
        assert!(outcome.summary.contains("Could not rephrase"));
    }

    // ===== Plot Branch =====

    #[tokio::test]
    async fn test_two_charts_bundle_runtime_once() {
        let dir = TempDir::new().unwrap();
        upload(&dir, "cars.csv", CARS);

        let gateway = ScriptedGateway::new()
            .reply("Yes")
            .reply("```python\nfig1 = px.bar(df, x='Brand', y='Price')\nfig2 = px.pie(df, names='Brand')\nfig1.show()\n```\nSummary:\nPrice by brand and brand share.");
        let figure = json!({"data": [{"type": "bar"}], "layout": {"width": 700}});
        let sandbox = sandbox::ScriptedSandbox::new().with_outcome(ExecutionOutcome::Figures {
            figures: vec![figure.clone(), figure],
            stdout: String::new(),
        });
        let (engine, _, sandbox) = engine(&dir, gateway, sandbox);

        let outcome = engine.run("plot price by brand and brand share", None).await.unwrap();

        assert_eq!(outcome.branch, Branch::Plot);
        assert_eq!(outcome.response.matches(charts::PLOTLY_CDN).count(), 1);
        assert_eq!(outcome.response.matches("Plotly.newPlot(").count(), 2);
        assert_eq!(outcome.summary, "Price by brand and brand share.");
        assert!(!sandbox.executed()[0].code.contains(".show()"));
    }

    #[tokio::test]
    async fn test_plot_without_figures_is_neutral_result() {
        let dir = TempDir::new().unwrap();
        upload(&dir, "cars.csv", CARS);

        let gateway = ScriptedGateway::new()
            .reply("yes")
            .reply("```python\nx = 1\n```\nSummary:\nNothing.");
        let sandbox = sandbox::ScriptedSandbox::new().with_outcome(ExecutionOutcome::Figures {
            figures: vec![],
            stdout: String::new(),
        });
        let (engine, _, _) = engine(&dir, gateway, sandbox);

        let outcome = engine.run("chart it", None).await.unwrap();
        assert_eq!(outcome.response, NO_CHART_RESPONSE);
    }

    // ===== Failure Paths =====

    #[tokio::test]
    async fn test_syntax_error_short_circuits_with_code() {
        let dir = TempDir::new().unwrap();
        upload(&dir, "cars.csv", CARS);

        let gateway = ScriptedGateway::new()
            .reply("no")
            .reply("```python\nprint(df.shape\n```");
        let sandbox = sandbox::ScriptedSandbox::new().with_syntax_error("'(' was never closed (line 1)");
        let (engine, _, sandbox) = engine(&dir, gateway, sandbox);

        let err = engine.run("shape", None).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::SyntaxError { .. }));
        assert!(err.to_payload().contains("print(df.shape"));
        assert!(sandbox.executed().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_error_echoes_code() {
        let dir = TempDir::new().unwrap();
        upload(&dir, "cars.csv", CARS);

        let gateway = ScriptedGateway::new()
            .reply("no")
            .reply("```python\nprint(df['Cost'].sum())\n```");
        let sandbox = sandbox::ScriptedSandbox::new().with_outcome(ExecutionOutcome::RuntimeError {
            message: "KeyError: 'Cost'".into(),
        });
        let (engine, _, _) = engine(&dir, gateway, sandbox);

        let err = engine.run("total cost", None).await.unwrap_err();
        let payload = err.to_payload();
        assert!(payload.contains("KeyError: 'Cost'"));
        assert!(payload.contains("print(df['Cost'].sum())"));
    }

    #[tokio::test]
    async fn test_forbidden_import_never_reaches_sandbox() {
        let dir = TempDir::new().unwrap();
        upload(&dir, "cars.csv", CARS);

        let gateway = ScriptedGateway::new()
            .reply("no")
            .reply("```python\nimport os\nprint(os.listdir('.'))\n```");
        let (engine, _, sandbox) = engine(&dir, gateway, sandbox::ScriptedSandbox::new());

        let err = engine.run("list files", None).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::ForbiddenConstruct { .. }));
        assert!(sandbox.executed().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_upload_fails_before_gateway() {
        let dir = TempDir::new().unwrap();
        upload(&dir, "notes.pdf", "%PDF-1.4");

        let (engine, gateway, _) = engine(&dir, ScriptedGateway::new(), sandbox::ScriptedSandbox::new());
        let err = engine.run("analyse", None).await.unwrap_err();

        assert!(matches!(err, AnalyticsError::UnsupportedFormat { .. }));
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_explicit_file_overrides_newest() {
        let dir = TempDir::new().unwrap();
        upload(&dir, "cars.csv", CARS);
        upload(&dir, "later.pdf", "%PDF");

        let gateway = ScriptedGateway::new()
            .reply("no")
            .reply("```python\nprint(3)\n```")
            .reply("There are 3 rows.");
        let sandbox = sandbox::ScriptedSandbox::new().with_outcome(ExecutionOutcome::Output {
            stdout: "3".into(),
        });
        let (engine, _, _) = engine(&dir, gateway, sandbox);

        let outcome = engine
            .run("count rows", Some(&dir.path().join("cars.csv")))
            .await
            .unwrap();
        assert_eq!(outcome.render(), "There are 3 rows.");
    }
}
