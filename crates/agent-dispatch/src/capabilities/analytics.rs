use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{AgentType, Capability, CapabilityInput};
use crate::analytics::AnalyticsEngine;

/// Routes a turn through the analytics engine. Failures surface as
/// user-facing `❌` text rather than errors so the dispatch graph keeps them.
pub struct AnalyticsCapability {
    engine: Arc<AnalyticsEngine>,
}

impl AnalyticsCapability {
    pub fn new(engine: Arc<AnalyticsEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Capability for AnalyticsCapability {
    fn agent_type(&self) -> AgentType {
        AgentType::Analytics
    }

    async fn run(&self, input: CapabilityInput) -> anyhow::Result<String> {
        match self.engine.run(&input.prompt, input.file.as_deref()).await {
            Ok(outcome) => Ok(outcome.render()),
            Err(e) => {
                warn!("Analytics cycle failed ({}): {}", e.kind(), e);
                Ok(e.to_payload())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::sandbox::{ExecutionOutcome, ScriptedSandbox};
    use crate::analytics::UploadArea;
    use crate::gateway::ScriptedGateway;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_upload_renders_error_payload() {
        let dir = TempDir::new().unwrap();
        let engine = AnalyticsEngine::new(
            UploadArea::new(dir.path()),
            Arc::new(ScriptedGateway::new()),
            Arc::new(ScriptedSandbox::new()),
        );
        let capability = AnalyticsCapability::new(Arc::new(engine));

        let reply = capability.run(CapabilityInput::new("plot sales")).await.unwrap();
        assert!(reply.starts_with("❌"));
    }

    #[tokio::test]
    async fn test_narrative_renders_sentence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sales.csv"), "region,amount\nnorth,10\nsouth,30\n").unwrap();

        let gateway = ScriptedGateway::new()
            .reply("no")
            .reply("```python\nprint(df['amount'].sum())\n```")
            .reply("Total sales amount is 40.");
        let sandbox = ScriptedSandbox::new().with_outcome(ExecutionOutcome::Output { stdout: "40\n".into() });
        let engine = AnalyticsEngine::new(UploadArea::new(dir.path()), Arc::new(gateway), Arc::new(sandbox));
        let capability = AnalyticsCapability::new(Arc::new(engine));

        let reply = capability.run(CapabilityInput::new("total sales")).await.unwrap();
        assert_eq!(reply, "Total sales amount is 40.");
    }
}
