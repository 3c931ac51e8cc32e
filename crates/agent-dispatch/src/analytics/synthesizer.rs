//! Turns a dataset profile and a request into executable analysis code.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use super::error::AnalyticsError;
use super::extract;
use super::profile::DatasetProfile;
use super::sandbox::Branch;
use crate::gateway::{CompletionGateway, CompletionRequest, SamplingOptions};

lazy_static! {
    static ref YES_OR_NO: Regex = Regex::new(r"\b(yes|no)\b").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedCode {
    pub code: String,
    pub summary: String,
}

pub struct CodeSynthesizer {
    gateway: Arc<dyn CompletionGateway>,
}

impl CodeSynthesizer {
    pub fn new(gateway: Arc<dyn CompletionGateway>) -> Self {
        Self { gateway }
    }

    /// Decide between the plot and narrative branches. Gateway failures and
    /// answers that are neither yes nor no fall back to narrative.
    pub async fn classify(&self, request: &str) -> Branch {
        let prompt = classification_prompt(request);
        match self
            .gateway
            .generate(CompletionRequest::from_prompt(prompt, SamplingOptions::deterministic(3)))
            .await
        {
            Ok(reply) => {
                let branch = parse_yes_no(&reply);
                debug!("Chart classification reply {:?} -> {}", reply.trim(), branch.as_str());
                branch
            }
            Err(e) => {
                warn!("Chart classification failed, using narrative branch: {}", e);
                Branch::Narrative
            }
        }
    }

    pub async fn synthesize(
        &self,
        branch: Branch,
        profile: &DatasetProfile,
        request: &str,
    ) -> Result<SynthesizedCode, AnalyticsError> {
        let statistics = profile.statistics();
        let prompt = match branch {
            Branch::Plot => plot_prompt(&profile.sample_csv, &statistics, request),
            Branch::Narrative => narrative_prompt(&profile.sample_csv, &statistics, request),
        };

        let sampling = SamplingOptions {
            temperature: 0.2,
            max_tokens: 1500,
            top_p: 1.0,
        };
        let reply = self
            .gateway
            .generate(CompletionRequest::from_prompt(prompt, sampling))
            .await
            .map_err(|e| AnalyticsError::GatewayError {
                stage: "generating analysis code",
                message: e.to_string(),
            })?;

        let code = extract::extract_code(&reply);
        let summary = match branch {
            Branch::Plot => extract::plot_summary(&reply),
            Branch::Narrative => extract::narrative_summary(&reply),
        };
        info!(
            "🧪 Synthesized {} code ({} lines)",
            branch.as_str(),
            code.lines().count()
        );
        Ok(SynthesizedCode { code, summary })
    }
}

/// First standalone yes/no in the reply decides; anything else is narrative.
pub fn parse_yes_no(reply: &str) -> Branch {
    let lowered = reply.to_lowercase();
    match YES_OR_NO.captures(&lowered).map(|c| c[1].to_string()) {
        Some(word) if word == "yes" => Branch::Plot,
        _ => Branch::Narrative,
    }
}

pub fn classification_prompt(request: &str) -> String {
    format!(
        "You're a data analyst. The user asks: \"{request}\"\n\
         Do you need to generate a plotly graph to answer this, or is a plain data analysis enough?\n\n\
         Answer only: \"yes\" or \"no\""
    )
}

pub fn plot_prompt(sample_csv: &str, statistics: &str, request: &str) -> String {
    format!(
        r#"You are a Python data analyst using pandas and Plotly.

You are given a DataFrame called `df`. Below is a **sample** of it and basic statistics for reference, but you must use `df` in your code, not just the sample.

Sample rows (CSV):
{sample_csv}

DataFrame statistics:
{statistics}

User Query: {request}

INSTRUCTIONS:

1. Generate valid Python code using `df` to visualize the data using Plotly (`px` and `go` are already imported).
2. Give a brief textual summary of what the graph represents.

Strict rules:
- Do NOT randomly sample rows unless explicitly asked.
- Use correct numeric sorting (ascending or descending as per the request).
- Don't use df = pd.read_csv(...). The data is already loaded in `df`.
- Avoid fig.show().
- Assign every figure to a variable.
- Do not include extra closing ')' after multiline string blocks.

```python
<code here>
```

Summary:
<one paragraph here>

Ensure the Python code is syntactically correct and executable without unmatched brackets or indentation errors."#
    )
}

pub fn narrative_prompt(sample_csv: &str, statistics: &str, request: &str) -> String {
    format!(
        r#"You are a Python data analyst using pandas.

You are given a sample of a DataFrame derived from a full DataFrame `df`. Always write logic assuming the full DataFrame is named `df`.

Sample rows (CSV):
{sample_csv}

DataFrame statistics:
{statistics}

User Query: {request}

INSTRUCTIONS:

1. Write Python code to answer the query using the full DataFrame `df`.
2. Do NOT use `pd.read_csv`, `df.sample()`, or hardcoded values unless explicitly instructed.
3. You MUST use `print(...)` to display the result. Do not return or evaluate expressions silently.
4. Avoid assumptions about column names; rely only on the provided sample and statistics.
5. If comparing string values (e.g., Brand == "Maruti"), always use:
   `df["Brand"].str.strip().str.lower() == "maruti"` to ensure consistent matching.
6. Wrap only the code inside triple backticks like this:

```python
<your code>
```

Below the code block, write a brief summary sentence of the result as plain text (no backticks, no markdown)."#
    )
}
