use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::info;

use super::{AgentType, Capability, CapabilityInput};
use crate::gateway::{CompletionGateway, CompletionRequest, SamplingOptions};

/// Checked in order: `html` before `c`, `c++` before `c`.
pub const SUPPORTED_LANGUAGES: &[&str] = &["html", "python", "java", "c++", "c", "javascript", "css"];

pub const DEFAULT_LANGUAGE: &str = "python";

lazy_static! {
    static ref ANY_TAGGED_FENCE: Regex = Regex::new(r"(?s)```[\w+#]*[ \t]*\r?\n(.*?)```").unwrap();
    static ref BARE_FENCE: Regex = Regex::new(r"(?s)```\s*\n(.*?)```").unwrap();
}

/// First supported language named as a whole token in the prompt.
pub fn detect_language(prompt: &str) -> &'static str {
    let lowered = prompt.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#'))
        .filter(|t| !t.is_empty())
        .collect();

    SUPPORTED_LANGUAGES
        .iter()
        .find(|lang| tokens.iter().any(|t| t == *lang))
        .copied()
        .unwrap_or(DEFAULT_LANGUAGE)
}

/// Code body of the reply: exact language fence, any fence, bare fence, raw text.
pub fn extract_code(reply: &str, language: &str) -> String {
    let exact = Regex::new(&format!(r"(?s)```{}[ \t]*\r?\n(.*?)```", regex::escape(language))).ok();

    exact
        .as_ref()
        .and_then(|re| re.captures(reply))
        .or_else(|| ANY_TAGGED_FENCE.captures(reply))
        .or_else(|| BARE_FENCE.captures(reply))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end().to_string())
        .unwrap_or_else(|| reply.trim().to_string())
}

pub fn generation_prompt(prompt: &str, language: &str) -> String {
    format!(
        "You are a code generator.\n\n\
         Task:\n\
         Write a complete, runnable, clean {language} program that solves the following problem:\n\n\
         \"{prompt}\"\n\n\
         Rules:\n\
         - ONLY return the code.\n\
         - DO NOT include any explanation, markdown headings, or commentary.\n\
         - Use triple backticks and specify the language like: ```{language}\n\
         - Start the response with the code block, and end after it.\n\n\
         Example format:\n\n\
         ```{language}\n<your solution>\n```"
    )
}

pub struct CodingCapability {
    gateway: Arc<dyn CompletionGateway>,
}

impl CodingCapability {
    pub fn new(gateway: Arc<dyn CompletionGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Capability for CodingCapability {
    fn agent_type(&self) -> AgentType {
        AgentType::Coding
    }

    async fn run(&self, input: CapabilityInput) -> anyhow::Result<String> {
        let language = detect_language(&input.prompt);
        info!("💻 Coding capability handling request as {}", language);

        let sampling = SamplingOptions {
            temperature: 0.2,
            max_tokens: 2000,
            top_p: 1.0,
        };
        let reply = self
            .gateway
            .generate(CompletionRequest::from_prompt(
                generation_prompt(&input.prompt, language),
                sampling,
            ))
            .await?;

        let code = extract_code(&reply, language);
        Ok(format!("```{}\n{}\n```", language, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;

    // ===== Language Detection =====

    #[test]
    fn test_detect_language_whole_tokens() {
        assert_eq!(detect_language("write a bubble sort in C"), "c");
        assert_eq!(detect_language("write a bubble sort in C++"), "c++");
        assert_eq!(detect_language("Build an HTML page with CSS"), "html");
        assert_eq!(detect_language("a javascript debounce"), "javascript");
        assert_eq!(detect_language("java streams example"), "java");
    }

    #[test]
    fn test_detect_language_ignores_substrings() {
        // "script" and "cache" contain "c" but are not the language.
        assert_eq!(detect_language("write a script to cache results"), DEFAULT_LANGUAGE);
        assert_eq!(detect_language("reverse a linked list"), DEFAULT_LANGUAGE);
    }

    // ===== Extraction =====

    #[test]
    fn test_extract_exact_language_fence() {
        let reply = "```c\n#include <stdio.h>\nint main(void) { return 0; }\n```";
        assert_eq!(
            extract_code(reply, "c"),
            "#include <stdio.h>\nint main(void) { return 0; }"
        );
    }

    #[test]
    fn test_extract_other_fence_and_raw_fallback() {
        assert_eq!(extract_code("```cpp\nint x;\n```", "c++"), "int x;");
        assert_eq!(extract_code("```\nprint(1)\n```", "python"), "print(1)");
        assert_eq!(extract_code("  print(2)  ", "python"), "print(2)");
    }

    // ===== Capability =====

    #[tokio::test]
    async fn test_bubble_sort_in_c_is_fenced_with_c_tag() {
        let reply = "```c\n#include <stdio.h>\nvoid bubble_sort(int *a, int n) {\n    for (int i = 0; i < n - 1; i++)\n        for (int j = 0; j < n - i - 1; j++)\n            if (a[j] > a[j + 1]) { int t = a[j]; a[j] = a[j + 1]; a[j + 1] = t; }\n}\n```";
        let gateway = Arc::new(ScriptedGateway::new().reply(reply));
        let capability = CodingCapability::new(gateway.clone());

        let response = capability
            .run(CapabilityInput::new("write a bubble sort in C"))
            .await
            .unwrap();

        assert!(response.starts_with("```c\n#include <stdio.h>"));
        assert!(response.ends_with("}\n```"));
        assert!(response.contains("bubble_sort"));
        assert!(gateway.requests()[0].messages[0].content.contains("runnable, clean c program"));
    }
}
