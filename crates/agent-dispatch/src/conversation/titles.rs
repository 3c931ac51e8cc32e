//! Session titles: a short gateway-generated title with a deterministic
//! rule-based fallback.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::gateway::{CompletionGateway, CompletionRequest, SamplingOptions};
use crate::utils::TextUtils;

const MAX_TITLE_CHARS: usize = 60;
const MAX_SUBJECT_CHARS: usize = 30;
const MAX_ACTION_CHARS: usize = 25;

const LEADING_FILLERS: [&str; 7] = ["hi", "hello", "hey", "can you", "please", "i need", "help me"];
const GREETINGS: [&str; 6] = ["hi", "hello", "hey", "good morning", "good afternoon", "good evening"];

const TITLE_INSTRUCTION: &str = "Generate a concise 3-6 word title for a chat conversation based on the user's first message. \
The title should capture the main topic or question. \
Examples: 'Python Script Help', 'Market Research Query', 'Document Analysis Request'. \
Only return the title, nothing else.";

pub struct TitleSynthesizer {
    gateway: Arc<dyn CompletionGateway>,
}

impl TitleSynthesizer {
    pub fn new(gateway: Arc<dyn CompletionGateway>) -> Self {
        Self { gateway }
    }

    pub async fn title(&self, first_message: &str) -> String {
        let request = CompletionRequest::with_system(
            TITLE_INSTRUCTION,
            format!("First message: {}", first_message),
            SamplingOptions::title(),
        );

        match self.gateway.generate(request).await {
            Ok(raw) => {
                let cleaned = raw.trim().replace(['"', '\''], "");
                let cleaned = cleaned.trim();
                if cleaned.is_empty() {
                    debug!("Empty title from gateway, using rule-based title");
                    rule_based_title(first_message)
                } else {
                    TextUtils::truncate_with_ellipsis(cleaned, MAX_TITLE_CHARS).into_owned()
                }
            }
            Err(e) => {
                warn!("Title generation failed: {}", e);
                rule_based_title(first_message)
            }
        }
    }
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

fn subject_after(title: &str, phrases: &[&str], max_chars: usize) -> String {
    let mut subject = title.to_string();
    for phrase in phrases {
        subject = TextUtils::remove_ignore_case(&subject, phrase);
    }
    let subject = subject.replace('?', "");
    let subject = TextUtils::normalize_whitespace(subject.trim());
    TextUtils::truncate_with_ellipsis(&subject, max_chars).into_owned()
}

fn titled_or(prefix: &str, subject: &str, fallback: &str) -> String {
    if subject.is_empty() {
        fallback.to_string()
    } else {
        format!("{}{}", prefix, TextUtils::title_case(subject))
    }
}

/// Deterministic title from the first user message.
pub fn rule_based_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    let title = LEADING_FILLERS
        .iter()
        .find_map(|prefix| TextUtils::strip_word_prefix(trimmed, prefix))
        .unwrap_or(trimmed);
    let lower = title.to_lowercase();

    if contains_any(&lower, &["document", "pdf", "file", "analyze", "upload"]) {
        return if lower.contains("analyze") {
            "Document Analysis Request"
        } else if lower.contains("upload") {
            "File Upload Query"
        } else {
            "Document Processing"
        }
        .to_string();
    }

    if contains_any(&lower, &["data", "analytics", "report", "dashboard", "chart"]) {
        return if lower.contains("create") || lower.contains("generate") {
            "Data Visualization Request"
        } else if lower.contains("analyze") {
            "Data Analysis Query"
        } else {
            "Analytics Discussion"
        }
        .to_string();
    }

    if contains_any(&lower, &["code", "script", "python", "programming", "api"]) {
        return if lower.contains("python") {
            "Python Programming Help"
        } else if lower.contains("api") {
            "API Development Query"
        } else if lower.contains("script") {
            "Script Generation Request"
        } else {
            "Coding Assistance"
        }
        .to_string();
    }

    if contains_any(&lower, &["research", "market", "trends", "industry", "competitor"]) {
        return if lower.contains("market") {
            "Market Research Query"
        } else if lower.contains("trends") {
            "Industry Trends Discussion"
        } else if lower.contains("competitor") {
            "Competitive Analysis"
        } else {
            "Research Request"
        }
        .to_string();
    }

    if lower.starts_with("what") {
        if lower.contains("time") || lower.contains("date") {
            return "Time/Date Query".to_string();
        }
        if lower.contains("weather") {
            return "Weather Information".to_string();
        }
        if lower.contains("how to") {
            return "How-to Question".to_string();
        }
        let subject = subject_after(title, &["what is", "what are"], MAX_SUBJECT_CHARS);
        return titled_or("About ", &subject, "General Question");
    }
    if lower.starts_with("how") {
        if lower.contains("how to") {
            let action = subject_after(title, &["how to"], MAX_ACTION_CHARS);
            return titled_or("How to ", &action, "How-to Question");
        }
        if lower.contains("how are you") {
            return "Greeting & Status Check".to_string();
        }
        return "How-to Question".to_string();
    }
    if lower.starts_with("why") {
        let subject = subject_after(title, &["why"], MAX_SUBJECT_CHARS);
        return titled_or("Why ", &subject, "Why Question");
    }
    if lower.starts_with("when") {
        return "When/Timing Question".to_string();
    }
    if lower.starts_with("where") {
        return "Location/Where Question".to_string();
    }
    if lower.starts_with("who") {
        return "Who/Person Question".to_string();
    }

    if contains_any(&lower, &["create", "make", "build", "develop"]) {
        return if lower.contains("report") {
            "Report Creation Request"
        } else if lower.contains("dashboard") {
            "Dashboard Development"
        } else if lower.contains("script") {
            "Script Creation"
        } else {
            "Creation/Development Task"
        }
        .to_string();
    }

    if contains_any(&lower, &["explain", "describe", "tell me about"]) {
        let subject = subject_after(title, &["explain", "describe", "tell me about"], MAX_SUBJECT_CHARS);
        return titled_or("Explanation: ", &subject, "Explanation Request");
    }
    if contains_any(&lower, &["compare", "difference", " vs", "versus"]) {
        return "Comparison Query".to_string();
    }
    if contains_any(&lower, &["list", "show me", "give me"]) {
        return "Information Request".to_string();
    }

    let bare = lower.trim_end_matches(['!', '?', '.']);
    if bare.is_empty() || GREETINGS.contains(&bare) {
        return "Initial Greeting".to_string();
    }
    if lower.contains("how are you") {
        return "Greeting & Status Check".to_string();
    }

    let words: Vec<&str> = title.split_whitespace().collect();
    if words.len() <= 6 {
        TextUtils::title_case(&words.join(" "))
    } else {
        format!("{}...", TextUtils::title_case(&words[..5].join(" ")))
    }
}
