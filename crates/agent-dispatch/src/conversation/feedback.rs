//! Feedback entries and their on-demand roll-up.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capabilities::{AgentType, AnswerMode};

/// Stored prefix of the rated message.
pub const MAX_FEEDBACK_CONTENT_CHARS: usize = 500;
/// Entries considered when deciding whether to steer the next reply.
const RECENT_WINDOW: usize = 5;
const RECENT_FEEDBACK_LIMIT: usize = 10;

const OVERALL_THRESHOLD: f64 = 0.7;
const SEGMENT_THRESHOLD: f64 = 0.6;

pub const NEGATIVE_FEEDBACK_GUIDANCE: &str = "IMPORTANT: Previous responses received negative feedback. \
Focus on being more helpful, accurate, and comprehensive. \
Ensure responses are well-formatted and directly address the user's needs.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Positive,
    Negative,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Positive => "positive",
            FeedbackType::Negative => "negative",
        }
    }
}

/// Feedback as submitted by a client; `agent_type` is the external label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub session_id: String,
    pub message_content: String,
    pub feedback_type: FeedbackType,
    pub agent_type: String,
    #[serde(default)]
    pub answer_mode: AnswerMode,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub feedback_id: String,
    pub session_id: String,
    pub message_content: String,
    pub feedback_type: FeedbackType,
    pub agent_type: AgentType,
    pub answer_mode: AnswerMode,
    pub timestamp: DateTime<Utc>,
    /// Length of the full message, before truncation.
    pub message_length: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackReceipt {
    pub feedback_id: String,
    pub status: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolarityCounts {
    pub positive: u64,
    pub negative: u64,
}

impl PolarityCounts {
    fn record(&mut self, feedback_type: FeedbackType) {
        match feedback_type {
            FeedbackType::Positive => self.positive += 1,
            FeedbackType::Negative => self.negative += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.positive + self.negative
    }

    pub fn positive_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.positive as f64 / total as f64),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAnalytics {
    pub total_feedback: u64,
    pub positive_feedback: u64,
    pub negative_feedback: u64,
    pub feedback_by_agent: BTreeMap<String, PolarityCounts>,
    pub feedback_by_mode: BTreeMap<String, PolarityCounts>,
    pub recent_feedback: Vec<FeedbackEntry>,
    pub improvement_suggestions: Vec<String>,
}

impl FeedbackAnalytics {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a FeedbackEntry>) -> Self {
        let mut analytics = Self::default();
        let mut all: Vec<&FeedbackEntry> = Vec::new();

        for entry in entries {
            analytics.total_feedback += 1;
            match entry.feedback_type {
                FeedbackType::Positive => analytics.positive_feedback += 1,
                FeedbackType::Negative => analytics.negative_feedback += 1,
            }
            analytics
                .feedback_by_agent
                .entry(entry.agent_type.as_str().to_string())
                .or_default()
                .record(entry.feedback_type);
            analytics
                .feedback_by_mode
                .entry(entry.answer_mode.as_str().to_string())
                .or_default()
                .record(entry.feedback_type);
            all.push(entry);
        }

        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.created_at.cmp(&a.created_at)));
        analytics.recent_feedback = all.into_iter().take(RECENT_FEEDBACK_LIMIT).cloned().collect();
        analytics.improvement_suggestions = analytics.suggestions();
        analytics
    }

    fn suggestions(&self) -> Vec<String> {
        if self.total_feedback == 0 {
            return vec!["No feedback data available yet.".to_string()];
        }

        let mut suggestions = Vec::new();
        let overall = self.positive_feedback as f64 / self.total_feedback as f64;
        if overall < OVERALL_THRESHOLD {
            suggestions.push(
                "Consider improving response quality - positive feedback rate is below 70%".to_string(),
            );
        }
        for (agent, counts) in &self.feedback_by_agent {
            if counts.positive_rate().is_some_and(|rate| rate < SEGMENT_THRESHOLD) {
                suggestions.push(format!("Focus on improving {} agent responses", agent));
            }
        }
        for (mode, counts) in &self.feedback_by_mode {
            if counts.positive_rate().is_some_and(|rate| rate < SEGMENT_THRESHOLD) {
                suggestions.push(format!("Improve {} answer mode responses", mode));
            }
        }

        if suggestions.is_empty() {
            suggestions
                .push("Great job! Feedback patterns look positive. Keep up the good work!".to_string());
        }
        suggestions
    }
}

/// Steering instruction when any of the session's latest entries is negative.
pub fn negative_feedback_guidance(entries: &[FeedbackEntry]) -> Option<String> {
    let start = entries.len().saturating_sub(RECENT_WINDOW);
    entries[start..]
        .iter()
        .any(|e| e.feedback_type == FeedbackType::Negative)
        .then(|| NEGATIVE_FEEDBACK_GUIDANCE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(agent: AgentType, mode: AnswerMode, kind: FeedbackType, minutes_ago: i64) -> FeedbackEntry {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        FeedbackEntry {
            feedback_id: format!("f-{}", minutes_ago),
            session_id: "s1".into(),
            message_content: "answer".into(),
            feedback_type: kind,
            agent_type: agent,
            answer_mode: mode,
            timestamp: at,
            message_length: 6,
            created_at: at,
        }
    }

    #[test]
    fn test_empty_analytics() {
        let analytics = FeedbackAnalytics::from_entries(&Vec::<FeedbackEntry>::new());
        assert_eq!(analytics.total_feedback, 0);
        assert_eq!(analytics.improvement_suggestions, vec!["No feedback data available yet."]);
    }

    #[test]
    fn test_all_positive_gets_praise() {
        let entries = vec![
            entry(AgentType::Coding, AnswerMode::Specific, FeedbackType::Positive, 1),
            entry(AgentType::General, AnswerMode::Detailed, FeedbackType::Positive, 2),
        ];
        let analytics = FeedbackAnalytics::from_entries(&entries);
        assert_eq!(analytics.feedback_by_agent["coding"], PolarityCounts { positive: 1, negative: 0 });
        assert_eq!(analytics.improvement_suggestions.len(), 1);
        assert!(analytics.improvement_suggestions[0].starts_with("Great job!"));
    }

    #[test]
    fn test_threshold_suggestions() {
        let entries = vec![
            entry(AgentType::Analytics, AnswerMode::Detailed, FeedbackType::Negative, 1),
            entry(AgentType::Analytics, AnswerMode::Detailed, FeedbackType::Negative, 2),
            entry(AgentType::Coding, AnswerMode::Specific, FeedbackType::Positive, 3),
        ];
        let analytics = FeedbackAnalytics::from_entries(&entries);
        let suggestions = &analytics.improvement_suggestions;
        assert!(suggestions.iter().any(|s| s.contains("below 70%")));
        assert!(suggestions.contains(&"Focus on improving analytics agent responses".to_string()));
        assert!(suggestions.contains(&"Improve detailed answer mode responses".to_string()));
        assert!(!suggestions.iter().any(|s| s.contains("coding")));
    }

    #[test]
    fn test_recent_feedback_newest_first_and_bounded() {
        let entries: Vec<FeedbackEntry> = (0..15)
            .map(|i| entry(AgentType::General, AnswerMode::Specific, FeedbackType::Positive, i))
            .collect();
        let analytics = FeedbackAnalytics::from_entries(&entries);
        assert_eq!(analytics.recent_feedback.len(), 10);
        assert_eq!(analytics.recent_feedback[0].feedback_id, "f-0");
    }

    #[test]
    fn test_negative_guidance_only_looks_at_recent_window() {
        let mut entries = vec![entry(AgentType::General, AnswerMode::Specific, FeedbackType::Negative, 10)];
        assert!(negative_feedback_guidance(&entries).is_some());

        for i in 0..5 {
            entries.push(entry(AgentType::General, AnswerMode::Specific, FeedbackType::Positive, i));
        }
        assert!(negative_feedback_guidance(&entries).is_none());
        assert!(negative_feedback_guidance(&[]).is_none());
    }
}
