use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

/// Char-aware string operations.
pub struct TextUtils;

impl TextUtils {
    pub fn contains_ignore_case(text: &str, pattern: &str) -> bool {
        text.to_lowercase().contains(&pattern.to_lowercase())
    }

    /// Collapse whitespace runs into single spaces and trim.
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        if WHITESPACE_REGEX.is_match(text) {
            Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
        } else {
            Cow::Borrowed(text)
        }
    }

    /// First `max_chars` characters.
    pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    /// Text longer than `max_chars` becomes its first `max_chars - 3` chars plus "...".
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            Cow::Borrowed(text)
        } else if max_chars <= 3 {
            Cow::Borrowed("...")
        } else {
            Cow::Owned(format!("{}...", Self::truncate_chars(text, max_chars - 3)))
        }
    }

    /// Upper-case the first letter of every alphabetic run, lower-case the rest.
    pub fn title_case(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut in_word = false;
        for c in text.chars() {
            if c.is_alphabetic() {
                if in_word {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                in_word = true;
            } else {
                out.push(c);
                in_word = false;
            }
        }
        out
    }

    /// Strip `prefix` when it starts `text` as whole words, ignoring case.
    pub fn strip_word_prefix<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
        let head = text.get(..prefix.len())?;
        if !head.eq_ignore_ascii_case(prefix) {
            return None;
        }
        let rest = &text[prefix.len()..];
        match rest.chars().next() {
            Some(c) if c.is_alphanumeric() => None,
            _ => Some(rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',')),
        }
    }

    /// Remove every case-insensitive occurrence of `needle`.
    pub fn remove_ignore_case(text: &str, needle: &str) -> String {
        if needle.is_empty() {
            return text.to_string();
        }
        let pattern = format!("(?i){}", regex::escape(needle));
        match Regex::new(&pattern) {
            Ok(re) => re.replace_all(text, "").into_owned(),
            Err(_) => text.to_string(),
        }
    }
}
