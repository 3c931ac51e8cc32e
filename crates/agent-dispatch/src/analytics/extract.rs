//! Tolerant extraction of generated code and prose from a model reply.

use lazy_static::lazy_static;
use regex::Regex;

pub const NO_SUMMARY: &str = "No summary provided.";

lazy_static! {
    static ref PYTHON_FENCE: Regex = Regex::new(r"(?s)```[ \t]*python[ \t]*\r?\n?(.*?)```").unwrap();
    static ref ANY_FENCE: Regex = Regex::new(r"(?s)```[\w+#.-]*[ \t]*\r?\n?(.*?)```").unwrap();
    static ref LEADING_FENCE: Regex = Regex::new(r"(?im)^```(?:python)?[ \t]*$").unwrap();
    static ref TRAILING_FENCE: Regex = Regex::new(r"(?m)^```[ \t]*$").unwrap();
    // Statement-level `name = """...` spanning at least one newline.
    static ref TRIPLE_QUOTED_ASSIGN_PARENS: Regex =
        Regex::new(r#"(?ms)^([ \t]*\w+[ \t]*=[ \t]*(?:"""|''')[^\n]*\n.*?(?:"""|'''))\)+"#).unwrap();
    static ref RELOAD_CALL: Regex =
        Regex::new(r"(?m)^[ \t]*df\s*=\s*pd\.read_\w+\(.*?\)[ \t]*$\n?").unwrap();
    static ref SHOW_CALL: Regex = Regex::new(r"(?m)^[ \t]*\w+\.show\(\s*\)[ \t]*$\n?").unwrap();
    static ref INLINE_FIG_SHOW: Regex = Regex::new(r"\bfig\.show\(\)").unwrap();
    static ref SUMMARY_LABEL: Regex = Regex::new(r"(?s)Summary:\s*(.*)").unwrap();
    static ref AFTER_FENCE: Regex = Regex::new(r"(?s)```(?:python)?.*?```\s*(.+)").unwrap();
}

/// Body of the first fenced block, preferring a `python` tag over any other fence.
pub fn fenced_block(reply: &str) -> Option<String> {
    PYTHON_FENCE
        .captures(reply)
        .or_else(|| ANY_FENCE.captures(reply))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Normalize a raw code block: leftover fences, a stray leading `python`
/// token, parentheses trailing a triple-quoted assignment and unbalanced
/// lines holding only `)`.
pub fn clean_code(raw: &str) -> String {
    let mut code = LEADING_FENCE.replace_all(raw.trim(), "").to_string();
    code = TRAILING_FENCE.replace_all(&code, "").to_string();

    let mut code = code.trim_start_matches('`').trim_start().to_string();
    if let Some(rest) = code.strip_prefix("python") {
        if rest.starts_with(char::is_whitespace) || rest.is_empty() {
            code = rest.trim_start().to_string();
        }
    }

    let code = strip_parens_after_string_assignments(&code);
    drop_unbalanced_close_lines(&code).trim().to_string()
}

/// Remove `df = pd.read_*(...)` re-loads and interactive `.show()` calls.
pub fn strip_forbidden_calls(code: &str) -> String {
    let code = RELOAD_CALL.replace_all(code, "");
    let code = SHOW_CALL.replace_all(&code, "");
    INLINE_FIG_SHOW.replace_all(&code, "").trim().to_string()
}

/// Full pipeline for a synthesizer reply: fence, cleanup, forbidden calls.
pub fn extract_code(reply: &str) -> String {
    let raw = fenced_block(reply).unwrap_or_default();
    strip_forbidden_calls(&clean_code(&raw))
}

/// Plot replies label their prose with `Summary:`.
pub fn plot_summary(reply: &str) -> String {
    let tail = AFTER_FENCE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply);

    SUMMARY_LABEL
        .captures(tail)
        .or_else(|| SUMMARY_LABEL.captures(reply))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| NO_SUMMARY.to_string())
}

/// Narrative replies put their sentence after the closing fence.
pub fn narrative_summary(reply: &str) -> String {
    AFTER_FENCE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .map(|s| s.strip_prefix("Summary:").unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| NO_SUMMARY.to_string())
}

/// Drop `)` runs glued to a multi-line string assignment, unless an
/// enclosing call is still open at that point and the parens close it.
fn strip_parens_after_string_assignments(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut last = 0;

    for caps in TRIPLE_QUOTED_ASSIGN_PARENS.captures_iter(code) {
        let (whole, assignment) = match (caps.get(0), caps.get(1)) {
            (Some(whole), Some(assignment)) => (whole, assignment),
            _ => continue,
        };
        out.push_str(&code[last..whole.start()]);
        if open_depth(&code[..whole.start()]) > 0 {
            out.push_str(whole.as_str());
        } else {
            out.push_str(assignment.as_str());
        }
        last = whole.end();
    }
    out.push_str(&code[last..]);
    out
}

fn open_depth(prefix: &str) -> i64 {
    let mut scanner = StringScanner::default();
    prefix
        .lines()
        .fold(0, |depth, line| (depth + scanner.paren_delta(line)).max(0))
}

fn drop_unbalanced_close_lines(code: &str) -> String {
    let mut depth: i64 = 0;
    let mut scanner = StringScanner::default();
    let mut kept = Vec::new();

    for line in code.lines() {
        if line.trim() == ")" && depth == 0 && !scanner.in_string() {
            continue;
        }
        depth = (depth + scanner.paren_delta(line)).max(0);
        kept.push(line);
    }
    kept.join("\n")
}

/// Line-by-line paren counter that skips string literals and comments.
#[derive(Default)]
struct StringScanner {
    open_triple: Option<&'static str>,
}

impl StringScanner {
    fn in_string(&self) -> bool {
        self.open_triple.is_some()
    }

    fn paren_delta(&mut self, line: &str) -> i64 {
        let mut delta = 0;
        let mut rest = line;

        while !rest.is_empty() {
            if let Some(quote) = self.open_triple {
                match rest.find(quote) {
                    Some(end) => {
                        rest = &rest[end + 3..];
                        self.open_triple = None;
                    }
                    None => return delta,
                }
                continue;
            }

            let ch = match rest.chars().next() {
                Some(c) => c,
                None => break,
            };
            if rest.starts_with("\"\"\"") || rest.starts_with("'''") {
                self.open_triple = Some(if ch == '"' { "\"\"\"" } else { "'''" });
                rest = &rest[3..];
                continue;
            }
            match ch {
                '#' => return delta,
                '"' | '\'' => {
                    rest = skip_short_string(&rest[1..], ch);
                    continue;
                }
                '(' | '[' | '{' => delta += 1,
                ')' | ']' | '}' => delta -= 1,
                _ => {}
            }
            rest = &rest[ch.len_utf8()..];
        }
        delta
    }
}

fn skip_short_string(rest: &str, quote: char) -> &str {
    let mut escaped = false;
    for (i, c) in rest.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return &rest[i + c.len_utf8()..];
        }
    }
    ""
}
