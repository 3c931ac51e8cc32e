//! Static gate applied to generated code before it reaches the sandbox.

use lazy_static::lazy_static;
use regex::Regex;

use super::error::AnalyticsError;

/// Modules generated analysis code has no business importing.
pub const BLOCKED_MODULES: &[&str] = &["os", "subprocess", "sys", "shutil", "socket", "requests"];

/// Builtins that reach outside the data namespace.
pub const BLOCKED_CALLS: &[&str] = &["open", "eval", "exec", "compile", "__import__"];

lazy_static! {
    static ref IMPORT_LINE: Regex = Regex::new(r"^\s*import\s+(.+)$").unwrap();
    static ref FROM_IMPORT_LINE: Regex = Regex::new(r"^\s*from\s+([\w.]+)\s+import\b").unwrap();
    // A bare call, not a method such as `df.eval(` or `re.compile(`.
    static ref BUILTIN_CALL: Regex =
        Regex::new(r"(?:^|[^\w.])(open|eval|exec|compile|__import__)\s*\(").unwrap();
}

/// Reject code that imports a blocked module or calls a blocked builtin.
pub fn check(code: &str) -> Result<(), AnalyticsError> {
    match find_violation(code) {
        Some(construct) => Err(AnalyticsError::ForbiddenConstruct {
            construct,
            code: code.to_string(),
        }),
        None => Ok(()),
    }
}

fn find_violation(code: &str) -> Option<String> {
    for line in code.lines() {
        let line = strip_comment(line);

        if let Some(caps) = FROM_IMPORT_LINE.captures(line) {
            let module = &caps[1];
            if is_blocked_module(module) {
                return Some(format!("from {} import", module));
            }
        } else if let Some(caps) = IMPORT_LINE.captures(line) {
            for item in caps[1].split(',') {
                let module = item.split_whitespace().next().unwrap_or("");
                if is_blocked_module(module) {
                    return Some(format!("import {}", module));
                }
            }
        }

        if let Some(caps) = BUILTIN_CALL.captures(line) {
            return Some(format!("{}(", &caps[1]));
        }
    }
    None
}

fn is_blocked_module(module: &str) -> bool {
    let root = module.split('.').next().unwrap_or(module);
    BLOCKED_MODULES.contains(&root)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) if !line[..idx].contains(['"', '\'']) => &line[..idx],
        _ => line,
    }
}
