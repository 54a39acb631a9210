//! Safety policies for model-authored data queries and analysis scripts.
//!
//! Every read path in the system funnels through [`validate_read_statement`]:
//! the read tools, the custom-query tool, the escalation scriptwriter, and
//! the sandbox query bridge all apply the same rules. Script vetting is two
//! independent checks ([`check_script`]) that fail closed.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::SafetyViolation;

/// Hard row ceiling for dispatcher read tools.
pub const READ_ROW_CEILING: i64 = 100;
/// Row ceiling for escalation queries and the sandbox query bridge.
pub const ANALYSIS_ROW_CEILING: i64 = 1000;

/// Mutating-operation vocabulary. Matched case-insensitively as whole words
/// so legitimate column names like `created_at` are not rejected.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "create", "alter", "drop", "delete", "update", "insert", "exec", "execute", "grant",
    "revoke", "truncate", "attach", "detach", "pragma", "vacuum", "replace",
];

/// Script constructs that are rejected outright: dynamic code evaluation,
/// reflection/introspection, file primitives, and interpreter escape hatches.
const FORBIDDEN_SCRIPT_PATTERNS: &[&str] = &[
    r"\beval\s*\(",
    r"\bexec\s*\(",
    r"\bcompile\s*\(",
    r"\bglobals\s*\(",
    r"\blocals\s*\(",
    r"\bgetattr\s*\(",
    r"\bsetattr\s*\(",
    r"\bopen\s*\(",
    r"\bspawn\s*\(",
    r"\bsystem\s*\(",
    r"__import__",
    r"__builtins__",
    r"__class__",
    r"__subclasses__",
];

/// Modules a script may import: data manipulation and math/statistics only.
const ALLOWED_MODULES: &[&str] = &["math", "stats", "json", "datetime", "collections"];

/// Modules rejected by name before the allowlist even applies, so the error
/// message names the capability the script tried to reach.
const FORBIDDEN_MODULES: &[&str] = &[
    "os", "fs", "io", "net", "socket", "http", "process", "subprocess", "shell", "sys",
    "thread", "signal", "ffi", "env", "path",
];

fn keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives = FORBIDDEN_KEYWORDS.join("|");
        Regex::new(&format!(r"(?i)\b(?:{alternatives})\b")).expect("static keyword pattern")
    })
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // An import is a statement, not line-initial syntax, so the token must be
    // matched anywhere in the script. A string literal mentioning `import` may
    // trip this, which fails closed.
    RE.get_or_init(|| {
        Regex::new(r#"\bimport\s+"?([A-Za-z_][A-Za-z0-9_]*)"#).expect("static import pattern")
    })
}

/// Strip leading `-- comment` lines so a commented statement still validates.
fn first_statement(statement: &str) -> &str {
    let mut rest = statement.trim_start();
    while rest.starts_with("--") {
        rest = match rest.find('\n') {
            Some(index) => rest[index + 1..].trim_start(),
            None => "",
        };
    }
    rest
}

/// Validate that a data-query statement is read-only.
///
/// Rejects anything that does not start with SELECT and anything containing
/// a mutating-operation keyword, naming the offending token.
pub fn validate_read_statement(statement: &str) -> Result<(), SafetyViolation> {
    let body = first_statement(statement);
    if !body.get(..6).is_some_and(|head| head.eq_ignore_ascii_case("select")) {
        return Err(SafetyViolation::NotReadOnly);
    }

    if let Some(found) = keyword_regex().find(statement) {
        return Err(SafetyViolation::ForbiddenKeyword {
            keyword: found.as_str().to_ascii_uppercase(),
        });
    }

    Ok(())
}

/// Inject an explicit row ceiling when the statement carries none.
///
/// The caller never gets an unbounded statement past this point regardless of
/// what the model asked for.
pub fn enforce_row_ceiling(statement: &str, ceiling: i64) -> String {
    let has_limit = Regex::new(r"(?i)\blimit\b").expect("static limit pattern");
    if has_limit.is_match(statement) {
        statement.to_string()
    } else {
        format!("{} LIMIT {ceiling}", statement.trim_end().trim_end_matches(';'))
    }
}

/// Validate and bound a statement in one step; returns the executable text.
pub fn prepare_read_statement(statement: &str, ceiling: i64) -> Result<String, SafetyViolation> {
    validate_read_statement(statement)?;
    Ok(enforce_row_ceiling(statement, ceiling))
}

/// Gate for caller-supplied WHERE fragments on the counting tool.
///
/// Only simple comparison conditions are allowed; comments, statement
/// separators, and procedure prefixes are rejected.
pub fn validate_where_clause(clause: &str) -> Result<(), SafetyViolation> {
    for token in ["--", ";", "/*"] {
        if clause.contains(token) {
            return Err(SafetyViolation::UnsafeWhereClause { token: token.to_string() });
        }
    }
    if let Some(found) = keyword_regex().find(clause) {
        return Err(SafetyViolation::UnsafeWhereClause {
            token: found.as_str().to_ascii_uppercase(),
        });
    }
    Ok(())
}

/// Static vetting of an analysis script before it reaches the sandbox.
///
/// Two independent checks, either of which refuses execution: a fixed pattern
/// denylist, then a module allowlist over every `import` statement.
pub fn check_script(script: &str) -> Result<(), SafetyViolation> {
    for pattern in FORBIDDEN_SCRIPT_PATTERNS {
        let re = Regex::new(pattern).expect("static script pattern");
        if re.is_match(script) {
            return Err(SafetyViolation::ForbiddenPattern { pattern: (*pattern).to_string() });
        }
    }

    for capture in import_regex().captures_iter(script) {
        let module = &capture[1];
        if FORBIDDEN_MODULES.contains(&module) {
            return Err(SafetyViolation::ForbiddenModule { module: module.to_string() });
        }
        if !ALLOWED_MODULES.contains(&module) {
            return Err(SafetyViolation::ModuleNotAllowed {
                module: module.to_string(),
                allowed: ALLOWED_MODULES.join(", "),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        check_script, enforce_row_ceiling, prepare_read_statement, validate_read_statement,
        validate_where_clause,
    };
    use crate::errors::SafetyViolation;

    #[test]
    fn select_statement_passes() {
        assert!(validate_read_statement("SELECT id, name FROM partner").is_ok());
    }

    #[test]
    fn leading_comment_lines_are_skipped() {
        let statement = "-- top partners by order volume\nSELECT name FROM partner";
        assert!(validate_read_statement(statement).is_ok());
    }

    #[test]
    fn mutating_keyword_is_rejected_with_token() {
        let err = validate_read_statement("SELECT 1; DROP TABLE partner").unwrap_err();
        assert_eq!(err, SafetyViolation::ForbiddenKeyword { keyword: "DROP".to_string() });
    }

    #[test]
    fn keyword_inside_column_name_is_not_rejected() {
        // `created_at` contains "create" but not as a whole word.
        assert!(validate_read_statement("SELECT created_at FROM partner").is_ok());
        assert!(validate_read_statement("SELECT last_update_note FROM partner").is_ok());
    }

    #[test]
    fn non_select_is_rejected() {
        let err = validate_read_statement("WITH x AS (SELECT 1) SELECT * FROM x").unwrap_err();
        assert_eq!(err, SafetyViolation::NotReadOnly);
    }

    #[test]
    fn missing_limit_is_injected() {
        let bounded = enforce_row_ceiling("SELECT name FROM partner", 100);
        assert_eq!(bounded, "SELECT name FROM partner LIMIT 100");
    }

    #[test]
    fn existing_limit_is_preserved() {
        let bounded = enforce_row_ceiling("SELECT name FROM partner LIMIT 5", 100);
        assert_eq!(bounded, "SELECT name FROM partner LIMIT 5");
    }

    #[test]
    fn prepare_bounds_and_validates() {
        let prepared = prepare_read_statement("SELECT name FROM partner;", 1000).unwrap();
        assert_eq!(prepared, "SELECT name FROM partner LIMIT 1000");
        assert!(prepare_read_statement("DELETE FROM partner", 1000).is_err());
    }

    #[test]
    fn where_clause_rejects_separators_and_keywords() {
        assert!(validate_where_clause("status = 'active'").is_ok());
        assert!(validate_where_clause("1=1; DROP TABLE x").is_err());
        assert!(validate_where_clause("id = 1 -- comment").is_err());
    }

    #[test]
    fn script_denylist_catches_eval() {
        let err = check_script("let x = eval(\"1+1\"); x").unwrap_err();
        assert!(matches!(err, SafetyViolation::ForbiddenPattern { .. }));
    }

    #[test]
    fn forbidden_module_is_named_in_error() {
        let err = check_script("import \"socket\" as s;\nlet x = 1;").unwrap_err();
        assert_eq!(err.to_string(), "script imports a forbidden module: `socket`");
    }

    #[test]
    fn mid_line_import_is_still_vetted() {
        let err = check_script("let a = 1; import \"socket\" as s;\na").unwrap_err();
        assert_eq!(err, SafetyViolation::ForbiddenModule { module: "socket".to_string() });
    }

    #[test]
    fn unknown_module_fails_allowlist() {
        let err = check_script("import \"telemetry\" as t;").unwrap_err();
        assert!(matches!(err, SafetyViolation::ModuleNotAllowed { .. }));
    }

    #[test]
    fn allowlisted_module_passes() {
        assert!(check_script("import \"math\" as m;\nm::sqrt(4.0)").is_ok());
    }
}
