//! Read-only SQL safety validation and placeholder accounting.
//!
//! All checks operate on the raw SQL string: whole-word keyword scanning
//! after uppercasing, a SELECT/WITH prefix requirement, and quote-aware
//! `?` placeholder counting. The quote-aware scanner is shared with the
//! Postgres driver's `?` → `$n` rewrite so both sides agree on what counts
//! as a placeholder.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::JsonValue;

use super::SqlGenError;

lazy_static! {
    /// Verbs that must never appear anywhere in generated SQL.
    static ref FORBIDDEN_KEYWORDS: HashSet<&'static str> = [
        "UPDATE", "DELETE", "DROP", "ALTER", "INSERT", "CREATE", "TRUNCATE",
        "REPLACE", "PRAGMA", "ATTACH", "DETACH",
    ]
    .into_iter()
    .collect();

    /// SQL word tokens (identifiers and keywords).
    static ref WORD: Regex = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("static regex");
}

/// Validate that `sql` is a read-only parameterized query matching `params`.
pub fn validate_sql(sql: &str, params: &[JsonValue]) -> Result<(), SqlGenError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(SqlGenError::Unsafe {
            message: "empty SQL".to_string(),
            sql: sql.to_string(),
        });
    }

    if !starts_read_only(trimmed) {
        return Err(SqlGenError::Unsafe {
            message: "query must begin with SELECT or WITH".to_string(),
            sql: sql.to_string(),
        });
    }

    if let Some(keyword) = find_forbidden_keyword(trimmed) {
        return Err(SqlGenError::Unsafe {
            message: format!("forbidden keyword {keyword}"),
            sql: sql.to_string(),
        });
    }

    let placeholders = count_placeholders(trimmed);
    if placeholders != params.len() {
        return Err(SqlGenError::ParamMismatch {
            placeholders,
            params: params.len(),
            sql: sql.to_string(),
        });
    }

    Ok(())
}

fn starts_read_only(trimmed: &str) -> bool {
    let upper = trimmed.to_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH")
}

/// Whole-word scan for forbidden verbs. `UPDATED_AT` or a table named
/// `updates` is fine; the bare word `UPDATE` is not.
fn find_forbidden_keyword(sql: &str) -> Option<String> {
    let upper = sql.to_uppercase();
    WORD.find_iter(&upper)
        .map(|m| m.as_str())
        .find(|word| FORBIDDEN_KEYWORDS.contains(word))
        .map(|word| word.to_string())
}

/// Count `?` placeholders outside string literals.
///
/// Single-quoted strings use `''` escaping; double quotes delimit
/// identifiers but are scanned the same way so a quoted `?` never counts.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    scan(sql, |token| {
        if matches!(token, ScanToken::Placeholder) {
            count += 1;
        }
    });
    count
}

/// Rewrite `?` placeholders to `$1..$n` positionals (Postgres wire format),
/// leaving quoted text untouched.
pub fn rewrite_placeholders_positional(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    scan(sql, |token| match token {
        ScanToken::Placeholder => {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        }
        ScanToken::Char(c) => out.push(c),
    });
    out
}

enum ScanToken {
    /// An unquoted `?`.
    Placeholder,
    /// Any other character, quotes included.
    Char(char),
}

/// Quote-aware scanner shared by the placeholder counter and the Postgres
/// positional rewrite.
fn scan(sql: &str, mut emit: impl FnMut(ScanToken)) {
    enum State {
        Normal,
        Single,
        Double,
    }

    let mut state = State::Normal;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                '?' => {
                    emit(ScanToken::Placeholder);
                    continue;
                }
                '\'' => state = State::Single,
                '"' => state = State::Double,
                _ => {}
            },
            State::Single => {
                if c == '\'' {
                    // Doubled quote is an escaped quote, still inside.
                    if chars.peek() == Some(&'\'') {
                        emit(ScanToken::Char(c));
                        emit(ScanToken::Char(chars.next().expect("peeked")));
                        continue;
                    }
                    state = State::Normal;
                }
            }
            State::Double => {
                if c == '"' {
                    state = State::Normal;
                }
            }
        }
        emit(ScanToken::Char(c));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_accepts_parameterized_select() {
        let params = vec![json!("active"), json!(10)];
        assert!(validate_sql(
            "SELECT id, name FROM users WHERE status = ? LIMIT ?",
            &params
        )
        .is_ok());
    }

    #[test]
    fn test_accepts_cte_queries() {
        assert!(validate_sql("WITH t AS (SELECT 1 AS x) SELECT x FROM t", &[]).is_ok());
    }

    #[test]
    fn test_rejects_non_select_statements() {
        let err = validate_sql("EXPLAIN SELECT 1", &[]).unwrap_err();
        assert!(matches!(err, SqlGenError::Unsafe { .. }));
    }

    #[test]
    fn test_rejects_every_forbidden_verb() {
        for keyword in [
            "UPDATE", "DELETE", "DROP", "ALTER", "INSERT", "CREATE", "TRUNCATE", "REPLACE",
            "PRAGMA", "ATTACH", "DETACH",
        ] {
            // Smuggled after a valid prefix, still caught.
            let sql = format!("SELECT 1; {keyword} TABLE users");
            let err = validate_sql(&sql, &[]).unwrap_err();
            assert!(matches!(err, SqlGenError::Unsafe { .. }), "{keyword} passed");
        }
    }

    #[test]
    fn test_whole_word_matching_does_not_reject_lookalikes() {
        assert!(validate_sql(
            "SELECT updated_at, created_by FROM updates WHERE dropped = ?",
            &[json!(false)]
        )
        .is_ok());
    }

    #[test]
    fn test_param_count_must_match_placeholders() {
        let err = validate_sql("SELECT * FROM users WHERE id = ?", &[]).unwrap_err();
        assert!(matches!(
            err,
            SqlGenError::ParamMismatch {
                placeholders: 1,
                params: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_quoted_question_marks_are_not_placeholders() {
        assert_eq!(
            count_placeholders("SELECT * FROM t WHERE a = '?' AND b = ? AND c = 'it''s ?'"),
            1
        );
        assert_eq!(count_placeholders(r#"SELECT "odd?col" FROM t WHERE x = ?"#), 1);
    }

    #[test]
    fn test_rewrite_produces_numbered_positionals() {
        assert_eq!(
            rewrite_placeholders_positional("SELECT * FROM t WHERE a = ? AND b = '?' AND c = ?"),
            "SELECT * FROM t WHERE a = $1 AND b = '?' AND c = $2"
        );
    }
}
