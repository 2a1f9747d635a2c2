//! Statement classification for automatic routing.

use std::collections::HashSet;

use crate::error::RouterError;

/// Verbs routed to the master pool unless configured otherwise.
pub const DEFAULT_MASTER_VERBS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "REPLACE", "TRUNCATE", "RENAME",
    "GRANT", "REVOKE", "LOCK",
];

/// Where a classified statement may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingHint {
    /// Data or schema mutation; master only.
    Master,
    /// Read; any pool.
    Any,
}

/// Maps a statement's leading verb to a [`RoutingHint`].
#[derive(Debug, Clone)]
pub struct StatementClassifier {
    master_verbs: HashSet<String>,
}

impl Default for StatementClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_MASTER_VERBS.iter().copied())
    }
}

impl StatementClassifier {
    /// Create a classifier routing `master_verbs` to the master pool.
    pub fn new<I, S>(master_verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            master_verbs: master_verbs
                .into_iter()
                .map(|v| v.as_ref().to_ascii_uppercase())
                .collect(),
        }
    }

    /// Classify a statement by its leading verb.
    ///
    /// Fails with [`RouterError::InvalidStatement`] when the text is empty or
    /// does not start with a word.
    pub fn classify(&self, sql: &str) -> Result<RoutingHint, RouterError> {
        let verb = leading_verb(sql).ok_or_else(|| {
            RouterError::InvalidStatement(if sql.trim().is_empty() {
                "statement is empty".to_string()
            } else {
                format!("no leading verb in {:?}", preview(sql))
            })
        })?;

        if self.master_verbs.contains(&verb.to_ascii_uppercase()) {
            Ok(RoutingHint::Master)
        } else {
            Ok(RoutingHint::Any)
        }
    }

    /// Check if `verb` is routed to the master pool.
    #[must_use]
    pub fn is_master_verb(&self, verb: &str) -> bool {
        self.master_verbs.contains(&verb.to_ascii_uppercase())
    }
}

/// Leading verb of a statement: the first run of ASCII letters after any
/// whitespace and opening parentheses.
#[must_use]
pub fn leading_verb(sql: &str) -> Option<&str> {
    let rest = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    if end == 0 { None } else { Some(&rest[..end]) }
}

fn preview(sql: &str) -> String {
    sql.trim().chars().take(16).collect()
}
