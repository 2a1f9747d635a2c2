//! Tracing span and field names.
//!
//! The router emits events through `tracing`; install any subscriber to
//! collect them. Statements are never logged in full, only their leading
//! verb and a bounded preview.

/// Span names for router operations.
pub mod span_names {
    /// Span covering one routed call, including retries.
    pub const EXECUTE: &str = "router.execute";
    /// Span covering router construction.
    pub const CONNECT: &str = "router.connect";
}

/// Default length of statement previews in log events.
pub const DEFAULT_PREVIEW_LEN: usize = 64;

/// Bounded single-line preview of a statement for log events.
#[must_use]
pub fn statement_preview(sql: &str, max_len: usize) -> String {
    let mut preview = String::with_capacity(max_len.min(sql.len()));
    let mut last_space = true;
    for c in sql.trim().chars() {
        if preview.chars().count() >= max_len {
            preview.push_str("...");
            break;
        }
        if c.is_whitespace() {
            if !last_space {
                preview.push(' ');
            }
            last_space = true;
        } else {
            preview.push(c);
            last_space = false;
        }
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_collapses_whitespace() {
        assert_eq!(
            statement_preview("  SELECT *\n\tFROM   t  ", DEFAULT_PREVIEW_LEN),
            "SELECT * FROM t"
        );
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(statement_preview("UPDATE t SET x = 1", 6), "UPDATE...");
        assert_eq!(statement_preview("", 6), "");
    }
}
