//! One-line event formatting shared by source clients and pipeline stages.
//!
//! Every user-facing event renders as `[STATUS] [SOURCE] message (k=v, ...)`
//! so logs stay greppable per source and per outcome. Records are emitted
//! through `tracing` so structured subscribers keep the fields.

use std::fmt::Write;

/// Visual status prefix for a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Fail,
    Skip,
    Warn,
}

impl Status {
    /// Returns the bracketed prefix for this status.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Ok => "[OK]",
            Self::Fail => "[FAIL]",
            Self::Skip => "[SKIP]",
            Self::Warn => "[WARN]",
        }
    }
}

/// Formats a source-tagged event line: `[OK] [PUBMED] fetched (pmid=123)`.
///
/// `context` pairs render in the given order; an empty slice omits the
/// parenthesized suffix entirely.
#[must_use]
pub fn event_line(status: Status, source: &str, message: &str, context: &[(&str, &str)]) -> String {
    let mut line = format!(
        "{} [{}] {message}",
        status.prefix(),
        source.to_ascii_uppercase()
    );
    if !context.is_empty() {
        let mut ctx = String::new();
        for (i, (k, v)) in context.iter().enumerate() {
            if i > 0 {
                ctx.push_str(", ");
            }
            // Writing to a String cannot fail.
            let _ = write!(ctx, "{k}={v}");
        }
        let _ = write!(line, " ({ctx})");
    }
    line
}

/// Logs a source event at the level implied by its status.
pub fn log_event(status: Status, source: &str, message: &str, context: &[(&str, &str)]) {
    let line = event_line(status, source, message, context);
    match status {
        Status::Ok => tracing::info!(target: "geolit::event", "{line}"),
        Status::Skip => tracing::debug!(target: "geolit::event", "{line}"),
        Status::Warn => tracing::warn!(target: "geolit::event", "{line}"),
        Status::Fail => tracing::error!(target: "geolit::event", "{line}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_line_with_context() {
        let line = event_line(
            Status::Ok,
            "pubmed",
            "citations fetched",
            &[("pmid", "25186741"), ("count", "12")],
        );
        assert_eq!(line, "[OK] [PUBMED] citations fetched (pmid=25186741, count=12)");
    }

    #[test]
    fn test_event_line_without_context() {
        let line = event_line(Status::Fail, "unpaywall", "no OA location", &[]);
        assert_eq!(line, "[FAIL] [UNPAYWALL] no OA location");
    }

    #[test]
    fn test_status_prefixes() {
        assert_eq!(Status::Ok.prefix(), "[OK]");
        assert_eq!(Status::Fail.prefix(), "[FAIL]");
        assert_eq!(Status::Skip.prefix(), "[SKIP]");
        assert_eq!(Status::Warn.prefix(), "[WARN]");
    }
}
