//! Diagnostic collection and the checkpoint barrier
//!
//! Stages report positioned diagnostics here instead of failing fast, so a
//! single run surfaces every problem the stage can find. The driver places
//! a checkpoint before each stage and refuses to advance the pipeline when
//! the stage left new diagnostics behind.
//!
//! Fatal internal errors (malformed AST shapes, unreachable code paths) are
//! not diagnostics; they panic and terminate the process.

use crate::ast::SourceRange;

/// One user-facing problem, tagged with the pipeline section that found it
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub message: String,
    pub range: Option<SourceRange>,
    pub section: Option<String>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(section) = &self.section {
            write!(f, "[{}] ", section)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(range) = &self.range {
            write!(f, " (at {})", range)?;
        }
        Ok(())
    }
}

/// Marks a point in the backlog; used to ask "anything new since?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Collects diagnostics across the whole compilation
#[derive(Debug, Default)]
pub struct Reporter {
    diagnostics: Vec<Diagnostic>,
    section: Option<String>,
}

impl Reporter {
    pub fn new() -> Self {
        Reporter::default()
    }

    /// Label applied to subsequent reports, e.g. "parse" or "type check"
    pub fn section(&mut self, name: &str) {
        self.section = Some(name.to_string());
    }

    /// Append a diagnostic under the current section
    pub fn report(&mut self, message: impl Into<String>, range: Option<SourceRange>) {
        self.diagnostics.push(Diagnostic {
            message: message.into(),
            range,
            section: self.section.clone(),
        });
    }

    /// Take a checkpoint of the current backlog length
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.diagnostics.len())
    }

    /// True when no diagnostics were added since the checkpoint was taken
    pub fn clean_since(&self, checkpoint: Checkpoint) -> bool {
        self.diagnostics.len() == checkpoint.0
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Position, SourceRange};

    #[test]
    fn test_checkpoint_clean_when_nothing_reported() {
        let mut reporter = Reporter::new();
        reporter.report("before", None);
        let cp = reporter.checkpoint();
        assert!(reporter.clean_since(cp));
    }

    #[test]
    fn test_checkpoint_dirty_after_report() {
        let mut reporter = Reporter::new();
        let cp = reporter.checkpoint();
        reporter.report("boom", None);
        assert!(!reporter.clean_since(cp));
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn test_section_labels_reports() {
        let mut reporter = Reporter::new();
        reporter.report("unlabelled", None);
        reporter.section("type check");
        reporter.report("labelled", None);

        assert_eq!(reporter.diagnostics()[0].section, None);
        assert_eq!(
            reporter.diagnostics()[1].section.as_deref(),
            Some("type check")
        );
    }

    #[test]
    fn test_display_includes_section_and_range() {
        let mut reporter = Reporter::new();
        reporter.section("parse");
        let range = SourceRange::new(Position::new(2, 4), Position::new(2, 9));
        reporter.report("unexpected token", Some(range));

        let rendered = reporter.diagnostics()[0].to_string();
        assert_eq!(rendered, "[parse] unexpected token (at 3:5-3:10)");
    }
}
