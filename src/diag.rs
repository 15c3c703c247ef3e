//! Diagnostic collection for recoverable, user-facing conditions.
//!
//! Structural failures abort translation through [`crate::Error`]; everything
//! a *user* did wrong in the source program is instead reported here and
//! translation continues with a placeholder value. The canonical case is an
//! identifier that does not resolve to any declaration in scope.
//!
//! Each report is line-terminated when rendered, so a [`Diagnostics`] value
//! can be written directly to a terminal or log sink.

use std::fmt;

/// Severity of a single diagnostic report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The program is wrong, but translation continued with a placeholder.
    Error,
    /// The program is suspicious but well-formed.
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A single collected report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// How serious the condition is.
    pub severity: Severity,
    /// Human-readable description of the condition.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// An ordered collection of diagnostics produced during one lowering run.
///
/// # Examples
///
/// ```rust
/// use cfglower::diag::Diagnostics;
///
/// let mut diags = Diagnostics::new();
/// diags.warning("shadowed binding 'x'");
/// diags.error("unresolved identifier 'y'");
///
/// assert_eq!(diags.error_count(), 1);
/// assert_eq!(diags.warning_count(), 1);
/// let rendered = diags.to_string();
/// assert!(rendered.contains("error: unresolved identifier 'y'\n"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error-severity report.
    pub fn error(&mut self, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            message: message.into(),
        });
    }

    /// Records a warning-severity report.
    pub fn warning(&mut self, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
        });
    }

    /// Returns the number of error-severity reports.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Returns the number of warning-severity reports.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    /// Returns `true` if nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the collected reports in emission order.
    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }
}

impl fmt::Display for Diagnostics {
    /// Renders every report on its own line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}
