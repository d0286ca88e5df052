//! Cohort error types

use crate::{COH0200, COH0400, ErrorCode, NodePath, SourceLocation};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Compilation or execution cannot proceed
    Error,
    /// Suspicious but compilable
    Warning,
    /// Informational message
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A diagnostic message with location and context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: ErrorCode,
    pub message: String,
    /// Node inside the expression tree
    pub path: Option<NodePath>,
    /// Position inside the source document
    pub location: Option<SourceLocation>,
    pub help: Option<String>,
}

impl Diagnostic {
    /// Create a new error diagnostic
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            path: None,
            location: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic
    pub fn warning(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message)
        }
    }

    pub fn with_path(mut self, path: NodePath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Render with terminal colors
    #[cfg(feature = "colored")]
    pub fn to_colored_string(&self) -> String {
        use colored::Colorize;

        let severity = match self.severity {
            Severity::Error => self.severity.to_string().red().bold(),
            Severity::Warning => self.severity.to_string().yellow().bold(),
            Severity::Info => self.severity.to_string().blue().bold(),
        };
        let mut out = format!("{}[{}]: {}", severity, self.code, self.message);
        if let Some(path) = &self.path {
            out.push_str(&format!("\n  {} {}", "-->".blue(), path));
        }
        if let Some(loc) = &self.location {
            out.push_str(&format!("\n  {} line {}", "at".blue(), loc));
        }
        if let Some(help) = self.help.as_deref().or(self.code.info().help) {
            out.push_str(&format!("\n  {} {}", "help:".green(), help));
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} - {}", self.severity, self.code, self.message)?;
        if let Some(path) = &self.path {
            write!(f, " at {}", path)?;
        }
        if let Some(loc) = &self.location {
            write!(f, " ({})", loc)?;
        }
        Ok(())
    }
}

/// Main cohort error type
#[derive(Debug, Clone, Error)]
pub enum CohortError {
    /// The expression is structurally or semantically invalid
    #[error("{code}: {message} at {path}")]
    Malformed {
        code: ErrorCode,
        message: String,
        path: NodePath,
        location: Option<SourceLocation>,
        context: Option<String>,
    },

    /// The expression references something it does not define
    #[error("{code}: {message} at {path}")]
    UnresolvedReference {
        code: ErrorCode,
        message: String,
        path: NodePath,
        context: Option<String>,
    },

    /// Compile options are unusable
    #[error("{code}: {message}")]
    Options {
        code: ErrorCode,
        message: String,
    },

    /// A compiled plan failed while running against a session
    #[error("{code}: {message}")]
    Execution {
        code: ErrorCode,
        message: String,
        /// Label of the statement that failed, if any
        statement: Option<String>,
        /// Cleanup ran to completion before the error surfaced
        cleaned_up: bool,
    },

    /// I/O or internal failure
    #[error("{code}: {message}")]
    System {
        code: ErrorCode,
        message: String,
        context: Option<String>,
    },

    /// Multiple errors collected
    #[error("Multiple errors: {}", .0.len())]
    Multiple(Vec<CohortError>),
}

impl CohortError {
    /// Create a malformed-expression error
    pub fn malformed(code: ErrorCode, message: impl Into<String>, path: NodePath) -> Self {
        Self::Malformed {
            code,
            message: message.into(),
            path,
            location: None,
            context: None,
        }
    }

    /// Create a malformed-expression error with a document position
    pub fn malformed_at(
        code: ErrorCode,
        message: impl Into<String>,
        path: NodePath,
        location: SourceLocation,
    ) -> Self {
        Self::Malformed {
            code,
            message: message.into(),
            path,
            location: Some(location),
            context: None,
        }
    }

    /// Create an unresolved-reference error
    pub fn unresolved(code: ErrorCode, message: impl Into<String>, path: NodePath) -> Self {
        Self::UnresolvedReference {
            code,
            message: message.into(),
            path,
            context: None,
        }
    }

    pub fn options(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Options {
            code,
            message: message.into(),
        }
    }

    /// Create an execution error
    pub fn execution(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            statement: None,
            cleaned_up: false,
        }
    }

    /// Create a system error
    pub fn system(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::System {
            code,
            message: message.into(),
            context: None,
        }
    }

    /// Collapse a list of errors, returning `Ok` when it is empty
    pub fn collect(mut errors: Vec<CohortError>) -> Result<(), CohortError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed { code, .. } => *code,
            Self::UnresolvedReference { code, .. } => *code,
            Self::Options { code, .. } => *code,
            Self::Execution { code, .. } => *code,
            Self::System { code, .. } => *code,
            Self::Multiple(errors) => errors.first().map(|e| e.code()).unwrap_or(COH0400),
        }
    }

    /// Node path of the offending expression node, if known
    pub fn path(&self) -> Option<&NodePath> {
        match self {
            Self::Malformed { path, .. } => Some(path),
            Self::UnresolvedReference { path, .. } => Some(path),
            Self::Multiple(errors) => errors.first().and_then(|e| e.path()),
            _ => None,
        }
    }

    /// Raised by compilation, before any statement was emitted
    pub fn is_compile_error(&self) -> bool {
        match self {
            Self::Malformed { .. } | Self::UnresolvedReference { .. } | Self::Options { .. } => {
                true
            }
            Self::Multiple(errors) => errors.iter().all(|e| e.is_compile_error()),
            _ => false,
        }
    }

    /// Execution errors may be retried by rerunning the whole plan; compile errors never
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }

    /// Flattened list of the individual errors
    pub fn errors(&self) -> Vec<&CohortError> {
        match self {
            Self::Multiple(errors) => errors.iter().flat_map(|e| e.errors()).collect(),
            other => vec![other],
        }
    }

    /// Convert to a diagnostic
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Malformed {
                code,
                message,
                path,
                location,
                context,
            } => {
                let mut diag = Diagnostic::error(*code, message.clone()).with_path(path.clone());
                if let Some(loc) = location {
                    diag = diag.with_location(*loc);
                }
                if let Some(ctx) = context {
                    diag = diag.with_help(ctx.clone());
                }
                diag
            }
            Self::UnresolvedReference {
                code,
                message,
                path,
                context,
            } => {
                let mut diag = Diagnostic::error(*code, message.clone()).with_path(path.clone());
                if let Some(ctx) = context {
                    diag = diag.with_help(ctx.clone());
                }
                diag
            }
            Self::Options { code, message } => Diagnostic::error(*code, message.clone()),
            Self::Execution {
                code,
                message,
                statement,
                ..
            } => {
                let mut diag = Diagnostic::error(*code, message.clone());
                if let Some(stmt) = statement {
                    diag = diag.with_help(format!("while running statement '{stmt}'"));
                }
                diag
            }
            Self::System {
                code,
                message,
                context,
            } => {
                let mut diag = Diagnostic::error(*code, message.clone());
                if let Some(ctx) = context {
                    diag = diag.with_help(ctx.clone());
                }
                diag
            }
            Self::Multiple(errors) => match errors.first() {
                Some(first) => first.to_diagnostic(),
                None => Diagnostic::error(COH0400, "Unknown error"),
            },
        }
    }
}

/// Builder for creating cohort errors with fluent API
pub struct ErrorBuilder {
    code: ErrorCode,
    message: String,
    path: NodePath,
    location: Option<SourceLocation>,
    context: Option<String>,
}

impl ErrorBuilder {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: NodePath::root(),
            location: None,
            context: None,
        }
    }

    pub fn path(mut self, path: NodePath) -> Self {
        self.path = path;
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn malformed(self) -> CohortError {
        CohortError::Malformed {
            code: self.code,
            message: self.message,
            path: self.path,
            location: self.location,
            context: self.context,
        }
    }

    pub fn unresolved(self) -> CohortError {
        CohortError::UnresolvedReference {
            code: self.code,
            message: self.message,
            path: self.path,
            context: self.context,
        }
    }

    /// Build an execution error; `context` becomes the failing statement label
    pub fn execution(self) -> CohortError {
        CohortError::Execution {
            code: self.code,
            message: self.message,
            statement: self.context,
            cleaned_up: false,
        }
    }
}

impl Default for ErrorBuilder {
    fn default() -> Self {
        Self::new(COH0200, "Statement execution failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{COH0002, COH0004, COH0100};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_builder() {
        let path = NodePath::root().field("AdditionalCriteria").field("Count");
        let err = ErrorBuilder::new(COH0004, "AT_LEAST requires a positive count")
            .path(path.clone())
            .context("Count was 0")
            .malformed();

        assert!(matches!(err, CohortError::Malformed { .. }));
        assert_eq!(err.code(), COH0004);
        assert_eq!(err.path(), Some(&path));
        assert!(err.is_compile_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_includes_path() {
        let err = CohortError::unresolved(
            COH0100,
            "Concept set 7 is not defined",
            NodePath::root().field("PrimaryCriteria").field("CriteriaList").index(0),
        );
        assert_eq!(
            err.to_string(),
            "COH0100: Concept set 7 is not defined at PrimaryCriteria.CriteriaList[0]"
        );
    }

    #[test]
    fn test_execution_is_retryable() {
        let err = ErrorBuilder::default().context("populate codesets").execution();
        assert!(err.is_retryable());
        assert!(!err.is_compile_error());
        let diag = err.to_diagnostic();
        assert_eq!(
            diag.help.as_deref(),
            Some("while running statement 'populate codesets'")
        );
    }

    #[test]
    fn test_collect() {
        assert!(CohortError::collect(vec![]).is_ok());

        let one = CohortError::malformed(COH0002, "bad", NodePath::root());
        assert!(matches!(
            CohortError::collect(vec![one.clone()]),
            Err(CohortError::Malformed { .. })
        ));

        let err = CohortError::collect(vec![one.clone(), one]).unwrap_err();
        assert_eq!(err.errors().len(), 2);
        assert!(err.is_compile_error());
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::error(COH0002, "Unknown criteria type 'Foo'")
            .with_path(NodePath::root().field("PrimaryCriteria"))
            .with_location(SourceLocation::new(3, 5));

        let text = diag.to_string();
        assert!(text.contains("COH0002"));
        assert!(text.contains("PrimaryCriteria"));
        assert!(text.contains("3:5"));
    }
}
