//! Cohort error codes following a structured numbering system
//!
//! Error code ranges:
//! - COH0001-COH0099: Malformed expressions (structure, unknown tags, bad values)
//! - COH0100-COH0199: Unresolvable references
//! - COH0200-COH0299: Execution errors (runtime, retryable)
//! - COH0300-COH0399: Design warnings (the expression compiles but is suspicious)
//! - COH0400-COH0499: System errors (I/O, configuration)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Error code identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode(u16);

impl ErrorCode {
    /// Create a new error code
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Get the numeric code
    pub const fn code(&self) -> u16 {
        self.0
    }

    /// Get error information for this code
    pub fn info(&self) -> &'static ErrorInfo {
        ERROR_INFO.get(&self.0).unwrap_or(&UNKNOWN_ERROR)
    }

    /// Check if this is a malformed-expression error (0001-0099)
    pub const fn is_malformed_error(&self) -> bool {
        self.0 >= 1 && self.0 < 100
    }

    /// Check if this is an unresolved-reference error (0100-0199)
    pub const fn is_reference_error(&self) -> bool {
        self.0 >= 100 && self.0 < 200
    }

    /// Check if this is an execution error (0200-0299)
    pub const fn is_execution_error(&self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Check if this is a design warning (0300-0399)
    pub const fn is_design_warning(&self) -> bool {
        self.0 >= 300 && self.0 < 400
    }

    /// Check if this is a system error (0400-0499)
    pub const fn is_system_error(&self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// Compile-time errors are raised before any statement exists
    pub const fn is_compile_error(&self) -> bool {
        self.is_malformed_error() || self.is_reference_error()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COH{:04}", self.0)
    }
}

/// Information about an error code
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Short description of the error
    pub description: &'static str,
    /// Detailed help text
    pub help: Option<&'static str>,
}

impl ErrorInfo {
    const fn new(description: &'static str) -> Self {
        Self {
            description,
            help: None,
        }
    }

    const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

static UNKNOWN_ERROR: ErrorInfo = ErrorInfo::new("Unknown error");

static ERROR_INFO: LazyLock<HashMap<u16, ErrorInfo>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    // Malformed expressions (0001-0099)
    map.insert(1, ErrorInfo::new("Invalid JSON document"));
    map.insert(
        2,
        ErrorInfo::new("Unknown criteria type")
            .with_help("Criteria must be tagged with one supported domain, e.g. ConditionOccurrence"),
    );
    map.insert(
        3,
        ErrorInfo::new("Unknown filter type")
            .with_help("Filters must carry a supported \"type\", e.g. condition_era"),
    );
    map.insert(
        4,
        ErrorInfo::new("Invalid group count")
            .with_help("AT_LEAST and AT_MOST groups require a positive Count"),
    );
    map.insert(
        5,
        ErrorInfo::new("Empty operator")
            .with_help("Use at least one of eq, neq, gt, gte, lt, lte"),
    );
    map.insert(6, ErrorInfo::new("Concept set item without concept id"));
    map.insert(7, ErrorInfo::new("Invalid field value"));
    map.insert(8, ErrorInfo::new("Missing required field"));
    map.insert(9, ErrorInfo::new("Empty text operator"));
    map.insert(10, ErrorInfo::new("Invalid numeric range"));
    map.insert(11, ErrorInfo::new("Unsupported criteria type"));
    map.insert(12, ErrorInfo::new("Unrecognized expression grammar"));

    // Unresolved references (0100-0199)
    map.insert(
        100,
        ErrorInfo::new("Unknown concept set")
            .with_help("Add the concept set to ConceptSets or fix the CodesetId"),
    );
    map.insert(101, ErrorInfo::new("Duplicate concept set id"));

    // Execution errors (0200-0299)
    map.insert(200, ErrorInfo::new("Statement execution failed"));
    map.insert(201, ErrorInfo::new("Session unavailable"));
    map.insert(202, ErrorInfo::new("Execution timed out"));
    map.insert(203, ErrorInfo::new("Cleanup failed"));

    // Design warnings (0300-0399)
    map.insert(
        300,
        ErrorInfo::new("Unused concept set")
            .with_help("Reference the concept set from a criteria or remove it"),
    );
    map.insert(301, ErrorInfo::new("Empty concept set"));
    map.insert(302, ErrorInfo::new("Duplicate concept set"));
    map.insert(
        303,
        ErrorInfo::new("No exit criteria")
            .with_help("Add an EndStrategy, censoring criteria or limit the events per person"),
    );
    map.insert(304, ErrorInfo::new("Contradictory range"));
    map.insert(
        305,
        ErrorInfo::new("Inverted time window")
            .with_help("The window Start must not lie after its End"),
    );

    // System errors (0400-0499)
    map.insert(400, ErrorInfo::new("Internal error"));
    map.insert(401, ErrorInfo::new("I/O error"));
    map.insert(402, ErrorInfo::new("Configuration error"));
    map.insert(403, ErrorInfo::new("Invalid session id"));

    map
});

// Malformed expressions
pub const COH0001: ErrorCode = ErrorCode::new(1);
pub const COH0002: ErrorCode = ErrorCode::new(2);
pub const COH0003: ErrorCode = ErrorCode::new(3);
pub const COH0004: ErrorCode = ErrorCode::new(4);
pub const COH0005: ErrorCode = ErrorCode::new(5);
pub const COH0006: ErrorCode = ErrorCode::new(6);
pub const COH0007: ErrorCode = ErrorCode::new(7);
pub const COH0008: ErrorCode = ErrorCode::new(8);
pub const COH0009: ErrorCode = ErrorCode::new(9);
pub const COH0010: ErrorCode = ErrorCode::new(10);
pub const COH0011: ErrorCode = ErrorCode::new(11);
pub const COH0012: ErrorCode = ErrorCode::new(12);

// Unresolved references
pub const COH0100: ErrorCode = ErrorCode::new(100);
pub const COH0101: ErrorCode = ErrorCode::new(101);

// Execution errors
pub const COH0200: ErrorCode = ErrorCode::new(200);
pub const COH0201: ErrorCode = ErrorCode::new(201);
pub const COH0202: ErrorCode = ErrorCode::new(202);
pub const COH0203: ErrorCode = ErrorCode::new(203);

// Design warnings
pub const COH0300: ErrorCode = ErrorCode::new(300);
pub const COH0301: ErrorCode = ErrorCode::new(301);
pub const COH0302: ErrorCode = ErrorCode::new(302);
pub const COH0303: ErrorCode = ErrorCode::new(303);
pub const COH0304: ErrorCode = ErrorCode::new(304);
pub const COH0305: ErrorCode = ErrorCode::new(305);

// System errors
pub const COH0400: ErrorCode = ErrorCode::new(400);
pub const COH0401: ErrorCode = ErrorCode::new(401);
pub const COH0402: ErrorCode = ErrorCode::new(402);
pub const COH0403: ErrorCode = ErrorCode::new(403);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(COH0001.to_string(), "COH0001");
        assert_eq!(COH0100.to_string(), "COH0100");
    }

    #[test]
    fn test_error_categories() {
        assert!(COH0002.is_malformed_error());
        assert!(!COH0002.is_reference_error());
        assert!(COH0002.is_compile_error());

        assert!(COH0100.is_reference_error());
        assert!(COH0100.is_compile_error());

        assert!(COH0200.is_execution_error());
        assert!(!COH0200.is_compile_error());
        assert!(COH0402.is_system_error());

        assert!(COH0303.is_design_warning());
        assert!(!COH0303.is_compile_error());
    }

    #[test]
    fn test_error_info() {
        assert_eq!(COH0002.info().description, "Unknown criteria type");
        assert!(COH0004.info().help.is_some());
        assert_eq!(ErrorCode::new(999).info().description, "Unknown error");
    }
}
