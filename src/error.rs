// ABOUTME: The four uniform error kinds (spec.md §7) plus the wire-frame shape
// every one of them converges to at the REPL eval boundary.

use thiserror::Error;

/// Line/column within a source string. 1-indexed, matching the teacher's
/// reader-facing error reporting style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Location { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderErrorKind {
    UnterminatedString,
    UnterminatedPipeEscape,
    UnbalancedBrackets,
    OddMapEntries,
    DuplicateSetElement,
    MalformedNumber,
    NullMapKey,
}

/// Syntactic error (spec.md §7). Fatal for the offending form, recoverable
/// by the caller for the next one — the reader never holds state across a
/// failed form beyond the shared symbol/keyword interner.
#[derive(Error, Debug, Clone)]
#[error("{kind:?} at {}:{}: {reason}", location.line, location.column)]
pub struct ReaderError {
    pub kind: ReaderErrorKind,
    pub location: Location,
    pub reason: String,
}

impl ReaderError {
    pub fn new(kind: ReaderErrorKind, location: Location, reason: impl Into<String>) -> Self {
        ReaderError {
            kind,
            location,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerErrorKind {
    ArityViolation,
    RecurOutOfTailPosition,
    UnknownSpecialFormShape,
    UnresolvedSymbol,
    MacroExpansionOverflow,
    InvalidBindingShape,
    AwaitOutsideAsync,
}

/// Semantic error (spec.md §7). Carries the textual form that triggered it.
#[derive(Error, Debug, Clone)]
#[error("{kind:?} in `{form}`: {reason}")]
pub struct AnalyzerError {
    pub kind: AnalyzerErrorKind,
    pub form: String,
    pub reason: String,
}

impl AnalyzerError {
    pub fn new(kind: AnalyzerErrorKind, form: impl Into<String>, reason: impl Into<String>) -> Self {
        AnalyzerError {
            kind,
            form: form.into(),
            reason: reason.into(),
        }
    }
}

/// Compile-host error (spec.md §7): raw host diagnostics, plus the driver's
/// rewrite of the synthetic "not-accessible" marker into a human message.
#[derive(Error, Debug, Clone)]
pub enum HostCompileError {
    #[error("host compiler reported {} diagnostic(s): {}", diagnostics.len(), diagnostics.join("; "))]
    Diagnostics { diagnostics: Vec<String> },

    #[error("type {type_name} is not accessible; require-as or import namespace {defining_ns} to use it")]
    NotAccessible {
        type_name: String,
        defining_ns: String,
    },
}

/// Runtime error (spec.md §7): uncaught exception from evaluated code, plus
/// the one engine-internal condition (`TransientMisuse`, spec.md §5) that
/// surfaces the same way since it too arises while running analyzed code.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("{message}")]
    Generic {
        message: String,
        exception_type: Option<String>,
    },

    #[error("transient misuse: {0}")]
    TransientMisuse(String),
}

impl RuntimeError {
    pub fn message(message: impl Into<String>) -> Self {
        RuntimeError::Generic {
            message: message.into(),
            exception_type: None,
        }
    }

    pub fn exception(message: impl Into<String>, exception_type: impl Into<String>) -> Self {
        RuntimeError::Generic {
            message: message.into(),
            exception_type: Some(exception_type.into()),
        }
    }

    pub fn transient_misuse(message: impl Into<String>) -> Self {
        RuntimeError::TransientMisuse(message.into())
    }

    pub fn exception_type_name(&self) -> Option<&str> {
        match self {
            RuntimeError::Generic { exception_type, .. } => exception_type.as_deref(),
            RuntimeError::TransientMisuse(_) => Some("TransientMisuse"),
        }
    }
}

/// Top-level error the driver catches at the eval boundary (spec.md §7:
/// "nothing crosses the session boundary as a native exception").
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    HostCompile(#[from] HostCompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("evaluation interrupted")]
    Interrupted,
    #[error("unknown op: {0}")]
    UnknownOp(String),
}

/// The uniform `{kind, message, location?}` frame every error kind converts
/// to before crossing the wire (spec.md §6, §7).
#[derive(Debug, Clone, serde::Serialize)]
pub struct WireFrame {
    pub kind: &'static str,
    pub message: String,
    pub location: Option<Location>,
}

impl DriverError {
    pub fn to_wire_frame(&self) -> WireFrame {
        match self {
            DriverError::Reader(e) => WireFrame {
                kind: "ReaderError",
                message: e.reason.clone(),
                location: Some(e.location),
            },
            DriverError::Analyzer(e) => WireFrame {
                kind: "AnalyzerError",
                message: format!("{}: {}", e.form, e.reason),
                location: None,
            },
            DriverError::HostCompile(HostCompileError::NotAccessible {
                type_name,
                defining_ns,
            }) => WireFrame {
                kind: "HostCompileError",
                message: format!(
                    "type {type_name} is not accessible; require-as or import namespace {defining_ns} to use it"
                ),
                location: None,
            },
            DriverError::HostCompile(e) => WireFrame {
                kind: "HostCompileError",
                message: e.to_string(),
                location: None,
            },
            DriverError::Runtime(e) => WireFrame {
                kind: "RuntimeError",
                message: e.to_string(),
                location: None,
            },
            DriverError::Interrupted => WireFrame {
                kind: "Interrupted",
                message: "evaluation interrupted".to_string(),
                location: None,
            },
            DriverError::UnknownOp(op) => WireFrame {
                kind: "UnknownOp",
                message: format!("unknown op: {op}"),
                location: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_accessible_rewrites_to_human_message() {
        let err = DriverError::HostCompile(HostCompileError::NotAccessible {
            type_name: "Point".to_string(),
            defining_ns: "my-app.core".to_string(),
        });
        let frame = err.to_wire_frame();
        assert!(frame.message.contains("my-app.core"));
        assert!(frame.message.contains("require-as or import"));
    }

    #[test]
    fn interrupted_is_its_own_kind() {
        let frame = DriverError::Interrupted.to_wire_frame();
        assert_eq!(frame.kind, "Interrupted");
    }
}
