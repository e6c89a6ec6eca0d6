use thiserror::Error;

pub const ERROR_TAG: &str = "\x1b[31m[ERROR]\x1b[0m";
pub const WARN_TAG: &str = "\x1b[33m[WARN]\x1b[0m";

/// Everything that can abort an in-flight evaluation. There is no
/// catch in the language: errors propagate to the caller of
/// `interpret`, the REPL prints them and resumes, batch mode exits
/// non-zero.
#[derive(Error, Debug, Clone)]
pub enum JexError {
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("name not found: {0}")]
    NameNotFound(String),

    #[error("unhandled redex: {0}")]
    UnhandledRedex(String),

    #[error("arity mismatch: {0}")]
    ArityMismatch(String),

    #[error("uninitialized value: {0}")]
    UninitializedValue(String),

    #[error("ambiguous value: {0}")]
    AmbiguousValue(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("match failure: {0}")]
    MatchFailure(String),

    #[error("staging violation: {0}")]
    StagingViolation(String),

    #[error("circular loading module {0:?}")]
    CircularLoading(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl JexError {
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        JexError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn name_not_found(name: impl Into<String>) -> Self {
        JexError::NameNotFound(name.into())
    }

    pub fn unhandled_redex(name: impl Into<String>) -> Self {
        JexError::UnhandledRedex(name.into())
    }

    pub fn arity(message: impl Into<String>) -> Self {
        JexError::ArityMismatch(message.into())
    }

    pub fn uninitialized(name: impl Into<String>) -> Self {
        JexError::UninitializedValue(name.into())
    }

    pub fn ambiguous(message: impl Into<String>) -> Self {
        JexError::AmbiguousValue(message.into())
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        JexError::Syntax(message.into())
    }

    pub fn match_failure(message: impl Into<String>) -> Self {
        JexError::MatchFailure(message.into())
    }

    pub fn staging(message: impl Into<String>) -> Self {
        JexError::StagingViolation(message.into())
    }

    pub fn circular_loading(module: impl Into<String>) -> Self {
        JexError::CircularLoading(module.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        JexError::Io(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        JexError::Internal(message.into())
    }
}

impl From<std::io::Error> for JexError {
    fn from(err: std::io::Error) -> Self {
        JexError::Io(err.to_string())
    }
}

/// Terminal rendering used by the REPL and the CLI.
pub fn format_error(err: &JexError) -> Vec<String> {
    vec![format!("{} {}", ERROR_TAG, err)]
}
