use thiserror::Error;

use super::controller::SubmitState;
use super::field::FieldPath;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FormError {
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),

    #[error("invalid submit state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: SubmitState, to: SubmitState },

    #[error("form submit is already in progress")]
    AlreadySubmitting,

    #[error("field `{path}` is registered as `{registered}` but was accessed as `{requested}`")]
    FieldTypeMismatch {
        path: FieldPath,
        registered: &'static str,
        requested: &'static str,
    },

    #[error("field `{path}` holds a value that cannot be read as `{requested}`: {reason}")]
    ValueDecode {
        path: FieldPath,
        requested: &'static str,
        reason: String,
    },

    #[error("failed to encode value for field `{path}`: {reason}")]
    ValueEncode { path: FieldPath, reason: String },

    #[error("{} is used outside of any form; wrap it in a form context", consumer(.0))]
    NoEnclosingForm(Option<FieldPath>),

    #[error("step {index} is out of range ({count} steps defined)")]
    StepOutOfRange { index: usize, count: usize },

    #[error("submit handler failed: {0}")]
    SubmitFailed(String),

    #[error("failed to parse form options: {0}")]
    InvalidOptions(String),

    #[error("failed to convert persisted form state: {0}")]
    Persistence(String),
}

pub type FormResult<T> = Result<T, FormError>;

fn consumer(field: &Option<FieldPath>) -> String {
    match field {
        Some(path) => format!("field `{path}`"),
        None => "form context".to_owned(),
    }
}
