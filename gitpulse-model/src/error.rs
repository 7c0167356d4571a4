use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Repository identifier is not in `<owner>/<name>` form.
    InvalidRepository(String),
    /// Start date lies in the future.
    InvalidStartDate,
    /// A stored value could not be mapped back onto a model type.
    InvalidValue(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidRepository(name) => write!(
                f,
                "invalid repository name {name:?}: must be in <owner>/<name> format"
            ),
            ModelError::InvalidStartDate => {
                write!(f, "start date cannot be in the future")
            }
            ModelError::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
