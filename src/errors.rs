use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single `set <option> <value>` call. The option set is left untouched.
#[derive(Error, Debug)]
pub enum OptionError {
    #[error("Option not found")]
    NotFound { name: String },

    #[error("{message}")]
    Invalid { name: String, message: String },

    #[error("cannot change this value")]
    ReadOnly { name: String },
}

impl OptionError {
    /// Option name as typed by the operator (upper-cased).
    pub fn name(&self) -> &str {
        match self {
            OptionError::NotFound { name }
            | OptionError::Invalid { name, .. }
            | OptionError::ReadOnly { name } => name,
        }
    }

    pub(crate) fn invalid(name: &str, message: impl Into<String>) -> Self {
        OptionError::Invalid {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ModuleError {
    // === configuration ===
    #[error("{name} not set")]
    MissingOption { name: String },

    /// The run could not be built (bad URL template, resolver init, HTTP client, ...).
    #[error("{0}")]
    Setup(String),

    // === results ===
    #[error("module {prompt} is still running")]
    Busy { prompt: String },

    #[error("no results to save")]
    NoResults,

    #[error("failed to write '{path}': {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode results: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ModuleError {
    pub(crate) fn setup(message: impl Into<String>) -> Self {
        ModuleError::Setup(message.into())
    }
}
