//! Engine error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::errors::{ResultStoreError, StoreError};
use crate::executor::{ExecutorError, ValidationError};

/// Errors from [`Engine`](super::Engine) operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// An executor error occurred, including request validation.
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),
    /// The suite store failed while resolving a suite.
    #[error("suite store error: {source}")]
    SuiteStore {
        #[source]
        source: StoreError,
    },
    /// A result store error occurred.
    #[error("result store error: {0}")]
    ResultStore(#[from] ResultStoreError),
    /// The engine configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// An error during engine construction.
    #[error("build error: {message}")]
    Build { message: String },
}

impl EngineError {
    /// The validation failure behind this error, if that is what it is.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Executor(ExecutorError::Validation(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        Self::Executor(e.into())
    }
}
