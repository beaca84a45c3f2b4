use thiserror::Error;

use crate::analyzer::RegistryError;
use crate::app::builder::BuildError;
use crate::domain::{JobId, ValidationError};
use crate::ports::StoreError;
use crate::scheduler::ConfigError;

#[derive(Debug, Error)]
pub enum TrellisError {
    #[error("invalid job spec: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("job {0} is still active")]
    JobActive(JobId),

    #[error("job not found: {0}")]
    JobNotFound(JobId),
}
