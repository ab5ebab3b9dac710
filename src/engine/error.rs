// Copyright © 2026 Pathway

use std::any::Any;
use std::error;
use std::result;

#[allow(clippy::module_name_repetitions)]
pub type DynError = Box<dyn error::Error + Send + Sync>;
pub type DynResult<T> = result::Result<T, DynError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to split the dataset into partitions: {0}")]
    Planning(#[source] DynError),

    #[error("partition {partition} failed: {source}")]
    PartitionFailed {
        partition: usize,
        #[source]
        source: DynError,
    },

    #[error("dataset cleanup failed: {0}")]
    Cleanup(#[source] DynError),

    #[error("worker panic: {0}")]
    WorkerPanic(String),

    #[error("failed to start the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub fn from_panic_payload(panic_payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = match panic_payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(panic_payload) => match panic_payload.downcast::<String>() {
                Ok(message) => *message,
                Err(panic_payload) => format!("{panic_payload:?}"),
            },
        };
        Self::WorkerPanic(message)
    }

    /// The error raised inside the failing partition, if this is a partition failure.
    pub fn partition_source(&self) -> Option<&(dyn error::Error + Send + Sync + 'static)> {
        match self {
            Self::PartitionFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;
