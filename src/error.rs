//! Per-request error taxonomy.
//!
//! A request task never escalates: every failure is logged and the task is
//! dropped, leaving the request to the other authorized nodes. The contract,
//! not this node, decides what success means for a request.

use thiserror::Error;

use crate::{message::SubmissionStatus, providers::ProviderError};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("node is not in the authorized set")]
    Unauthorized,
    #[error("request already handled elsewhere: {0}")]
    Stale(SubmissionStatus),
    #[error("request is not on chain")]
    RequestAbsent,
    #[error("prompt config {0} is not in the content store")]
    ConfigMissing(String),
    #[error("prompt config is invalid: {0}")]
    ConfigInvalid(String),
    #[error("neither the request nor its config name a platform and model")]
    ModelUnspecified,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("failed to submit result: {0:#}")]
    Submission(anyhow::Error),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Chain(#[from] anyhow::Error),
}
