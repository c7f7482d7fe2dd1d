//! Client facade error types.

use mpe_signalr::SignalrError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("signalr error: {0}")]
    Signalr(#[from] SignalrError),
}

pub type ClientResult<T> = Result<T, ClientError>;
