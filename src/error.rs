use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("no connection factory was configured")]
    MissingConnectionFactory,
    #[error("session worker is no longer running")]
    WorkerGone,
}

pub type Result<T, E = MessagingError> = std::result::Result<T, E>;
