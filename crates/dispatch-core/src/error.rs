use thiserror::Error;

/// The stable wire-level name for an error, so clients can branch on it
/// without parsing the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownJob,
    NoJobAvailable,
    EmptyCommand,
    CommandNotWhitelisted,
    InvalidId,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownJob => "unknown_job",
            ErrorKind::NoJobAvailable => "no_job_available",
            ErrorKind::EmptyCommand => "empty_command",
            ErrorKind::CommandNotWhitelisted => "command_not_whitelisted",
            ErrorKind::InvalidId => "invalid_id",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Errors produced by the dispatcher and the transport layer that sits on
/// top of it. Every variant maps to one `ErrorKind` for the wire.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no job with id {0}")]
    UnknownJob(dispatch_types::JobId),
    #[error("no job available")]
    NoJobAvailable,
    #[error("job command is empty")]
    EmptyCommand,
    #[error("command {0:?} is not in the worker whitelist")]
    CommandNotWhitelisted(String),
    #[error("{0} is not a valid id")]
    InvalidId(String),
    #[error("dispatcher is shutting down")]
    ShuttingDown,
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::UnknownJob(_) => ErrorKind::UnknownJob,
            DispatchError::NoJobAvailable => ErrorKind::NoJobAvailable,
            DispatchError::EmptyCommand => ErrorKind::EmptyCommand,
            DispatchError::CommandNotWhitelisted(_) => ErrorKind::CommandNotWhitelisted,
            DispatchError::InvalidId(_) => ErrorKind::InvalidId,
            DispatchError::ShuttingDown | DispatchError::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_match_wire_contract() {
        assert_eq!(ErrorKind::UnknownJob.as_str(), "unknown_job");
        assert_eq!(ErrorKind::NoJobAvailable.as_str(), "no_job_available");
        assert_eq!(ErrorKind::EmptyCommand.as_str(), "empty_command");
        assert_eq!(
            ErrorKind::CommandNotWhitelisted.as_str(),
            "command_not_whitelisted"
        );
        assert_eq!(ErrorKind::InvalidId.as_str(), "invalid_id");
        assert_eq!(ErrorKind::Internal.as_str(), "internal");
    }

    #[test]
    fn dispatch_error_maps_to_expected_kind() {
        assert_eq!(DispatchError::EmptyCommand.kind(), ErrorKind::EmptyCommand);
        assert_eq!(
            DispatchError::Internal("boom".into()).kind(),
            ErrorKind::Internal
        );
    }
}
