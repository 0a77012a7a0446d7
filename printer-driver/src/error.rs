//! Error types for the printer driver

use thiserror::Error;

/// Printer error types
#[derive(Debug, Error)]
pub enum PrintError {
    /// Network connection error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// IO error during printing
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Printer is offline or unreachable
    #[error("Printer offline: {0}")]
    Offline(String),

    /// Timeout waiting for printer
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid printer configuration
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Print command could not be started
    #[error("Failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// Print command exited non-zero; `stderr` is reported verbatim
    #[error("{}", command_failed_message(.code, .stderr))]
    CommandFailed { code: Option<i32>, stderr: String },
}

fn command_failed_message(code: &Option<i32>, stderr: &str) -> String {
    if stderr.is_empty() {
        format!("print command exited with {:?}", code)
    } else {
        stderr.to_string()
    }
}

/// Result type for printer operations
pub type PrintResult<T> = Result<T, PrintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_displays_stderr() {
        let err = PrintError::CommandFailed {
            code: Some(1),
            stderr: "lp: The printer or class does not exist.".into(),
        };
        assert_eq!(err.to_string(), "lp: The printer or class does not exist.");

        let err = PrintError::CommandFailed {
            code: Some(2),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "print command exited with Some(2)");
    }
}
