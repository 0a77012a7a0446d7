//! Unified error codes for the print agent
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Discovery errors
//! - 2xxx: Printer / hardware errors
//! - 3xxx: Print job errors
//! - 4xxx: Sync channel / backend errors
//! - 5xxx: Resilience errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility with the backend and dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Invalid format
    InvalidFormat = 6,
    /// Required field missing
    RequiredField = 7,
    /// Value out of range
    ValueOutOfRange = 8,

    // ==================== 1xxx: Discovery ====================
    /// A discovery run failed as a whole
    DiscoveryFailed = 1001,
    /// Discovery is already running
    DiscoveryInProgress = 1002,
    /// Periodic discovery is stopped
    DiscoveryDisabled = 1003,
    /// Network range (CIDR) could not be parsed
    InvalidNetworkRange = 1004,
    /// Unknown discovery control action
    UnknownDiscoveryAction = 1005,

    // ==================== 2xxx: Printer / hardware ====================
    /// No printer matches the given id or name
    PrinterNotFound = 2001,
    /// Printer is offline or unreachable
    PrinterOffline = 2002,
    /// Printer is busy
    PrinterBusy = 2003,
    /// Printing failed on the device
    PrintFailed = 2004,
    /// USB device not present
    DeviceNotFound = 2005,
    /// Access to the device was denied by the OS
    DevicePermissionDenied = 2006,
    /// Print spool command could not be started
    SpoolUnavailable = 2007,

    // ==================== 3xxx: Print job ====================
    /// Job not found
    JobNotFound = 3001,
    /// Job exceeded its execution timeout
    JobTimeout = 3002,
    /// Job was rejected before queuing
    JobRejected = 3003,
    /// Job was cancelled (shutdown)
    JobCancelled = 3004,
    /// Job payload is malformed
    InvalidPayload = 3005,

    // ==================== 4xxx: Sync / backend ====================
    /// Sync channel is not connected
    SyncNotConnected = 4001,
    /// Backend rejected the agent credentials
    SyncAuthFailed = 4002,
    /// Bulk registration with the backend failed
    RegistrationFailed = 4003,
    /// Backend is unavailable
    BackendUnavailable = 4004,
    /// Unknown inbound event
    UnknownEvent = 4005,

    // ==================== 5xxx: Resilience ====================
    /// Circuit breaker is open
    CircuitOpen = 5001,
    /// Guarded operation timed out
    OperationTimeout = 5002,
    /// No pooled connection became available in time
    PoolExhausted = 5003,
    /// Too many requests from this client
    TooManyRequests = 5004,

    // ==================== 9xxx: System ====================
    /// Internal error
    InternalError = 9001,
    /// State storage error
    StorageError = 9002,
    /// Network error
    NetworkError = 9003,
    /// Timeout error
    TimeoutError = 9004,
    /// Configuration error
    ConfigError = 9005,
    /// Agent is shutting down
    ShuttingDown = 9006,
    /// System resources exhausted
    ResourceExhausted = 9007,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::RequiredField => "Required field is missing",
            ErrorCode::ValueOutOfRange => "Value is out of range",

            // Discovery
            ErrorCode::DiscoveryFailed => "Printer discovery failed",
            ErrorCode::DiscoveryInProgress => "Discovery is already running",
            ErrorCode::DiscoveryDisabled => "Periodic discovery is stopped",
            ErrorCode::InvalidNetworkRange => "Invalid network range",
            ErrorCode::UnknownDiscoveryAction => "Unknown discovery action",

            // Printer
            ErrorCode::PrinterNotFound => "Printer not found",
            ErrorCode::PrinterOffline => "Printer is offline",
            ErrorCode::PrinterBusy => "Printer is busy",
            ErrorCode::PrintFailed => "Print operation failed",
            ErrorCode::DeviceNotFound => "Device not found",
            ErrorCode::DevicePermissionDenied => "Access to the device was denied",
            ErrorCode::SpoolUnavailable => "Print spool is unavailable",

            // Job
            ErrorCode::JobNotFound => "Print job not found",
            ErrorCode::JobTimeout => "Print job timed out",
            ErrorCode::JobRejected => "Print job was rejected",
            ErrorCode::JobCancelled => "Print job was cancelled",
            ErrorCode::InvalidPayload => "Print payload is invalid",

            // Sync
            ErrorCode::SyncNotConnected => "Sync channel is not connected",
            ErrorCode::SyncAuthFailed => "Backend rejected agent credentials",
            ErrorCode::RegistrationFailed => "Printer registration failed",
            ErrorCode::BackendUnavailable => "Backend is unavailable",
            ErrorCode::UnknownEvent => "Unknown event",

            // Resilience
            ErrorCode::CircuitOpen => "Circuit breaker is open",
            ErrorCode::OperationTimeout => "Operation timed out",
            ErrorCode::PoolExhausted => "Connection pool exhausted",
            ErrorCode::TooManyRequests => "Too many requests, try again later",

            // System
            ErrorCode::InternalError => "Internal error",
            ErrorCode::StorageError => "State storage error",
            ErrorCode::NetworkError => "Network error",
            ErrorCode::TimeoutError => "Operation timed out",
            ErrorCode::ConfigError => "Configuration error",
            ErrorCode::ShuttingDown => "Agent is shutting down",
            ErrorCode::ResourceExhausted => "System resources exhausted",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::AlreadyExists),
            5 => Ok(ErrorCode::InvalidRequest),
            6 => Ok(ErrorCode::InvalidFormat),
            7 => Ok(ErrorCode::RequiredField),
            8 => Ok(ErrorCode::ValueOutOfRange),

            // Discovery
            1001 => Ok(ErrorCode::DiscoveryFailed),
            1002 => Ok(ErrorCode::DiscoveryInProgress),
            1003 => Ok(ErrorCode::DiscoveryDisabled),
            1004 => Ok(ErrorCode::InvalidNetworkRange),
            1005 => Ok(ErrorCode::UnknownDiscoveryAction),

            // Printer
            2001 => Ok(ErrorCode::PrinterNotFound),
            2002 => Ok(ErrorCode::PrinterOffline),
            2003 => Ok(ErrorCode::PrinterBusy),
            2004 => Ok(ErrorCode::PrintFailed),
            2005 => Ok(ErrorCode::DeviceNotFound),
            2006 => Ok(ErrorCode::DevicePermissionDenied),
            2007 => Ok(ErrorCode::SpoolUnavailable),

            // Job
            3001 => Ok(ErrorCode::JobNotFound),
            3002 => Ok(ErrorCode::JobTimeout),
            3003 => Ok(ErrorCode::JobRejected),
            3004 => Ok(ErrorCode::JobCancelled),
            3005 => Ok(ErrorCode::InvalidPayload),

            // Sync
            4001 => Ok(ErrorCode::SyncNotConnected),
            4002 => Ok(ErrorCode::SyncAuthFailed),
            4003 => Ok(ErrorCode::RegistrationFailed),
            4004 => Ok(ErrorCode::BackendUnavailable),
            4005 => Ok(ErrorCode::UnknownEvent),

            // Resilience
            5001 => Ok(ErrorCode::CircuitOpen),
            5002 => Ok(ErrorCode::OperationTimeout),
            5003 => Ok(ErrorCode::PoolExhausted),
            5004 => Ok(ErrorCode::TooManyRequests),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::StorageError),
            9003 => Ok(ErrorCode::NetworkError),
            9004 => Ok(ErrorCode::TimeoutError),
            9005 => Ok(ErrorCode::ConfigError),
            9006 => Ok(ErrorCode::ShuttingDown),
            9007 => Ok(ErrorCode::ResourceExhausted),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::ValidationFailed.code(), 2);
        assert_eq!(ErrorCode::DiscoveryFailed.code(), 1001);
        assert_eq!(ErrorCode::PrinterNotFound.code(), 2001);
        assert_eq!(ErrorCode::JobTimeout.code(), 3002);
        assert_eq!(ErrorCode::SyncNotConnected.code(), 4001);
        assert_eq!(ErrorCode::CircuitOpen.code(), 5001);
        assert_eq!(ErrorCode::TooManyRequests.code(), 5004);
        assert_eq!(ErrorCode::InternalError.code(), 9001);
    }

    #[test]
    fn test_try_from_u16() {
        assert_eq!(ErrorCode::try_from(2001), Ok(ErrorCode::PrinterNotFound));
        assert_eq!(ErrorCode::try_from(9006), Ok(ErrorCode::ShuttingDown));
        assert_eq!(ErrorCode::try_from(7777), Err(InvalidErrorCode(7777)));
    }

    #[test]
    fn test_serde_as_number() {
        let json = serde_json::to_string(&ErrorCode::PrintFailed).unwrap();
        assert_eq!(json, "2004");

        let code: ErrorCode = serde_json::from_str("3004").unwrap();
        assert_eq!(code, ErrorCode::JobCancelled);

        assert!(serde_json::from_str::<ErrorCode>("4242").is_err());
    }

    #[test]
    fn test_is_success() {
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::PrintFailed.is_success());
    }
}
