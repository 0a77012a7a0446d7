//! Error category classification

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};

/// Error category classification based on error code ranges
///
/// Categories are determined by the leading digit of the error code:
/// - 0xxx: General errors
/// - 1xxx: Discovery errors
/// - 2xxx: Printer / hardware errors
/// - 3xxx: Print job errors
/// - 4xxx: Sync channel errors
/// - 5xxx: Resilience errors
/// - 9xxx: System errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// General errors (0xxx)
    General,
    /// Discovery errors (1xxx)
    Discovery,
    /// Printer / hardware errors (2xxx)
    Printer,
    /// Print job errors (3xxx)
    Job,
    /// Sync channel errors (4xxx)
    Sync,
    /// Resilience errors (5xxx)
    Resilience,
    /// System errors (9xxx and anything unassigned)
    System,
}

impl ErrorCategory {
    /// Determine category from error code value
    pub fn from_code(code: u16) -> Self {
        match code {
            0..1000 => Self::General,
            1000..2000 => Self::Discovery,
            2000..3000 => Self::Printer,
            3000..4000 => Self::Job,
            4000..5000 => Self::Sync,
            5000..6000 => Self::Resilience,
            _ => Self::System,
        }
    }

    /// Get the string name for this category
    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Discovery => "discovery",
            Self::Printer => "printer",
            Self::Job => "job",
            Self::Sync => "sync",
            Self::Resilience => "resilience",
            Self::System => "system",
        }
    }
}

impl ErrorCode {
    /// Get the category for this error code
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_code() {
        assert_eq!(ErrorCategory::from_code(0), ErrorCategory::General);
        assert_eq!(ErrorCategory::from_code(999), ErrorCategory::General);
        assert_eq!(ErrorCategory::from_code(1001), ErrorCategory::Discovery);
        assert_eq!(ErrorCategory::from_code(2001), ErrorCategory::Printer);
        assert_eq!(ErrorCategory::from_code(3001), ErrorCategory::Job);
        assert_eq!(ErrorCategory::from_code(4001), ErrorCategory::Sync);
        assert_eq!(ErrorCategory::from_code(5001), ErrorCategory::Resilience);
        assert_eq!(ErrorCategory::from_code(7000), ErrorCategory::System);
        assert_eq!(ErrorCategory::from_code(9001), ErrorCategory::System);
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::Success.category(), ErrorCategory::General);
        assert_eq!(ErrorCode::DiscoveryFailed.category(), ErrorCategory::Discovery);
        assert_eq!(ErrorCode::PrinterOffline.category(), ErrorCategory::Printer);
        assert_eq!(ErrorCode::JobTimeout.category(), ErrorCategory::Job);
        assert_eq!(ErrorCode::SyncAuthFailed.category(), ErrorCategory::Sync);
        assert_eq!(ErrorCode::CircuitOpen.category(), ErrorCategory::Resilience);
        assert_eq!(ErrorCode::StorageError.category(), ErrorCategory::System);
    }

    #[test]
    fn test_category_serialize() {
        let json = serde_json::to_string(&ErrorCategory::Printer).unwrap();
        assert_eq!(json, "\"printer\"");

        let category: ErrorCategory = serde_json::from_str("\"resilience\"").unwrap();
        assert_eq!(category, ErrorCategory::Resilience);
    }
}
