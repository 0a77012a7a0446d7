//! Unified error system for the print agent
//!
//! This module provides:
//! - [`ErrorCode`]: Standardized error codes for all error types
//! - [`ErrorCategory`]: Classification of errors by domain
//! - [`AppError`]: Rich error type with codes, messages, details and remediation hints
//! - [`ApiResponse`]: Unified API response format
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 1xxx: Discovery errors
//! - 2xxx: Printer / hardware errors
//! - 3xxx: Print job errors
//! - 4xxx: Sync channel / backend errors
//! - 5xxx: Resilience errors (breaker, pool, rate limit)
//! - 9xxx: System errors
//!
//! # Example
//!
//! ```
//! use shared::error::{AppError, ErrorCode, ApiResponse};
//!
//! let err = AppError::printer_not_found("kitchen-1")
//!     .with_suggestion("Run discovery again");
//! assert_eq!(err.code, ErrorCode::PrinterNotFound);
//!
//! let response = ApiResponse::<()>::error(&err);
//! assert!(!response.success);
//! ```

mod category;
mod codes;
mod http;
mod types;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
pub use types::{ApiResponse, AppError, AppResult};
