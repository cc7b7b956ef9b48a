//! NDI status and error handling.
//!
//! Converts the raw status codes returned by the hardware-programming layer
//! into Rust's Result type.

use std::fmt;
use thiserror::Error;

/// Status codes returned by the hardware-programming layer.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NdiStatus {
    Success = 0,
    Failure = -1,
    NotSupported = -2,
    NoMemory = -3,
    InsufficientResources = -4,
    InvalidParameter = -5,
    ItemAlreadyExists = -6,
    ItemNotFound = -7,
    TableFull = -8,
    ObjectInUse = -9,
    Uninitialized = -10,
}

impl NdiStatus {
    /// Creates an NdiStatus from a raw i32 value.
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => NdiStatus::Success,
            -2 => NdiStatus::NotSupported,
            -3 => NdiStatus::NoMemory,
            -4 => NdiStatus::InsufficientResources,
            -5 => NdiStatus::InvalidParameter,
            -6 => NdiStatus::ItemAlreadyExists,
            -7 => NdiStatus::ItemNotFound,
            -8 => NdiStatus::TableFull,
            -9 => NdiStatus::ObjectInUse,
            -10 => NdiStatus::Uninitialized,
            _ => NdiStatus::Failure,
        }
    }

    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        *self == NdiStatus::Success
    }

    /// Converts to a Result, returning Ok(()) for success.
    pub fn into_result(self) -> NdiResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(NdiError::from_status(self))
        }
    }
}

impl fmt::Display for NdiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NdiStatus::Success => "NDI_STATUS_SUCCESS",
            NdiStatus::Failure => "NDI_STATUS_FAILURE",
            NdiStatus::NotSupported => "NDI_STATUS_NOT_SUPPORTED",
            NdiStatus::NoMemory => "NDI_STATUS_NO_MEMORY",
            NdiStatus::InsufficientResources => "NDI_STATUS_INSUFFICIENT_RESOURCES",
            NdiStatus::InvalidParameter => "NDI_STATUS_INVALID_PARAMETER",
            NdiStatus::ItemAlreadyExists => "NDI_STATUS_ITEM_ALREADY_EXISTS",
            NdiStatus::ItemNotFound => "NDI_STATUS_ITEM_NOT_FOUND",
            NdiStatus::TableFull => "NDI_STATUS_TABLE_FULL",
            NdiStatus::ObjectInUse => "NDI_STATUS_OBJECT_IN_USE",
            NdiStatus::Uninitialized => "NDI_STATUS_UNINITIALIZED",
        };
        write!(f, "{}", s)
    }
}

/// Error type for NDI operations.
#[derive(Debug, Clone, Error)]
pub enum NdiError {
    /// The hardware layer returned an error status.
    #[error("NDI operation failed on chip {chip}: {status}")]
    Status { chip: u32, status: NdiStatus },

    /// The requested feature is not supported on this chip.
    #[error("Feature not supported: {feature}")]
    NotSupported { feature: String },

    /// The requested object was not found on the chip.
    #[error("Object not found: {object}")]
    NotFound { object: String },

    /// The hardware table is full.
    #[error("Table full: {table}")]
    TableFull { table: String },

    /// The object is still referenced in hardware.
    #[error("Object in use: {object}")]
    ObjectInUse { object: String },
}

impl NdiError {
    /// Creates an error from a status code without chip context.
    pub fn from_status(status: NdiStatus) -> Self {
        NdiError::Status { chip: 0, status }
    }

    /// Creates an error from a status code on a specific chip.
    pub fn on_chip(chip: u32, status: NdiStatus) -> Self {
        NdiError::Status { chip, status }
    }

    /// Creates a not supported error.
    pub fn not_supported(feature: impl Into<String>) -> Self {
        NdiError::NotSupported {
            feature: feature.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(object: impl Into<String>) -> Self {
        NdiError::NotFound {
            object: object.into(),
        }
    }

    /// Creates a table full error.
    pub fn table_full(table: impl Into<String>) -> Self {
        NdiError::TableFull {
            table: table.into(),
        }
    }

    /// Creates an object in use error.
    pub fn object_in_use(object: impl Into<String>) -> Self {
        NdiError::ObjectInUse {
            object: object.into(),
        }
    }
}

/// Result type for NDI operations.
pub type NdiResult<T> = Result<T, NdiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success() {
        assert!(NdiStatus::Success.is_success());
        assert!(NdiStatus::Success.into_result().is_ok());
    }

    #[test]
    fn test_status_failure() {
        assert!(!NdiStatus::TableFull.is_success());
        assert!(NdiStatus::TableFull.into_result().is_err());
    }

    #[test]
    fn test_status_from_raw() {
        assert_eq!(NdiStatus::from_raw(0), NdiStatus::Success);
        assert_eq!(NdiStatus::from_raw(-7), NdiStatus::ItemNotFound);
        assert_eq!(NdiStatus::from_raw(-999), NdiStatus::Failure);
    }

    #[test]
    fn test_error_on_chip() {
        let err = NdiError::on_chip(2, NdiStatus::TableFull);
        assert!(err.to_string().contains("chip 2"));
    }
}
