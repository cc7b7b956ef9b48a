//! Control-plane error taxonomy.

use acl_common::{IdError, IntfError};
use acl_ndi::NdiError;
use thiserror::Error;

/// Errors surfaced by ACL control-plane operations.
#[derive(Debug, Error)]
pub enum AclError {
    #[error("Missing required attribute: {0}")]
    MissingKey(&'static str),

    #[error("Duplicate object: {0}")]
    Duplicate(String),

    #[error("Invalid attribute value: {0}")]
    InvalidValue(String),

    #[error("Attribute length mismatch: {0}")]
    LengthMismatch(String),

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    ResourceExhausted(IdError),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object in use: {0}")]
    InUse(String),

    #[error(transparent)]
    Ndi(#[from] NdiError),

    #[error(transparent)]
    Intf(#[from] IntfError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl From<IdError> for AclError {
    fn from(err: IdError) -> Self {
        match err {
            // A caller-chosen id that is taken, or out of the pool's
            // range, is the caller's mistake, not pool exhaustion.
            IdError::InUse(pool, id) => Self::Duplicate(format!("id {} in pool '{}'", id, pool)),
            IdError::OutOfRange(..) => Self::InvalidValue(err.to_string()),
            IdError::Exhausted(_) => Self::ResourceExhausted(err),
        }
    }
}

impl AclError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        Self::InvalidValue(what.into())
    }

    pub fn inconsistent(what: impl Into<String>) -> Self {
        Self::Inconsistent(what.into())
    }

    pub fn internal(what: impl Into<String>) -> Self {
        Self::Internal(what.into())
    }
}

/// Result alias for control-plane operations.
pub type AclResult<T> = Result<T, AclError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AclError::not_found("table 7");
        assert_eq!(err.to_string(), "Object not found: table 7");

        let err = AclError::Inconsistent("chip set too narrow".to_string());
        assert_eq!(
            err.to_string(),
            "Inconsistent configuration: chip set too narrow"
        );
    }

    #[test]
    fn test_id_error_maps_by_cause() {
        assert!(matches!(
            AclError::from(IdError::Exhausted("entry")),
            AclError::ResourceExhausted(_)
        ));
        assert!(matches!(
            AclError::from(IdError::InUse("entry", 7)),
            AclError::Duplicate(_)
        ));
        assert!(matches!(
            AclError::from(IdError::OutOfRange("entry", 99, 50)),
            AclError::InvalidValue(_)
        ));
    }

    #[test]
    fn test_ndi_error_converts() {
        fn fails() -> AclResult<()> {
            Err(NdiError::table_full("ingress pool"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(AclError::Ndi(_))));
    }
}
