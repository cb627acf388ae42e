//! Dispatch-boundary error conversion.
//!
//! Core operations return [`ServiceError`]; this module turns them into the
//! bus error names the protocol mandates. The `Secret.Error` namespace is
//! carried by [`Error`] itself, while the generic `org.freedesktop.DBus.Error`
//! names ride through the passthrough variant as `fdo` errors.

use zbus::fdo;

use cask_core::ServiceError;

/// Bus-facing error type for all Secret Service methods.
#[derive(zbus::DBusError, Debug)]
#[zbus(prefix = "org.freedesktop.Secret.Error")]
pub enum Error {
    #[zbus(error)]
    ZBus(zbus::Error),
    /// The referenced session path is not (or no longer) open.
    NoSession(String),
    /// The referenced item path has no backing rows.
    NoSuchObject(String),
    /// Reserved by the protocol; never raised here (all collections are
    /// permanently unlocked).
    IsLocked(String),
}

impl From<ServiceError> for Error {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NoSession(msg) => Error::NoSession(msg),
            ServiceError::NoSuchObject(msg) => Error::NoSuchObject(msg),
            ServiceError::NotSupported(msg) => fdo::Error::NotSupported(msg).into(),
            ServiceError::InvalidArgs(msg) => fdo::Error::InvalidArgs(msg).into(),
            ServiceError::Crypto(msg) | ServiceError::Storage(msg) => {
                fdo::Error::Failed(msg).into()
            }
        }
    }
}

impl From<fdo::Error> for Error {
    fn from(err: fdo::Error) -> Self {
        Error::ZBus(zbus::Error::FDO(Box::new(err)))
    }
}

/// Property getters and setters dispatch through
/// `org.freedesktop.DBus.Properties`, whose errors are `fdo::Error`; render
/// the unknown-referent case as `UnknownObject` there.
pub(crate) fn to_fdo(err: ServiceError) -> fdo::Error {
    match err {
        ServiceError::NoSuchObject(msg) => fdo::Error::UnknownObject(msg),
        ServiceError::NoSession(msg) => fdo::Error::Failed(format!("no such session: {msg}")),
        ServiceError::NotSupported(msg) => fdo::Error::NotSupported(msg),
        ServiceError::InvalidArgs(msg) => fdo::Error::InvalidArgs(msg),
        ServiceError::Crypto(msg) | ServiceError::Storage(msg) => fdo::Error::Failed(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_namespace_errors_keep_their_variant() {
        let err: Error = ServiceError::NoSession("/s/0".to_string()).into();
        assert!(matches!(err, Error::NoSession(_)));
        let err: Error = ServiceError::NoSuchObject("/i/0".to_string()).into();
        assert!(matches!(err, Error::NoSuchObject(_)));
    }

    #[test]
    fn dbus_namespace_errors_pass_through_fdo() {
        let err: Error = ServiceError::NotSupported("lock".to_string()).into();
        match err {
            Error::ZBus(zbus::Error::FDO(inner)) => {
                assert!(matches!(*inner, fdo::Error::NotSupported(_)));
            }
            other => panic!("expected FDO passthrough, got {other:?}"),
        }
    }

    #[test]
    fn property_errors_render_missing_items_as_unknown_object() {
        let err = to_fdo(ServiceError::NoSuchObject("/i/9".to_string()));
        assert!(matches!(err, fdo::Error::UnknownObject(_)));
    }
}
