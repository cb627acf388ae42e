//! D-Bus root object `org.freedesktop.Secret.Service`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use zbus::message::Header;
use zbus::{fdo, interface, ObjectServer};
use zvariant::{ObjectPath, OwnedObjectPath, Value};

use cask_core::ServiceError;

use crate::crypto::ALGORITHM_DH;
use crate::error::{to_fdo, Error};
use crate::session::Secret;
use crate::session_iface::SecretSession;
use crate::state::{null_path, object_path, ServiceState};

/// Log the D-Bus caller at debug level for a given method name.
fn log_caller(method: &str, header: &Header<'_>) {
    let sender = header.sender().map(|s| s.as_str()).unwrap_or("<unknown>");
    debug!(method, sender, "D-Bus call");
}

pub struct SecretService {
    state: Arc<ServiceState>,
}

impl SecretService {
    pub fn new(state: Arc<ServiceState>) -> Self {
        Self { state }
    }
}

#[interface(name = "org.freedesktop.Secret.Service")]
impl SecretService {
    #[zbus(property)]
    fn collections(&self) -> fdo::Result<Vec<OwnedObjectPath>> {
        self.state
            .collections()
            .and_then(|paths| paths.iter().map(|p| object_path(p)).collect())
            .map_err(to_fdo)
    }

    /// Negotiate a session and export its object.
    ///
    /// Both supported algorithms complete in a single round, so the session
    /// path is always returned directly; the null-path "incomplete" case of
    /// the protocol is unreachable here.
    async fn open_session(
        &self,
        algorithm: &str,
        input: Value<'_>,
        #[zbus(header)] header: Header<'_>,
        #[zbus(object_server)] server: &ObjectServer,
    ) -> Result<(Value<'static>, OwnedObjectPath), Error> {
        log_caller("OpenSession", &header);

        let input_bytes = if algorithm == ALGORITHM_DH {
            value_to_bytes(&input)?
        } else {
            Vec::new()
        };
        let owner = header.sender().map(|s| s.to_string());
        let (output, path) = self
            .state
            .open_session(algorithm, &input_bytes, owner.as_deref())?;

        let session_path = object_path(&path)?;
        server
            .at(
                session_path.clone(),
                SecretSession::new(path, Arc::clone(&self.state)),
            )
            .await?;

        let output = if algorithm == ALGORITHM_DH {
            Value::from(output)
        } else {
            Value::from("")
        };
        Ok((output, session_path))
    }

    /// Only the default collection exists; creating it again returns it.
    fn create_collection(
        &self,
        _properties: HashMap<String, Value<'_>>,
        alias: &str,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(OwnedObjectPath, OwnedObjectPath), Error> {
        log_caller("CreateCollection", &header);
        let path = self.state.create_collection(alias)?;
        Ok((object_path(&path)?, null_path()))
    }

    /// Service-wide attribute search. Everything is unlocked, so the locked
    /// partition is always empty.
    fn search_items(
        &self,
        attributes: HashMap<String, String>,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(Vec<OwnedObjectPath>, Vec<OwnedObjectPath>), Error> {
        log_caller("SearchItems", &header);
        let matches = self.state.search_all(&attributes)?;
        let unlocked = matches
            .iter()
            .map(|p| object_path(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((unlocked, Vec::new()))
    }

    /// Nothing is ever locked: echo the paths back, no prompt.
    fn unlock(
        &self,
        objects: Vec<OwnedObjectPath>,
        #[zbus(header)] header: Header<'_>,
    ) -> (Vec<OwnedObjectPath>, OwnedObjectPath) {
        log_caller("Unlock", &header);
        (objects, null_path())
    }

    fn lock(
        &self,
        _objects: Vec<OwnedObjectPath>,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(Vec<OwnedObjectPath>, OwnedObjectPath), Error> {
        log_caller("Lock", &header);
        Err(ServiceError::NotSupported("locking is not supported".to_string()).into())
    }

    /// Batch secret read under one session.
    fn get_secrets(
        &self,
        items: Vec<OwnedObjectPath>,
        session: ObjectPath<'_>,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<HashMap<OwnedObjectPath, Secret>, Error> {
        log_caller("GetSecrets", &header);
        Ok(self.state.get_secrets(&items, session.as_str())?)
    }

    fn read_alias(
        &self,
        name: &str,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<OwnedObjectPath, Error> {
        log_caller("ReadAlias", &header);
        match self.state.read_alias(name)? {
            Some(path) => Ok(object_path(&path)?),
            None => Ok(null_path()),
        }
    }

    fn set_alias(
        &self,
        _name: &str,
        _collection: ObjectPath<'_>,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(), Error> {
        log_caller("SetAlias", &header);
        Err(ServiceError::NotSupported("aliases are fixed".to_string()).into())
    }
}

/// Pull raw bytes out of a variant-wrapped byte array.
fn value_to_bytes(value: &Value<'_>) -> Result<Vec<u8>, ServiceError> {
    let array = value.downcast_ref::<zvariant::Array>().map_err(|_| {
        ServiceError::InvalidArgs("key-exchange input is not a byte array".to_string())
    })?;
    array
        .iter()
        .map(|v| v.downcast_ref::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| ServiceError::InvalidArgs("key-exchange input is not a byte array".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_array_values_convert() {
        let value = Value::from(vec![1u8, 2, 3]);
        assert_eq!(value_to_bytes(&value).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn non_array_values_are_invalid_args() {
        let value = Value::from("not bytes");
        assert!(matches!(
            value_to_bytes(&value),
            Err(ServiceError::InvalidArgs(_))
        ));
    }
}
