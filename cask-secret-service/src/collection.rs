//! D-Bus object for `org.freedesktop.Secret.Collection`.
//!
//! The default collection is exported twice — at its canonical path and at
//! `/org/freedesktop/secrets/aliases/default` — both instances sharing the
//! same canonical `path`, so item membership and search behave identically
//! through either.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use zbus::object_server::SignalEmitter;
use zbus::{fdo, interface, ObjectServer};
use zvariant::{OwnedObjectPath, Value};

use cask_core::{Attributes, ServiceError};

use crate::error::{to_fdo, Error};
use crate::item::{emit_item_deleted, SecretItem};
use crate::session::Secret;
use crate::state::{null_path, object_path, ServiceState};

/// Key of the label entry in `CreateItem` properties.
const ITEM_LABEL: &str = "org.freedesktop.Secret.Item.Label";

/// Key of the attributes entry in `CreateItem` properties.
const ITEM_ATTRIBUTES: &str = "org.freedesktop.Secret.Item.Attributes";

pub struct SecretCollection {
    /// Canonical collection path (also used when serving the alias path).
    path: String,
    state: Arc<ServiceState>,
}

impl SecretCollection {
    pub fn new(path: String, state: Arc<ServiceState>) -> Self {
        Self { path, state }
    }
}

#[interface(name = "org.freedesktop.Secret.Collection")]
impl SecretCollection {
    #[zbus(property)]
    fn items(&self) -> fdo::Result<Vec<OwnedObjectPath>> {
        let items = self.state.collection_items(&self.path).map_err(to_fdo)?;
        to_object_paths(items).map_err(to_fdo)
    }

    #[zbus(property)]
    fn label(&self) -> fdo::Result<String> {
        self.state.collection_label(&self.path).map_err(to_fdo)
    }

    #[zbus(property)]
    fn set_label(&self, label: &str) -> fdo::Result<()> {
        self.state
            .set_collection_label(&self.path, label)
            .map_err(to_fdo)
    }

    #[zbus(property)]
    fn locked(&self) -> bool {
        false
    }

    #[zbus(property)]
    fn created(&self) -> u64 {
        0
    }

    #[zbus(property)]
    fn modified(&self) -> u64 {
        0
    }

    /// Store a new secret in this collection.
    ///
    /// The client's label and attribute map arrive in `properties`; the
    /// collection and schema attributes are stamped on before persisting.
    /// With `replace`, existing items whose attribute set equals the new
    /// one are deleted first.
    async fn create_item(
        &self,
        properties: HashMap<String, Value<'_>>,
        secret: Secret,
        replace: bool,
        #[zbus(object_server)] server: &ObjectServer,
        #[zbus(connection)] connection: &zbus::Connection,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> Result<(OwnedObjectPath, OwnedObjectPath), Error> {
        let label = properties
            .get(ITEM_LABEL)
            .and_then(|v| v.downcast_ref::<String>().ok())
            .unwrap_or_else(|| "Untitled".to_string());
        let attributes = properties
            .get(ITEM_ATTRIBUTES)
            .and_then(extract_attributes_dict)
            .unwrap_or_default();

        let created = self
            .state
            .create_item(&self.path, &label, attributes, &secret, replace)?;

        for replaced in &created.replaced {
            emit_item_deleted(connection, &self.path, replaced).await;
        }

        let item_path = object_path(&created.path)?;
        server
            .at(
                item_path.clone(),
                SecretItem::new(created.path.clone(), Arc::clone(&self.state)),
            )
            .await?;

        if let Err(e) = Self::item_created(&emitter, item_path.clone()).await {
            warn!(item = %created.path, error = %e, "failed to emit ItemCreated");
        }

        Ok((item_path, null_path()))
    }

    /// Items of this collection matching all given attribute pairs.
    fn search_items(
        &self,
        attributes: HashMap<String, String>,
    ) -> Result<Vec<OwnedObjectPath>, Error> {
        let matches = self.state.search_collection(&self.path, &attributes)?;
        Ok(to_object_paths(matches)?)
    }

    /// Collections cannot be deleted — there is only the default one.
    fn delete(&self) -> Result<OwnedObjectPath, Error> {
        Err(ServiceError::NotSupported("cannot delete the default collection".to_string()).into())
    }

    #[zbus(signal)]
    pub async fn item_created(
        emitter: &SignalEmitter<'_>,
        item: OwnedObjectPath,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn item_changed(
        emitter: &SignalEmitter<'_>,
        item: OwnedObjectPath,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn item_deleted(
        emitter: &SignalEmitter<'_>,
        item: OwnedObjectPath,
    ) -> zbus::Result<()>;
}

fn to_object_paths(paths: Vec<String>) -> Result<Vec<OwnedObjectPath>, ServiceError> {
    paths.iter().map(|p| object_path(p)).collect()
}

/// Pull a `{string: string}` map out of a variant-wrapped dict.
fn extract_attributes_dict(value: &Value<'_>) -> Option<Attributes> {
    let dict = value.downcast_ref::<zvariant::Dict>().ok()?;
    let mut result = Attributes::new();
    for (k, v) in dict.iter() {
        if let (Ok(key), Ok(val)) = (k.downcast_ref::<String>(), v.downcast_ref::<String>()) {
            result.insert(key, val);
        }
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_dict_extraction() {
        let map: HashMap<&str, &str> = HashMap::from([("app", "x"), ("user", "root")]);
        let value = Value::from(map);

        let attrs = extract_attributes_dict(&value).unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.get("app").map(String::as_str), Some("x"));
        assert_eq!(attrs.get("user").map(String::as_str), Some("root"));
    }

    #[test]
    fn non_dict_value_yields_none() {
        assert!(extract_attributes_dict(&Value::from(7u32)).is_none());
    }
}
