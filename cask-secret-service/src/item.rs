//! D-Bus objects for `org.freedesktop.Secret.Item`.
//!
//! One `SecretItem` is exported per item object path — at item creation and,
//! for persisted items, at startup. The object carries no item state beyond
//! its own path: every property and method consults the store, so the
//! handlers all serve whatever rows currently back the path.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use zbus::object_server::SignalEmitter;
use zbus::{fdo, interface};
use zvariant::{ObjectPath, OwnedObjectPath};

use crate::collection::SecretCollection;
use crate::error::{to_fdo, Error};
use crate::session::Secret;
use crate::state::{null_path, object_path, ServiceState};

pub struct SecretItem {
    path: String,
    state: Arc<ServiceState>,
}

impl SecretItem {
    pub fn new(path: String, state: Arc<ServiceState>) -> Self {
        Self { path, state }
    }
}

#[interface(name = "org.freedesktop.Secret.Item")]
impl SecretItem {
    #[zbus(property)]
    fn attributes(&self) -> fdo::Result<HashMap<String, String>> {
        self.state.item_attributes(&self.path).map_err(to_fdo)
    }

    #[zbus(property)]
    fn set_attributes(&self, attributes: HashMap<String, String>) -> fdo::Result<()> {
        self.state
            .set_item_attributes(&self.path, &attributes)
            .map_err(to_fdo)
    }

    #[zbus(property)]
    fn label(&self) -> fdo::Result<String> {
        Ok(self.state.item_metadata(&self.path).map_err(to_fdo)?.label)
    }

    #[zbus(property)]
    fn set_label(&self, label: &str) -> fdo::Result<()> {
        self.state.set_item_label(&self.path, label).map_err(to_fdo)
    }

    #[zbus(property)]
    fn locked(&self) -> bool {
        false
    }

    #[zbus(property)]
    fn created(&self) -> fdo::Result<u64> {
        Ok(self.state.item_metadata(&self.path).map_err(to_fdo)?.created)
    }

    #[zbus(property)]
    fn modified(&self) -> fdo::Result<u64> {
        Ok(self.state.item_metadata(&self.path).map_err(to_fdo)?.modified)
    }

    /// Delete this item. Returns the null path — no prompt is ever needed.
    ///
    /// The object stays exported: item paths are never reused, and every
    /// later call against this path answers NoSuchObject from the store,
    /// the same way a search-miss path would under a fallback handler.
    async fn delete(
        &self,
        #[zbus(connection)] connection: &zbus::Connection,
    ) -> Result<OwnedObjectPath, Error> {
        let collection = self.state.delete_item(&self.path)?;
        emit_item_deleted(connection, &collection, &self.path).await;
        Ok(null_path())
    }

    /// Read the secret, sealed under the caller's session.
    fn get_secret(&self, session: ObjectPath<'_>) -> Result<Secret, Error> {
        Ok(self.state.get_secret(&self.path, session.as_str())?)
    }

    /// Replace the secret bytes and content type with the decrypted payload.
    async fn set_secret(
        &self,
        secret: Secret,
        #[zbus(connection)] connection: &zbus::Connection,
    ) -> Result<(), Error> {
        self.state.set_secret(&self.path, &secret)?;

        let collection = self.state.item_collection(&self.path)?;
        match object_path(&self.path) {
            Ok(item) => match SignalEmitter::new(connection, collection) {
                Ok(emitter) => {
                    if let Err(e) = SecretCollection::item_changed(&emitter, item).await {
                        warn!(item = %self.path, error = %e, "failed to emit ItemChanged");
                    }
                }
                Err(e) => warn!(item = %self.path, error = %e, "no emitter for ItemChanged"),
            },
            Err(e) => warn!(item = %self.path, error = %e, "unsignalable item path"),
        }
        Ok(())
    }
}

/// Emit `ItemDeleted` on the owning collection, logging rather than failing:
/// the deletion itself has already committed.
pub(crate) async fn emit_item_deleted(connection: &zbus::Connection, collection: &str, item: &str) {
    let Ok(item_path) = object_path(item) else {
        warn!(item, "unsignalable item path");
        return;
    };
    match SignalEmitter::new(connection, collection.to_string()) {
        Ok(emitter) => {
            if let Err(e) = SecretCollection::item_deleted(&emitter, item_path).await {
                warn!(item, error = %e, "failed to emit ItemDeleted");
            }
        }
        Err(e) => warn!(item, error = %e, "no emitter for ItemDeleted"),
    }
}
