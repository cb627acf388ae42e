//! Process-wide service state.
//!
//! `ServiceState` owns the store, the session registry, the object-path
//! allocator, and the alias/collection caches. Every D-Bus object holds an
//! `Arc<ServiceState>` and delegates here; the methods in this module are
//! bus-free and return `ServiceError`, which the interface layer converts to
//! wire errors at the dispatch boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;
use zvariant::OwnedObjectPath;

use cask_core::{Attributes, ServiceError, ATTR_COLLECTION, ATTR_SCHEMA, GENERIC_SCHEMA};

use crate::crypto::{negotiate, SessionCipher};
use crate::session::{Secret, SessionManager};
use crate::store::{ItemMetadata, Store};

pub const SERVICE_PATH: &str = "/org/freedesktop/secrets";
pub const DEFAULT_COLLECTION_PATH: &str = "/org/freedesktop/secrets/collection/default";
pub const DEFAULT_ALIAS_PATH: &str = "/org/freedesktop/secrets/aliases/default";
pub const DEFAULT_ALIAS: &str = "default";
pub const DEFAULT_COLLECTION_LABEL: &str = "Default";

/// Result of `create_item`: the new item's path and any items the `replace`
/// flag displaced.
#[derive(Debug)]
pub struct CreatedItem {
    pub path: String,
    pub replaced: Vec<String>,
}

pub struct ServiceState {
    pub store: Store,
    pub sessions: SessionManager,
    /// Single monotonic allocator for item and session paths. Seeded above
    /// the highest persisted item suffix so restarts never reuse a path that
    /// still has rows behind it.
    object_counter: AtomicU64,
    /// alias → collection object path.
    aliases: Mutex<HashMap<String, String>>,
    /// Collection object paths in registration order.
    collections: Mutex<Vec<String>>,
    /// collection object path → label (in-memory only).
    collection_labels: Mutex<HashMap<String, String>>,
}

impl ServiceState {
    /// Build the state and ensure the default collection is registered.
    pub fn new(store: Store) -> Result<Self, ServiceError> {
        let seed = store
            .all_items()?
            .iter()
            .filter_map(|path| item_suffix(path))
            .max()
            .map(|n| n + 1)
            .unwrap_or(0);

        let state = Self {
            store,
            sessions: SessionManager::new(),
            object_counter: AtomicU64::new(seed),
            aliases: Mutex::new(HashMap::new()),
            collections: Mutex::new(Vec::new()),
            collection_labels: Mutex::new(HashMap::new()),
        };
        state.register_collection(
            DEFAULT_COLLECTION_PATH,
            DEFAULT_ALIAS,
            DEFAULT_COLLECTION_LABEL,
        )?;
        Ok(state)
    }

    fn register_collection(
        &self,
        path: &str,
        alias: &str,
        label: &str,
    ) -> Result<(), ServiceError> {
        lock(&self.aliases)?.insert(alias.to_string(), path.to_string());
        lock(&self.collections)?.push(path.to_string());
        lock(&self.collection_labels)?.insert(path.to_string(), label.to_string());
        Ok(())
    }

    // -----------------------------------------------------------------
    // Object paths
    // -----------------------------------------------------------------

    fn next_object(&self) -> u64 {
        self.object_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn allocate_item_path(&self) -> String {
        format!("{SERVICE_PATH}/item/i{}", self.next_object())
    }

    pub fn allocate_session_path(&self) -> String {
        format!("{SERVICE_PATH}/session/s{}", self.next_object())
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    /// Negotiate a session and register it under a fresh path.
    ///
    /// Returns the key-exchange output (our DH public value; empty for
    /// `plain`) and the session path. A refused algorithm allocates nothing.
    pub fn open_session(
        &self,
        algorithm: &str,
        input: &[u8],
        owner: Option<&str>,
    ) -> Result<(Vec<u8>, String), ServiceError> {
        let negotiated = negotiate(algorithm, input)?;
        let path = self.allocate_session_path();
        self.sessions.insert(&path, negotiated.cipher, owner)?;
        debug!(session = %path, algorithm, "session opened");
        Ok((negotiated.output, path))
    }

    /// Drop every session owned by a vanished peer; returns their paths so
    /// the caller can unexport the objects.
    pub fn gc_client(&self, peer: &str) -> Result<Vec<String>, ServiceError> {
        let dropped = self.sessions.gc_client(peer)?;
        if !dropped.is_empty() {
            debug!(peer, count = dropped.len(), "collected sessions for departed peer");
        }
        Ok(dropped)
    }

    // -----------------------------------------------------------------
    // Collections & aliases
    // -----------------------------------------------------------------

    pub fn collections(&self) -> Result<Vec<String>, ServiceError> {
        Ok(lock(&self.collections)?.clone())
    }

    pub fn read_alias(&self, name: &str) -> Result<Option<String>, ServiceError> {
        Ok(lock(&self.aliases)?.get(name).cloned())
    }

    /// Only the default collection can exist; "creating" it returns the one
    /// registered at startup, and any other alias is refused.
    pub fn create_collection(&self, alias: &str) -> Result<String, ServiceError> {
        if alias != DEFAULT_ALIAS {
            return Err(ServiceError::NotSupported(format!(
                "only the '{DEFAULT_ALIAS}' collection is supported, not '{alias}'"
            )));
        }
        self.read_alias(DEFAULT_ALIAS)?
            .ok_or_else(|| ServiceError::NoSuchObject(DEFAULT_ALIAS.to_string()))
    }

    pub fn collection_label(&self, path: &str) -> Result<String, ServiceError> {
        lock(&self.collection_labels)?
            .get(path)
            .cloned()
            .ok_or_else(|| ServiceError::NoSuchObject(path.to_string()))
    }

    pub fn set_collection_label(&self, path: &str, label: &str) -> Result<(), ServiceError> {
        lock(&self.collection_labels)?.insert(path.to_string(), label.to_string());
        Ok(())
    }

    /// Item paths belonging to a collection, via the `xdg:collection`
    /// attribute — there is no separate membership table.
    pub fn collection_items(&self, path: &str) -> Result<Vec<String>, ServiceError> {
        let mut matches = Attributes::new();
        matches.insert(ATTR_COLLECTION.to_string(), path.to_string());
        self.store.find_items(&matches)
    }

    // -----------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------

    pub fn search_all(&self, attributes: &Attributes) -> Result<Vec<String>, ServiceError> {
        self.store.find_items(attributes)
    }

    /// Per-collection search: the caller's attributes narrowed to the
    /// collection's object path.
    pub fn search_collection(
        &self,
        collection_path: &str,
        attributes: &Attributes,
    ) -> Result<Vec<String>, ServiceError> {
        let mut matches = attributes.clone();
        matches.insert(ATTR_COLLECTION.to_string(), collection_path.to_string());
        self.store.find_items(&matches)
    }

    // -----------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------

    /// Decrypt and persist a new item under a freshly allocated path.
    ///
    /// Merges the collection and schema attributes, honors the `replace`
    /// flag by deleting items whose full attribute set equals the merged
    /// set, and leaves the store untouched when decryption fails.
    pub fn create_item(
        &self,
        collection_path: &str,
        label: &str,
        attributes: Attributes,
        secret: &Secret,
        replace: bool,
    ) -> Result<CreatedItem, ServiceError> {
        let cipher = self.sessions.cipher(secret.session.as_str())?;
        let plaintext = cipher.decrypt(&secret.parameters, &secret.value)?;

        let mut merged = attributes;
        merged.insert(ATTR_COLLECTION.to_string(), collection_path.to_string());
        merged
            .entry(ATTR_SCHEMA.to_string())
            .or_insert_with(|| GENERIC_SCHEMA.to_string());

        let mut replaced = Vec::new();
        if replace {
            for candidate in self.store.find_items(&merged)? {
                if self.store.get_attributes(&candidate)? == merged
                    && self.store.delete_item(&candidate)?
                {
                    replaced.push(candidate);
                }
            }
        }

        let path = self.allocate_item_path();
        self.store
            .add_item(&path, label, &merged, &plaintext, &secret.content_type)?;
        debug!(item = %path, collection = %collection_path, "item created");
        Ok(CreatedItem { path, replaced })
    }

    /// Read an item's secret, sealed for transit under `session_path`.
    pub fn get_secret(&self, item_path: &str, session_path: &str) -> Result<Secret, ServiceError> {
        let cipher = self.sessions.cipher(session_path)?;
        let (bytes, content_type) = self
            .store
            .get_secret(item_path)?
            .ok_or_else(|| ServiceError::NoSuchObject(item_path.to_string()))?;
        seal(&cipher, session_path, &bytes, &content_type)
    }

    /// Batch read: entries the store cannot resolve are omitted rather than
    /// failing the whole call.
    pub fn get_secrets(
        &self,
        item_paths: &[OwnedObjectPath],
        session_path: &str,
    ) -> Result<HashMap<OwnedObjectPath, Secret>, ServiceError> {
        let cipher = self.sessions.cipher(session_path)?;
        let mut secrets = HashMap::new();
        for path in item_paths {
            let Some((bytes, content_type)) = self.store.get_secret(path.as_str())? else {
                continue;
            };
            secrets.insert(
                path.clone(),
                seal(&cipher, session_path, &bytes, &content_type)?,
            );
        }
        Ok(secrets)
    }

    /// Decrypt an incoming secret and write both the bytes and the content
    /// type to the store.
    pub fn set_secret(&self, item_path: &str, secret: &Secret) -> Result<(), ServiceError> {
        let cipher = self.sessions.cipher(secret.session.as_str())?;
        let plaintext = cipher.decrypt(&secret.parameters, &secret.value)?;
        if !self
            .store
            .set_secret(item_path, &plaintext, &secret.content_type)?
        {
            return Err(ServiceError::NoSuchObject(item_path.to_string()));
        }
        Ok(())
    }

    /// Delete an item, returning its owning collection's path so the caller
    /// can emit `ItemDeleted` there.
    pub fn delete_item(&self, item_path: &str) -> Result<String, ServiceError> {
        let collection = self.item_collection(item_path)?;
        if !self.store.delete_item(item_path)? {
            return Err(ServiceError::NoSuchObject(item_path.to_string()));
        }
        debug!(item = %item_path, "item deleted");
        Ok(collection)
    }

    /// The owning collection of an item per its `xdg:collection` attribute,
    /// falling back to the default collection.
    pub fn item_collection(&self, item_path: &str) -> Result<String, ServiceError> {
        Ok(self
            .store
            .get_attributes(item_path)?
            .remove(ATTR_COLLECTION)
            .unwrap_or_else(|| DEFAULT_COLLECTION_PATH.to_string()))
    }

    /// Stored attributes with `xdg:schema` defaulted on the read path.
    pub fn item_attributes(&self, item_path: &str) -> Result<Attributes, ServiceError> {
        if !self.store.item_exists(item_path)? {
            return Err(ServiceError::NoSuchObject(item_path.to_string()));
        }
        let mut attributes = self.store.get_attributes(item_path)?;
        attributes
            .entry(ATTR_SCHEMA.to_string())
            .or_insert_with(|| GENERIC_SCHEMA.to_string());
        Ok(attributes)
    }

    /// Full attribute replacement.
    pub fn set_item_attributes(
        &self,
        item_path: &str,
        attributes: &Attributes,
    ) -> Result<(), ServiceError> {
        if !self.store.item_exists(item_path)? {
            return Err(ServiceError::NoSuchObject(item_path.to_string()));
        }
        self.store.set_attributes(item_path, attributes)
    }

    pub fn item_metadata(&self, item_path: &str) -> Result<ItemMetadata, ServiceError> {
        self.store
            .get_metadata(item_path)?
            .ok_or_else(|| ServiceError::NoSuchObject(item_path.to_string()))
    }

    pub fn set_item_label(&self, item_path: &str, label: &str) -> Result<(), ServiceError> {
        if !self.store.set_label(item_path, label)? {
            return Err(ServiceError::NoSuchObject(item_path.to_string()));
        }
        Ok(())
    }
}

/// Build the wire secret for `plaintext` under `cipher`.
fn seal(
    cipher: &SessionCipher,
    session_path: &str,
    plaintext: &[u8],
    content_type: &str,
) -> Result<Secret, ServiceError> {
    let (parameters, value) = cipher.encrypt(plaintext)?;
    Ok(Secret {
        session: object_path(session_path)?,
        parameters,
        value,
        content_type: content_type.to_string(),
    })
}

/// Convert a path string to an owned object path, or InvalidArgs.
pub(crate) fn object_path(path: &str) -> Result<OwnedObjectPath, ServiceError> {
    OwnedObjectPath::try_from(path.to_string())
        .map_err(|_| ServiceError::InvalidArgs(format!("invalid object path '{path}'")))
}

/// The null object path `/`, used wherever the protocol wants "no prompt".
pub(crate) fn null_path() -> OwnedObjectPath {
    zvariant::ObjectPath::from_static_str_unchecked("/").into()
}

/// Parse the numeric suffix of an item path (`…/item/i<N>`).
fn item_suffix(path: &str) -> Option<u64> {
    path.rsplit('/')
        .next()
        .and_then(|leaf| leaf.strip_prefix('i'))
        .and_then(|digits| digits.parse().ok())
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>, ServiceError> {
    mutex
        .lock()
        .map_err(|_| ServiceError::Storage("state lock poisoned".to_string()))
}
