//! Object registration: wires the service state to the bus.

use std::sync::Arc;

use tracing::{info, warn};
use zbus::Connection;

use crate::collection::SecretCollection;
use crate::error::Error;
use crate::item::SecretItem;
use crate::service::SecretService;
use crate::state::{ServiceState, DEFAULT_ALIAS_PATH, DEFAULT_COLLECTION_PATH, SERVICE_PATH};
use crate::store::Store;

/// Build the service state from `store` and export every object: the service
/// root, the default collection (at its canonical and alias paths), and one
/// item object per persisted item.
///
/// The caller still has to claim the well-known bus name afterwards.
pub async fn register_objects(
    conn: &Connection,
    store: Store,
) -> Result<Arc<ServiceState>, Error> {
    let state = Arc::new(ServiceState::new(store)?);
    let server = conn.object_server();

    server
        .at(SERVICE_PATH, SecretService::new(Arc::clone(&state)))
        .await?;
    server
        .at(
            DEFAULT_COLLECTION_PATH,
            SecretCollection::new(DEFAULT_COLLECTION_PATH.to_string(), Arc::clone(&state)),
        )
        .await?;
    server
        .at(
            DEFAULT_ALIAS_PATH,
            SecretCollection::new(DEFAULT_COLLECTION_PATH.to_string(), Arc::clone(&state)),
        )
        .await?;

    // Re-export handlers for items that survived a restart.
    let persisted = state.store.all_items()?;
    let count = persisted.len();
    for path in persisted {
        match zvariant::ObjectPath::try_from(path.as_str()) {
            Ok(object) => {
                server
                    .at(object, SecretItem::new(path.clone(), Arc::clone(&state)))
                    .await?;
            }
            Err(e) => warn!(item = %path, error = %e, "skipping unexportable stored item"),
        }
    }
    info!(items = count, "secret service objects registered");

    Ok(state)
}
