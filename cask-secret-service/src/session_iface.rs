//! D-Bus object for `org.freedesktop.Secret.Session`.
//!
//! Each negotiated session gets an object at
//! `/org/freedesktop/secrets/session/s<N>` whose only method is `Close()`.

use std::sync::Arc;

use zbus::{fdo, interface, ObjectServer};
use zvariant::ObjectPath;

use crate::error::to_fdo;
use crate::state::ServiceState;

pub struct SecretSession {
    path: String,
    state: Arc<ServiceState>,
}

impl SecretSession {
    pub fn new(path: String, state: Arc<ServiceState>) -> Self {
        Self { path, state }
    }
}

#[interface(name = "org.freedesktop.Secret.Session")]
impl SecretSession {
    /// Close this session and unexport its object.
    async fn close(&self, #[zbus(object_server)] server: &ObjectServer) -> fdo::Result<()> {
        self.state.sessions.close(&self.path).map_err(to_fdo)?;
        if let Ok(path) = ObjectPath::try_from(self.path.as_str()) {
            let _ = server.remove::<Self, _>(path).await;
        }
        Ok(())
    }
}
