//! Session registry.
//!
//! A session is the transient crypto context a client negotiates with
//! `Service.OpenSession`. It carries the negotiated transport cipher and the
//! unique bus name of the peer that opened it, so every session owned by a
//! peer can be collected when that peer drops off the bus.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use zvariant::{OwnedObjectPath, Type};

use cask_core::ServiceError;

use crate::crypto::SessionCipher;

/// The Secret Service wire struct `(oayays)`: session path, cipher
/// parameters (the IV, empty for plain sessions), the possibly-encrypted
/// value, and its content type.
#[derive(Clone, Serialize, Deserialize, Type)]
pub struct Secret {
    pub session: OwnedObjectPath,
    pub parameters: Vec<u8>,
    pub value: Vec<u8>,
    pub content_type: String,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("session", &self.session)
            .field("parameters", &self.parameters.len())
            .field("value", &"[redacted]")
            .field("content_type", &self.content_type)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct SessionInfo {
    cipher: SessionCipher,
    /// Unique bus name of the opening peer; `None` for sessions opened
    /// without a resolvable sender (in-process tests).
    owner: Option<String>,
}

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionInfo>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly negotiated session under its object path.
    pub fn insert(
        &self,
        path: &str,
        cipher: SessionCipher,
        owner: Option<&str>,
    ) -> Result<(), ServiceError> {
        let mut sessions = self.lock()?;
        sessions.insert(
            path.to_string(),
            SessionInfo {
                cipher,
                owner: owner.map(str::to_string),
            },
        );
        Ok(())
    }

    /// Resolve a session path to its transport cipher.
    ///
    /// The null path and unknown paths fail with NoSession — this is the
    /// check every secret-carrying method goes through first.
    pub fn cipher(&self, path: &str) -> Result<SessionCipher, ServiceError> {
        if path.is_empty() || path == "/" {
            return Err(ServiceError::NoSession("no session provided".to_string()));
        }
        let sessions = self.lock()?;
        sessions
            .get(path)
            .map(|info| info.cipher.clone())
            .ok_or_else(|| ServiceError::NoSession(path.to_string()))
    }

    /// Drop a session. Closing an unknown path is a no-op.
    pub fn close(&self, path: &str) -> Result<(), ServiceError> {
        let mut sessions = self.lock()?;
        sessions.remove(path);
        Ok(())
    }

    pub fn contains(&self, path: &str) -> Result<bool, ServiceError> {
        Ok(self.lock()?.contains_key(path))
    }

    /// Remove every session owned by `peer`, returning the dropped paths so
    /// the caller can unexport the corresponding bus objects.
    pub fn gc_client(&self, peer: &str) -> Result<Vec<String>, ServiceError> {
        let mut sessions = self.lock()?;
        let dropped: Vec<String> = sessions
            .iter()
            .filter(|(_, info)| info.owner.as_deref() == Some(peer))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &dropped {
            sessions.remove(path);
        }
        Ok(dropped)
    }

    pub fn count(&self) -> Result<usize, ServiceError> {
        Ok(self.lock()?.len())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, SessionInfo>>, ServiceError> {
        self.sessions
            .lock()
            .map_err(|_| ServiceError::Storage("session lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_resolve() {
        let mgr = SessionManager::new();
        mgr.insert("/s/0", SessionCipher::Plain, Some(":1.7")).unwrap();
        assert!(mgr.contains("/s/0").unwrap());
        assert!(matches!(mgr.cipher("/s/0").unwrap(), SessionCipher::Plain));
        assert_eq!(mgr.count().unwrap(), 1);
    }

    #[test]
    fn null_and_empty_paths_are_no_session() {
        let mgr = SessionManager::new();
        assert!(matches!(mgr.cipher(""), Err(ServiceError::NoSession(_))));
        assert!(matches!(mgr.cipher("/"), Err(ServiceError::NoSession(_))));
    }

    #[test]
    fn unknown_session_is_no_session() {
        let mgr = SessionManager::new();
        assert!(matches!(
            mgr.cipher("/org/freedesktop/secrets/session/s99"),
            Err(ServiceError::NoSession(_))
        ));
    }

    #[test]
    fn close_drops_the_session() {
        let mgr = SessionManager::new();
        mgr.insert("/s/0", SessionCipher::Plain, None).unwrap();
        mgr.close("/s/0").unwrap();
        assert!(!mgr.contains("/s/0").unwrap());
        // Closing again is fine.
        mgr.close("/s/0").unwrap();
    }

    #[test]
    fn gc_client_only_touches_the_named_peer() {
        let mgr = SessionManager::new();
        mgr.insert("/s/0", SessionCipher::Plain, Some(":1.7")).unwrap();
        mgr.insert("/s/1", SessionCipher::Plain, Some(":1.7")).unwrap();
        mgr.insert("/s/2", SessionCipher::Plain, Some(":1.9")).unwrap();

        let mut dropped = mgr.gc_client(":1.7").unwrap();
        dropped.sort();
        assert_eq!(dropped, vec!["/s/0".to_string(), "/s/1".to_string()]);
        assert_eq!(mgr.count().unwrap(), 1);
        assert!(mgr.contains("/s/2").unwrap());
        assert!(matches!(mgr.cipher("/s/0"), Err(ServiceError::NoSession(_))));
    }

    #[test]
    fn gc_unknown_peer_is_empty() {
        let mgr = SessionManager::new();
        mgr.insert("/s/0", SessionCipher::Plain, None).unwrap();
        assert!(mgr.gc_client(":1.42").unwrap().is_empty());
        assert_eq!(mgr.count().unwrap(), 1);
    }

    #[test]
    fn secret_debug_redacts_the_value() {
        let secret = Secret {
            session: OwnedObjectPath::try_from("/").unwrap(),
            parameters: vec![],
            value: b"hunter2".to_vec(),
            content_type: "text/plain".to_string(),
        };
        let rendered = format!("{secret:?}");
        assert!(rendered.contains("[redacted]"));
        assert!(!rendered.contains("hunter2"));
    }
}
