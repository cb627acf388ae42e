//! freedesktop.org Secret Service implementation for the cask daemon.
//!
//! Clients open a session (`plain` or DH-negotiated AES-128-CBC), create and
//! search items keyed by string attributes, and read secrets sealed under
//! their session's transport cipher. Items persist in a local SQLite
//! database; everything else — sessions, aliases, the path allocator — lives
//! in [`state::ServiceState`].

pub mod collection;
pub mod crypto;
pub mod error;
pub mod item;
pub mod server;
pub mod service;
pub mod session;
pub mod session_iface;
pub mod state;
pub mod store;

pub use error::Error;
pub use server::register_objects;
pub use service::SecretService;
pub use state::ServiceState;
pub use store::Store;

#[cfg(test)]
mod tests {
    use crate::crypto::ALGORITHM_PLAIN;
    use crate::state::ServiceState;
    use crate::store::Store;

    #[test]
    fn opens_plain_session() {
        let state = ServiceState::new(Store::open_in_memory().unwrap()).unwrap();
        let (output, path) = state.open_session(ALGORITHM_PLAIN, &[], None).unwrap();
        assert!(output.is_empty());
        assert!(path.starts_with("/org/freedesktop/secrets/session/s"));
        assert!(state.sessions.contains(&path).unwrap());
    }
}
