//! # Presence check over the blocking key/value client
//!
//! Before paying for a document-store round trip, a resolver thread
//! checks whether `uid` is present by issuing `EXISTS` against the cache
//! through the same client other callers use; no dedicated presence
//! protocol exists.

use hkv_client::KVClient;

use crate::collaborators::{Presence, PresenceCheck};
use crate::error::{ResolverError, ResolverResult};

pub struct ClientPresenceCheck {
    client: KVClient,
}

impl ClientPresenceCheck {
    pub fn new(client: KVClient) -> Self {
        ClientPresenceCheck { client }
    }
}

impl PresenceCheck for ClientPresenceCheck {
    fn exists(&self, uid: &str) -> ResolverResult<Presence> {
        let found = self
            .client
            .exists(uid.as_bytes())
            .map_err(|e| ResolverError::Presence(e.to_string()))?;
        Ok(if found { Presence::Present } else { Presence::Absent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Hand-rolled stand-in used by pool.rs's tests, avoiding a live
    /// server. Tracks which uids have been marked present.
    pub struct StubPresenceCheck {
        pub present: Mutex<Vec<String>>,
    }

    impl StubPresenceCheck {
        pub fn new(present: Vec<&str>) -> Self {
            StubPresenceCheck {
                present: Mutex::new(present.into_iter().map(String::from).collect()),
            }
        }
    }

    impl PresenceCheck for StubPresenceCheck {
        fn exists(&self, uid: &str) -> ResolverResult<Presence> {
            let present = self.present.lock().unwrap();
            Ok(if present.iter().any(|u| u == uid) {
                Presence::Present
            } else {
                Presence::Absent
            })
        }
    }

    #[test]
    fn stub_reports_membership() {
        let stub = StubPresenceCheck::new(vec!["u1"]);
        assert_eq!(stub.exists("u1").unwrap(), Presence::Present);
        assert_eq!(stub.exists("u2").unwrap(), Presence::Absent);
    }
}
