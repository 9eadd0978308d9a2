//! Message identity registry.
//!
//! Maps a message's schema identity `(name, crc)` to the numeric id the peer
//! assigned at connect time, and back. Lookups go to the transport adapter
//! once per identity; both hits and misses are cached so repeated resolution
//! is a map read. The reverse map is what lets the dispatcher classify
//! first-seen inbound message ids.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::adapter::Adapter;
use crate::error::{Error, Result};
use crate::message::{Message, MessageType};

/// Resolved identity of one message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageIdent {
    /// Schema name.
    pub name: &'static str,
    /// Field-layout fingerprint.
    pub crc: u32,
    /// Direction, used for envelope layout decisions on inbound frames.
    pub direction: MessageType,
}

#[derive(Default)]
struct RegistryState {
    /// `(name, crc)` -> peer id; `None` caches a failed lookup.
    forward: HashMap<(&'static str, u32), Option<u16>>,
    /// Peer id -> identity, populated on every successful resolve.
    reverse: HashMap<u16, MessageIdent>,
}

/// Cache of peer-assigned message ids, valid for the life of a connection.
pub struct IdentityRegistry {
    adapter: Arc<dyn Adapter>,
    state: Mutex<RegistryState>,
}

impl IdentityRegistry {
    /// Create an empty registry backed by the given adapter.
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().expect("registry state lock poisoned")
    }

    /// Resolve the peer-assigned id for a message value.
    ///
    /// A failed peer lookup is cached negatively, so retrying an unsupported
    /// type stays cheap and deterministic.
    pub fn resolve(&self, msg: &dyn Message) -> Result<u16> {
        let key = (msg.message_name(), msg.message_crc());

        if let Some(cached) = self.state().forward.get(&key) {
            return match cached {
                Some(id) => Ok(*id),
                None => Err(Error::UnknownMessage {
                    name: key.0.to_string(),
                    crc: key.1,
                }),
            };
        }

        // The adapter call leaves the lock released; a concurrent duplicate
        // resolve is harmless and both arrive at the same peer answer.
        match self.adapter.resolve_id(key.0, key.1) {
            Ok(id) => {
                let ident = MessageIdent {
                    name: key.0,
                    crc: key.1,
                    direction: msg.message_type(),
                };
                let mut state = self.state();
                state.forward.insert(key, Some(id));
                state.reverse.insert(id, ident);
                tracing::debug!(name = key.0, crc = key.1, id, "resolved message id");
                Ok(id)
            }
            Err(_) => {
                self.state().forward.insert(key, None);
                tracing::debug!(name = key.0, crc = key.1, "message unknown to peer");
                Err(Error::UnknownMessage {
                    name: key.0.to_string(),
                    crc: key.1,
                })
            }
        }
    }

    /// Look up the identity behind a peer-assigned id.
    ///
    /// Only ids that have been resolved through this registry are known.
    pub fn reverse(&self, id: u16) -> Option<MessageIdent> {
        self.state().reverse.get(&id).copied()
    }

    /// Verify that the peer supports every listed message type.
    ///
    /// Resolves each type and collects all failures into a single error
    /// naming the incompatible messages. Intended for fail-fast startup
    /// checks against version skew.
    pub fn check_compatibility(&self, msgs: &[&dyn Message]) -> Result<()> {
        let mut incompatible = Vec::new();
        for msg in msgs {
            if self.resolve(*msg).is_err() {
                incompatible.push(msg.message_name());
            }
        }
        if incompatible.is_empty() {
            Ok(())
        } else {
            Err(Error::IncompatibleMessages(incompatible.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockAdapter;
    use crate::binapi::control::{ControlPing, ControlPingReply};
    use crate::binapi::interfaces::SwInterfaceDump;

    fn test_registry() -> (Arc<MockAdapter>, IdentityRegistry) {
        let adapter = Arc::new(MockAdapter::new());
        let registry = IdentityRegistry::new(adapter.clone());
        (adapter, registry)
    }

    #[test]
    fn test_resolve_is_stable() {
        let (_, registry) = test_registry();

        let first = registry.resolve(&ControlPing::default()).unwrap();
        let second = registry.resolve(&ControlPing::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_distinct_types_get_distinct_ids() {
        let (_, registry) = test_registry();

        let ping = registry.resolve(&ControlPing::default()).unwrap();
        let reply = registry.resolve(&ControlPingReply::default()).unwrap();
        assert_ne!(ping, reply);
    }

    #[test]
    fn test_reverse_lookup_after_resolve() {
        let (_, registry) = test_registry();

        let id = registry.resolve(&ControlPingReply::default()).unwrap();
        let ident = registry.reverse(id).unwrap();
        assert_eq!(ident.name, "control_ping_reply");
        assert_eq!(ident.direction, MessageType::Reply);
    }

    #[test]
    fn test_reverse_lookup_unknown_id() {
        let (_, registry) = test_registry();
        assert!(registry.reverse(0x4242).is_none());
    }

    #[test]
    fn test_negative_caching() {
        let (adapter, registry) = test_registry();
        adapter.reject_message("sw_interface_dump");

        let err = registry.resolve(&SwInterfaceDump::default()).unwrap_err();
        assert!(err.to_string().contains("unknown message"));

        // A later peer change must not resurrect the identity within this
        // connection: the miss is cached.
        adapter.accept_message("sw_interface_dump");
        assert!(registry.resolve(&SwInterfaceDump::default()).is_err());
    }

    #[test]
    fn test_check_compatibility_ok() {
        let (_, registry) = test_registry();

        let ping = ControlPing::default();
        let reply = ControlPingReply::default();
        registry.check_compatibility(&[&ping, &reply]).unwrap();
    }

    #[test]
    fn test_check_compatibility_lists_failures() {
        let (adapter, registry) = test_registry();
        adapter.reject_message("sw_interface_dump");

        let ping = ControlPing::default();
        let dump = SwInterfaceDump::default();
        let err = registry.check_compatibility(&[&ping, &dump]).unwrap_err();
        assert!(err.to_string().contains("sw_interface_dump"));
        assert!(!err.to_string().contains("control_ping,"));
    }
}
