//! Notification subscription table.
//!
//! Entries are keyed by the resolved message id so the inbound hot path is a
//! single map lookup. The table is mutated only under the dispatcher lock,
//! in response to subscription requests or channel teardown.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::message::{Message, MessageFactory};

/// Opaque handle naming one active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

pub(crate) struct SubscriptionEntry {
    pub handle: SubscriptionHandle,
    pub channel_id: u32,
    pub factory: MessageFactory,
    pub queue: mpsc::Sender<Box<dyn Message>>,
}

#[derive(Default)]
pub(crate) struct SubscriptionTable {
    by_msg_id: HashMap<u16, Vec<SubscriptionEntry>>,
    next_handle: u64,
}

impl SubscriptionTable {
    pub fn add(
        &mut self,
        msg_id: u16,
        channel_id: u32,
        factory: MessageFactory,
        queue: mpsc::Sender<Box<dyn Message>>,
    ) -> SubscriptionHandle {
        self.next_handle += 1;
        let handle = SubscriptionHandle(self.next_handle);
        self.by_msg_id.entry(msg_id).or_default().push(SubscriptionEntry {
            handle,
            channel_id,
            factory,
            queue,
        });
        handle
    }

    /// Remove one subscription by handle. Returns false for unknown handles.
    pub fn remove(&mut self, handle: SubscriptionHandle) -> bool {
        let mut removed = false;
        self.by_msg_id.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.handle != handle);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        removed
    }

    /// Remove every subscription owned by a channel.
    pub fn remove_channel(&mut self, channel_id: u32) {
        self.by_msg_id.retain(|_, entries| {
            entries.retain(|e| e.channel_id != channel_id);
            !entries.is_empty()
        });
    }

    pub fn matching(&self, msg_id: u16) -> Option<&[SubscriptionEntry]> {
        self.by_msg_id.get(&msg_id).map(|v| v.as_slice())
    }

    pub fn clear(&mut self) {
        self.by_msg_id.clear();
    }

    pub fn len(&self) -> usize {
        self.by_msg_id.values().map(|v| v.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binapi::interfaces::new_sw_interface_set_flags;

    fn entry_queue() -> mpsc::Sender<Box<dyn Message>> {
        mpsc::channel(1).0
    }

    #[test]
    fn test_add_and_match() {
        let mut table = SubscriptionTable::default();

        table.add(5, 1, new_sw_interface_set_flags, entry_queue());
        table.add(5, 2, new_sw_interface_set_flags, entry_queue());

        assert_eq!(table.matching(5).unwrap().len(), 2);
        assert!(table.matching(6).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_handles_are_unique() {
        let mut table = SubscriptionTable::default();

        let a = table.add(5, 1, new_sw_interface_set_flags, entry_queue());
        let b = table.add(5, 1, new_sw_interface_set_flags, entry_queue());
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_by_handle() {
        let mut table = SubscriptionTable::default();

        let a = table.add(5, 1, new_sw_interface_set_flags, entry_queue());
        let b = table.add(5, 1, new_sw_interface_set_flags, entry_queue());

        assert!(table.remove(a));
        assert_eq!(table.matching(5).unwrap().len(), 1);
        assert_eq!(table.matching(5).unwrap()[0].handle, b);

        // Second removal of the same handle is a miss.
        assert!(!table.remove(a));
    }

    #[test]
    fn test_remove_channel_drops_all_of_its_entries() {
        let mut table = SubscriptionTable::default();

        table.add(5, 1, new_sw_interface_set_flags, entry_queue());
        table.add(6, 1, new_sw_interface_set_flags, entry_queue());
        table.add(5, 2, new_sw_interface_set_flags, entry_queue());

        table.remove_channel(1);

        assert_eq!(table.len(), 1);
        assert_eq!(table.matching(5).unwrap()[0].channel_id, 2);
        assert!(table.matching(6).is_none());
    }

    #[test]
    fn test_clear() {
        let mut table = SubscriptionTable::default();
        table.add(5, 1, new_sw_interface_set_flags, entry_queue());
        table.clear();
        assert_eq!(table.len(), 0);
    }
}
