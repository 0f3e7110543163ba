//! Contact persistence seam.
//!
//! The node reports discoveries, presence changes and received messages to a
//! [`ContactStore`]. The trait is synchronous so it can be called while the
//! peer table lock is held; [`MemoryContactStore`] is the bundled backend.

use crate::utils::{Result, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

/// A persisted contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    /// Store-assigned row id
    pub id: i64,
    /// Contact's node id
    pub node_id: String,
    /// Display name
    pub name: String,
    /// Last known IP
    pub ip_address: Option<IpAddr>,
    /// Last known port
    pub port: Option<u16>,
    /// Reserved for key material; always `None` today
    pub public_key: Option<String>,
    /// Last presence change
    pub last_seen: DateTime<Utc>,
    /// Current presence
    pub is_online: bool,
}

/// A stored message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    /// Store-assigned message id
    pub id: i64,
    /// Owning contact
    pub contact_id: i64,
    /// Clear-text content
    pub content: String,
    /// Time of recording
    pub timestamp: DateTime<Utc>,
}

/// Persistence collaborator consumed by the node
pub trait ContactStore: Send + Sync {
    /// Insert or replace a contact and mark it online
    fn upsert_contact(
        &self,
        node_id: &str,
        name: &str,
        ip_address: Option<IpAddr>,
        port: Option<u16>,
        public_key: Option<String>,
    ) -> Result<()>;

    /// Set presence and refresh the contact's `last_seen`
    fn set_contact_online(&self, node_id: &str, online: bool) -> Result<()>;

    /// Append a message for a contact, returning its id
    fn record_message(&self, contact_id: i64, content: &str) -> Result<i64>;

    /// Look up a contact by node id
    fn find_contact_by_node_id(&self, node_id: &str) -> Result<Option<Contact>>;
}

#[derive(Debug, Default)]
struct Tables {
    contacts: HashMap<String, Contact>,
    messages: Vec<StoredMessage>,
    next_contact_id: i64,
    next_message_id: i64,
}

/// Process-local contact store
#[derive(Debug, Default)]
pub struct MemoryContactStore {
    tables: Mutex<Tables>,
}

impl MemoryContactStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| {
            StorageError::Backend {
                reason: "contact store lock poisoned".to_string(),
            }
            .into()
        })
    }

    /// All contacts, online first, then by name
    pub fn contacts(&self) -> Result<Vec<Contact>> {
        let tables = self.tables()?;
        let mut contacts: Vec<Contact> = tables.contacts.values().cloned().collect();
        contacts.sort_by(|a, b| b.is_online.cmp(&a.is_online).then(a.name.cmp(&b.name)));
        Ok(contacts)
    }

    /// Messages of one contact in arrival order
    pub fn messages(&self, contact_id: i64) -> Result<Vec<StoredMessage>> {
        let tables = self.tables()?;
        Ok(tables
            .messages
            .iter()
            .filter(|message| message.contact_id == contact_id)
            .cloned()
            .collect())
    }
}

impl ContactStore for MemoryContactStore {
    fn upsert_contact(
        &self,
        node_id: &str,
        name: &str,
        ip_address: Option<IpAddr>,
        port: Option<u16>,
        public_key: Option<String>,
    ) -> Result<()> {
        let mut tables = self.tables()?;
        let id = match tables.contacts.get(node_id) {
            Some(existing) => existing.id,
            None => {
                tables.next_contact_id += 1;
                tables.next_contact_id
            }
        };

        tables.contacts.insert(
            node_id.to_string(),
            Contact {
                id,
                node_id: node_id.to_string(),
                name: name.to_string(),
                ip_address,
                port,
                public_key,
                last_seen: Utc::now(),
                is_online: true,
            },
        );
        Ok(())
    }

    fn set_contact_online(&self, node_id: &str, online: bool) -> Result<()> {
        let mut tables = self.tables()?;
        if let Some(contact) = tables.contacts.get_mut(node_id) {
            contact.is_online = online;
            contact.last_seen = Utc::now();
        }
        Ok(())
    }

    fn record_message(&self, contact_id: i64, content: &str) -> Result<i64> {
        let mut tables = self.tables()?;
        if !tables.contacts.values().any(|contact| contact.id == contact_id) {
            return Err(StorageError::ContactNotFound {
                contact: contact_id.to_string(),
            }
            .into());
        }

        tables.next_message_id += 1;
        let id = tables.next_message_id;
        tables.messages.push(StoredMessage {
            id,
            contact_id,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    fn find_contact_by_node_id(&self, node_id: &str) -> Result<Option<Contact>> {
        Ok(self.tables()?.contacts.get(node_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_keeps_contact_id() {
        let store = MemoryContactStore::new();
        store.upsert_contact("A1", "Alice", None, None, None).unwrap();
        let first = store.find_contact_by_node_id("A1").unwrap().unwrap();

        store
            .upsert_contact("A1", "Alice B.", Some("10.0.0.4".parse().unwrap()), Some(2948), None)
            .unwrap();
        let second = store.find_contact_by_node_id("A1").unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Alice B.");
        assert_eq!(second.port, Some(2948));
        assert!(second.is_online);
    }

    #[test]
    fn test_presence_and_ordering() {
        let store = MemoryContactStore::new();
        store.upsert_contact("B", "Bob", None, None, None).unwrap();
        store.upsert_contact("A", "Alice", None, None, None).unwrap();
        store.upsert_contact("C", "Carol", None, None, None).unwrap();
        store.set_contact_online("A", false).unwrap();
        store.set_contact_online("unknown", false).unwrap();

        let names: Vec<String> = store.contacts().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Bob", "Carol", "Alice"]);
    }

    #[test]
    fn test_messages() {
        let store = MemoryContactStore::new();
        store.upsert_contact("A", "Alice", None, None, None).unwrap();
        let contact = store.find_contact_by_node_id("A").unwrap().unwrap();

        let first = store.record_message(contact.id, "hi").unwrap();
        let second = store.record_message(contact.id, "there").unwrap();
        assert!(second > first);

        let contents: Vec<String> = store
            .messages(contact.id)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["hi", "there"]);
        assert!(store.record_message(999, "lost").is_err());
    }
}
