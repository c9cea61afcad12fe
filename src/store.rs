//! The external mailbox store interface (`spec.md` §6).
//!
//! The core consumes a small query interface; schema and storage
//! engine choice live outside this crate. [`MemStore`] is an
//! in-memory reference implementation used by tests and the
//! demonstration binary.

use crate::sync::Item;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// An authenticated user, as returned by [`Store::get_user`].
///
/// The core treats `user_id` as opaque; accounts and credentials are
/// managed entirely outside this crate (`spec.md` §1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: u64,
    pub login: String,
}

/// The query surface C5/C2 need from the backing mailbox store.
pub trait Store: Send + Sync {
    /// Resolve a login (mail address or local part) to a user.
    async fn get_user(&self, login: &str) -> Result<Option<User>>;

    /// Fetch one deterministically ordered page of items for a
    /// collection, plus the total item count.
    async fn list_items(
        &self,
        user_id: u64,
        collection_id: &str,
        cursor: usize,
        limit: usize,
    ) -> Result<(Vec<Item>, usize)>;

    /// Fetch a single item by its stable `server_id`.
    async fn get_item(&self, user_id: u64, collection_id: &str, server_id: &str) -> Result<Option<Item>>;

    /// Apply a read/unread flag change.
    async fn set_read(&self, user_id: u64, server_id: &str, read: bool) -> Result<()>;

    /// Delete an item.
    async fn delete_item(&self, user_id: u64, server_id: &str) -> Result<()>;

    /// Insert a new item (used by the SMTP ingress path), returning
    /// its freshly assigned `server_id`.
    async fn insert_item(&self, user_id: u64, collection_id: &str, item: Item) -> Result<String>;
}

#[derive(Default)]
struct Collections {
    by_user: HashMap<u64, HashMap<String, Vec<Item>>>,
}

/// An in-memory [`Store`] for tests and local demonstration. Items
/// within a collection are stored newest-first, matching the
/// recommended ordering in `spec.md` §3.
#[derive(Default)]
pub struct MemStore {
    users: Mutex<HashMap<String, User>>,
    items: Mutex<Collections>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_user(&self, user_id: u64, login: &str) {
        self.users.lock().unwrap().insert(
            login.to_string(),
            User {
                user_id,
                login: login.to_string(),
            },
        );
    }

    /// Insert a pre-built item directly, preserving its `server_id`.
    pub fn seed_item(&self, user_id: u64, collection_id: &str, item: Item) {
        let mut collections = self.items.lock().unwrap();
        collections
            .by_user
            .entry(user_id)
            .or_default()
            .entry(collection_id.to_string())
            .or_default()
            .push(item);
    }
}

impl Store for MemStore {
    async fn get_user(&self, login: &str) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(login).cloned())
    }

    async fn list_items(
        &self,
        user_id: u64,
        collection_id: &str,
        cursor: usize,
        limit: usize,
    ) -> Result<(Vec<Item>, usize)> {
        let collections = self.items.lock().unwrap();
        let Some(items) = collections.by_user.get(&user_id).and_then(|m| m.get(collection_id)) else {
            return Ok((Vec::new(), 0));
        };
        let total = items.len();
        let page = items.iter().skip(cursor).take(limit).cloned().collect();
        Ok((page, total))
    }

    async fn get_item(&self, user_id: u64, collection_id: &str, server_id: &str) -> Result<Option<Item>> {
        let collections = self.items.lock().unwrap();
        Ok(collections
            .by_user
            .get(&user_id)
            .and_then(|m| m.get(collection_id))
            .and_then(|items| items.iter().find(|i| i.server_id == server_id).cloned()))
    }

    async fn set_read(&self, user_id: u64, server_id: &str, read: bool) -> Result<()> {
        let mut collections = self.items.lock().unwrap();
        let Some(folders) = collections.by_user.get_mut(&user_id) else {
            return Err(Error::StoreUnavailable(format!("no such item {server_id}")));
        };
        for items in folders.values_mut() {
            if let Some(item) = items.iter_mut().find(|i| i.server_id == server_id) {
                item.read = read;
                return Ok(());
            }
        }
        Err(Error::StoreUnavailable(format!("no such item {server_id}")))
    }

    async fn delete_item(&self, user_id: u64, server_id: &str) -> Result<()> {
        let mut collections = self.items.lock().unwrap();
        let Some(folders) = collections.by_user.get_mut(&user_id) else {
            return Err(Error::StoreUnavailable(format!("no such item {server_id}")));
        };
        for items in folders.values_mut() {
            if let Some(pos) = items.iter().position(|i| i.server_id == server_id) {
                items.remove(pos);
                return Ok(());
            }
        }
        Err(Error::StoreUnavailable(format!("no such item {server_id}")))
    }

    async fn insert_item(&self, user_id: u64, collection_id: &str, mut item: Item) -> Result<String> {
        let mut collections = self.items.lock().unwrap();
        let items = collections
            .by_user
            .entry(user_id)
            .or_default()
            .entry(collection_id.to_string())
            .or_default();
        let pk = items.len() + 1;
        let server_id = format!("{collection_id}:{pk}");
        item.server_id.clone_from(&server_id);
        items.insert(0, item);
        Ok(server_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(subject: &str) -> Item {
        Item {
            server_id: String::new(),
            subject: subject.to_string(),
            from: "a@example.com".to_string(),
            to: "b@example.com".to_string(),
            received_at: Utc::now(),
            read: false,
            mime_bytes: Vec::new(),
            body_plain: Some("body".to_string()),
            body_html: None,
            conversation_id: "conv".to_string(),
        }
    }

    #[tokio::test]
    async fn get_user_resolves_seeded_login() {
        let store = MemStore::new();
        store.seed_user(7, "alice@example.com");
        let user = store.get_user("alice@example.com").await.unwrap();
        assert_eq!(user, Some(User { user_id: 7, login: "alice@example.com".to_string() }));
    }

    #[tokio::test]
    async fn insert_then_list_returns_newest_first() {
        let store = MemStore::new();
        let id1 = store.insert_item(1, "1", item("first")).await.unwrap();
        let id2 = store.insert_item(1, "1", item("second")).await.unwrap();
        assert_ne!(id1, id2);

        let (page, total) = store.list_items(1, "1", 0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].subject, "second");
        assert_eq!(page[1].subject, "first");
    }

    #[tokio::test]
    async fn list_items_paginates_with_cursor_and_limit() {
        let store = MemStore::new();
        for n in 0..5 {
            store.insert_item(1, "1", item(&n.to_string())).await.unwrap();
        }
        let (page, total) = store.list_items(1, "1", 2, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn set_read_flips_flag() {
        let store = MemStore::new();
        let id = store.insert_item(1, "1", item("x")).await.unwrap();
        store.set_read(1, &id, true).await.unwrap();
        let fetched = store.get_item(1, "1", &id).await.unwrap().unwrap();
        assert!(fetched.read);
    }

    #[tokio::test]
    async fn delete_item_removes_it() {
        let store = MemStore::new();
        let id = store.insert_item(1, "1", item("x")).await.unwrap();
        store.delete_item(1, &id).await.unwrap();
        assert!(store.get_item(1, "1", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_read_on_unknown_item_errors() {
        let store = MemStore::new();
        let err = store.set_read(1, "1:999", true).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }
}
