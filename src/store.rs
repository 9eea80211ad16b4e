//! Main Store struct tying all components together.

use crate::error::{Result, StoreError};
use crate::identity::Identity;
use crate::kv::KvStore;
use crate::model::{Item, List, Note, User};
use crate::notify::{Notifier, NotifierConfig};
use crate::repo::{Committed, EntityKind, Repository};
use crate::session::{CancelToken, Subscription};
use crate::stream::{EventStream, StreamConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store. None keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Flush the journal to disk before a commit returns.
    pub sync_on_commit: bool,

    /// Queued notifications per subscriber before it is dropped.
    pub subscriber_buffer: usize,

    /// Settings for event streams built by [`Store::stream`].
    pub stream: StreamConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("./live-store")),
            create_if_missing: true,
            sync_on_commit: true,
            subscriber_buffer: 64,
            stream: StreamConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Configuration for a store with no journal.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            ..Default::default()
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Partial update of an item. Missing fields keep their stored value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub item_id: String,
    pub title: Option<String>,
    pub checked: Option<bool>,
}

impl ItemPatch {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            ..Default::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = Some(checked);
        self
    }
}

/// The live data layer.
///
/// Each mutation entrypoint applies the same policy, in order:
/// - malformed input is `ValidationFailed`, before any store access
/// - a missing or unknown session is `Unauthorized`
/// - a record that does not exist, or belongs to someone else, is `NotFound`
///
/// Successful writes are published to subscribers of the affected
/// collection.
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    kv: Arc<KvStore>,
    notifier: Arc<Notifier>,
    identity: Identity,

    lists: Repository<List>,
    items: Repository<Item>,
    notes: Repository<Note>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        let kv = match &config.path {
            Some(path) => {
                KvStore::open_or_create(path, config.create_if_missing, config.sync_on_commit)?
            }
            None => KvStore::in_memory(),
        };
        info!(path = ?config.path, "store opened");
        Ok(Self::with_kv(Arc::new(kv), config))
    }

    /// A store that keeps nothing on disk.
    pub fn in_memory() -> Self {
        Self::with_kv(Arc::new(KvStore::in_memory()), StoreConfig::in_memory())
    }

    /// Build over an already-open record store.
    pub fn with_kv(kv: Arc<KvStore>, config: StoreConfig) -> Self {
        let notifier = Arc::new(Notifier::with_config(NotifierConfig {
            buffer_size: config.subscriber_buffer,
        }));

        Self {
            identity: Identity::new(Arc::clone(&kv)),
            lists: Repository::new(EntityKind::lists(), Arc::clone(&kv), Arc::clone(&notifier)),
            items: Repository::new(EntityKind::items(), Arc::clone(&kv), Arc::clone(&notifier)),
            notes: Repository::new(EntityKind::notes(), Arc::clone(&kv), Arc::clone(&notifier)),
            config,
            kv,
            notifier,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn kv(&self) -> &Arc<KvStore> {
        &self.kv
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn lists(&self) -> &Repository<List> {
        &self.lists
    }

    pub fn items(&self) -> &Repository<Item> {
        &self.items
    }

    pub fn notes(&self) -> &Repository<Note> {
        &self.notes
    }

    /// Rewrite the journal as a single snapshot.
    pub fn compact(&self) -> Result<()> {
        self.kv.compact()
    }

    // --- Identity ---

    /// Resolve the user behind a session token.
    pub fn authenticate(&self, session: &str) -> Result<User> {
        self.identity.authenticate(Some(session))
    }

    // --- Lists ---

    pub fn create_list(&self, session: &str, name: &str) -> Result<Committed<List>> {
        require("name", name)?;
        let user = self.authenticate(session)?;
        self.lists.create(List::new(user.id, name))
    }

    pub fn rename_list(&self, session: &str, list_id: &str, name: &str) -> Result<Committed<List>> {
        require("name", name)?;
        require("list id", list_id)?;
        let user = self.authenticate(session)?;

        let mut list = self.owned_list(&user, list_id)?;
        list.name = name.to_string();
        self.lists.replace(list)
    }

    /// Delete a list. Its items are left in place.
    pub fn delete_list(&self, session: &str, list_id: &str) -> Result<Committed<List>> {
        require("list id", list_id)?;
        let user = self.authenticate(session)?;

        let list = self.owned_list(&user, list_id)?;
        self.lists.delete(&list)
    }

    pub fn lists_for(&self, session: &str) -> Result<Vec<List>> {
        let user = self.authenticate(session)?;
        self.lists.list_by_parent(&user.id)
    }

    // --- Items ---

    pub fn create_item(&self, session: &str, list_id: &str, title: &str) -> Result<Committed<Item>> {
        require("title", title)?;
        require("list id", list_id)?;
        let user = self.authenticate(session)?;

        let list = self.owned_list(&user, list_id)?;
        self.items.create(Item::new(list.id, title))
    }

    /// Read, merge and write back an item. The list and creation time never
    /// change.
    pub fn update_item(&self, session: &str, patch: ItemPatch) -> Result<Committed<Item>> {
        require("item id", &patch.item_id)?;
        let title = patch.title.filter(|title| !title.is_empty());
        if title.is_none() && patch.checked.is_none() {
            return Err(StoreError::ValidationFailed(
                "an item update needs a title or a checked flag".into(),
            ));
        }
        let user = self.authenticate(session)?;

        let mut item = self.owned_item(&user, &patch.item_id)?;
        if let Some(title) = title {
            item.title = title;
        }
        if let Some(checked) = patch.checked {
            item.is_checked = checked;
        }
        self.items.replace(item)
    }

    pub fn delete_item(&self, session: &str, item_id: &str) -> Result<Committed<Item>> {
        require("item id", item_id)?;
        let user = self.authenticate(session)?;

        let item = self.owned_item(&user, item_id)?;
        self.items.delete(&item)
    }

    pub fn items_for(&self, session: &str, list_id: &str) -> Result<Vec<Item>> {
        require("list id", list_id)?;
        let user = self.authenticate(session)?;
        let list = self.owned_list(&user, list_id)?;
        self.items.list_by_parent(&list.id)
    }

    // --- Notes ---

    /// Create a note. `content` is the editor document, stored serialized.
    pub fn create_note(&self, session: &str, content: &serde_json::Value) -> Result<Committed<Note>> {
        let content = note_content(content)?;
        let user = self.authenticate(session)?;
        self.notes.create(Note::new(user.id, content))
    }

    /// Replace a note's content, recording which editor instance wrote it.
    pub fn update_note(
        &self,
        session: &str,
        note_id: &str,
        content: &serde_json::Value,
        instance_id: Option<String>,
    ) -> Result<Committed<Note>> {
        require("note id", note_id)?;
        let content = note_content(content)?;
        let user = self.authenticate(session)?;

        let mut note = self
            .notes
            .get_by_id(note_id)?
            .filter(|note| note.owner_id == user.id)
            .ok_or_else(|| StoreError::NotFound(format!("note {}", note_id)))?;
        note.content = content;
        note.instance_id = instance_id;
        self.notes.replace(note)
    }

    pub fn notes_for(&self, session: &str) -> Result<Vec<Note>> {
        let user = self.authenticate(session)?;
        self.notes.list_by_parent(&user.id)
    }

    // --- Subscriptions ---

    /// Live view of the caller's lists.
    pub fn subscribe_lists(&self, session: &str) -> Result<Subscription<List>> {
        let user = self.authenticate(session)?;
        self.lists.subscribe(&user.id, CancelToken::new())
    }

    /// Live view of the items of one of the caller's lists.
    pub fn subscribe_items(&self, session: &str, list_id: &str) -> Result<Subscription<Item>> {
        require("list id", list_id)?;
        let user = self.authenticate(session)?;
        let list = self.owned_list(&user, list_id)?;
        self.items.subscribe(&list.id, CancelToken::new())
    }

    /// Live view of the caller's notes.
    pub fn subscribe_notes(&self, session: &str) -> Result<Subscription<Note>> {
        let user = self.authenticate(session)?;
        self.notes.subscribe(&user.id, CancelToken::new())
    }

    /// Wrap a subscription in an event stream using the configured settings.
    pub fn stream<T>(&self, subscription: Subscription<T>) -> EventStream<T>
    where
        T: Serialize + DeserializeOwned,
    {
        EventStream::new(subscription, self.config.stream.clone())
    }

    // --- Ownership ---

    fn owned_list(&self, user: &User, list_id: &str) -> Result<List> {
        self.lists
            .get_by_id(list_id)?
            .filter(|list| list.owner_id == user.id)
            .ok_or_else(|| StoreError::NotFound(format!("list {}", list_id)))
    }

    fn owned_item(&self, user: &User, item_id: &str) -> Result<Item> {
        let not_found = || StoreError::NotFound(format!("item {}", item_id));
        let item = self.items.get_by_id(item_id)?.ok_or_else(not_found)?;
        match self.lists.get_by_id(&item.list_id)? {
            Some(list) if list.owner_id == user.id => Ok(item),
            _ => Err(not_found()),
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(StoreError::ValidationFailed(format!("missing {}", field)));
    }
    Ok(())
}

fn note_content(content: &serde_json::Value) -> Result<String> {
    if content.is_null() {
        return Err(StoreError::ValidationFailed("missing content".into()));
    }
    Ok(serde_json::to_string(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn signed_in() -> Store {
        let store = Store::in_memory();
        store.identity().sign_in(&User::new("u1"), "s1").unwrap();
        store.identity().sign_in(&User::new("u2"), "s2").unwrap();
        store
    }

    #[test]
    fn test_create_and_rename_list() {
        let store = signed_in();
        let created = store.create_list("s1", "Groceries").unwrap();
        assert_eq!(created.record.owner_id, "u1");

        let renamed = store.rename_list("s1", &created.record.id, "Food").unwrap();
        assert_eq!(renamed.record.name, "Food");
        assert_eq!(renamed.record.created_at, created.record.created_at);
        assert!(renamed.stamp > created.stamp);
        assert_eq!(store.lists_for("s1").unwrap(), vec![renamed.record]);
    }

    #[test]
    fn test_validation_before_auth() {
        let store = signed_in();
        assert!(matches!(store.create_list("bogus", ""), Err(StoreError::ValidationFailed(_))));
        assert!(matches!(store.create_list("bogus", "x"), Err(StoreError::Unauthorized)));
    }

    #[test]
    fn test_foreign_list_is_not_found() {
        let store = signed_in();
        let list = store.create_list("s1", "Mine").unwrap().record;

        assert!(matches!(
            store.rename_list("s2", &list.id, "Theirs"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.delete_list("s2", &list.id), Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.create_item("s2", &list.id, "sneaky"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.subscribe_items("s2", &list.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_update_item_merges() {
        let store = signed_in();
        let list = store.create_list("s1", "Chores").unwrap().record;
        let item = store.create_item("s1", &list.id, "Dishes").unwrap().record;

        let checked = store
            .update_item("s1", ItemPatch::new(&item.id).checked(true))
            .unwrap()
            .record;
        assert_eq!(checked.title, "Dishes");
        assert!(checked.is_checked);

        let retitled = store
            .update_item("s1", ItemPatch::new(&item.id).title("Laundry"))
            .unwrap()
            .record;
        assert_eq!(retitled.title, "Laundry");
        assert!(retitled.is_checked);
        assert_eq!(retitled.list_id, list.id);
        assert_eq!(retitled.created_at, item.created_at);

        assert!(matches!(
            store.update_item("s1", ItemPatch::new(&item.id).title("")),
            Err(StoreError::ValidationFailed(_))
        ));
        assert!(matches!(
            store.update_item("s2", ItemPatch::new(&item.id).checked(false)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_item() {
        let store = signed_in();
        let list = store.create_list("s1", "L").unwrap().record;
        let item = store.create_item("s1", &list.id, "x").unwrap().record;

        let deleted = store.delete_item("s1", &item.id).unwrap();
        assert_eq!(deleted.record, item);
        assert!(store.items_for("s1", &list.id).unwrap().is_empty());
        assert!(matches!(store.delete_item("s1", &item.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_notes() {
        let store = signed_in();
        assert!(matches!(
            store.create_note("s1", &serde_json::Value::Null),
            Err(StoreError::ValidationFailed(_))
        ));

        let note = store.create_note("s1", &json!({"blocks": []})).unwrap().record;
        assert_eq!(note.content, r#"{"blocks":[]}"#);

        let updated = store
            .update_note("s1", &note.id, &json!("hello"), Some("tab-1".into()))
            .unwrap()
            .record;
        assert_eq!(updated.content, "\"hello\"");
        assert_eq!(updated.instance_id.as_deref(), Some("tab-1"));
        assert_eq!(updated.created_at, note.created_at);

        assert!(matches!(
            store.update_note("s2", &note.id, &json!("x"), None),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.notes_for("s1").unwrap(), vec![updated]);
        assert!(store.notes_for("s2").unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk_and_reopen() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig {
            sync_on_commit: false,
            ..StoreConfig::at(temp.path().join("store"))
        };

        let list_id = {
            let store = Store::open_or_create(config.clone()).unwrap();
            store.identity().sign_in(&User::new("u1"), "s1").unwrap();
            store.create_list("s1", "Persisted").unwrap().record.id
        };

        let store = Store::open_or_create(config).unwrap();
        let lists = store.lists_for("s1").unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].id, list_id);
    }

    #[test]
    fn test_missing_store_without_create() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig {
            create_if_missing: false,
            ..StoreConfig::at(temp.path().join("absent"))
        };
        assert!(matches!(Store::open_or_create(config), Err(StoreError::NotInitialized)));
    }
}
