//! Key layout strategies, one per entity kind.

use crate::model::{Item, List, Note};
use crate::types::Key;

/// How one entity kind maps onto store keys.
///
/// A record lives under its primary key and is mirrored under an index key
/// built from its parent key, so "all records of a parent" is a prefix scan.
pub struct EntityKind<T> {
    /// Topic kind for change notifications, e.g. `lists_by_userId`.
    pub name: &'static str,
    primary_key: fn(&str) -> Key,
    index_key: fn(&str, &str) -> Key,
    index_prefix: fn(&str) -> Key,
    id_of: fn(&T) -> &str,
    parent_of: fn(&T) -> &str,
}

impl<T> Clone for EntityKind<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EntityKind<T> {}

impl<T> EntityKind<T> {
    pub fn new(
        name: &'static str,
        primary_key: fn(&str) -> Key,
        index_key: fn(&str, &str) -> Key,
        index_prefix: fn(&str) -> Key,
        id_of: fn(&T) -> &str,
        parent_of: fn(&T) -> &str,
    ) -> Self {
        Self {
            name,
            primary_key,
            index_key,
            index_prefix,
            id_of,
            parent_of,
        }
    }

    pub fn primary_key(&self, id: &str) -> Key {
        (self.primary_key)(id)
    }

    pub fn index_key(&self, parent: &str, id: &str) -> Key {
        (self.index_key)(parent, id)
    }

    pub fn index_prefix(&self, parent: &str) -> Key {
        (self.index_prefix)(parent)
    }

    pub fn id_of<'a>(&self, record: &'a T) -> &'a str {
        (self.id_of)(record)
    }

    pub fn parent_of<'a>(&self, record: &'a T) -> &'a str {
        (self.parent_of)(record)
    }
}

impl EntityKind<List> {
    /// Lists, indexed by owner.
    pub fn lists() -> Self {
        fn primary(id: &str) -> Key {
            Key::new(["lists", id])
        }
        fn index(owner: &str, id: &str) -> Key {
            Key::new(["lists_by_userId", owner, id])
        }
        fn prefix(owner: &str) -> Key {
            Key::new(["lists_by_userId", owner])
        }
        fn id(list: &List) -> &str {
            &list.id
        }
        fn owner(list: &List) -> &str {
            &list.owner_id
        }

        Self::new("lists_by_userId", primary, index, prefix, id, owner)
    }
}

impl EntityKind<Item> {
    /// List items, indexed by their list.
    pub fn items() -> Self {
        fn primary(id: &str) -> Key {
            Key::new(["items", id])
        }
        fn index(list: &str, id: &str) -> Key {
            Key::new(["items_by_listId", list, id])
        }
        fn prefix(list: &str) -> Key {
            Key::new(["items_by_listId", list])
        }
        fn id(item: &Item) -> &str {
            &item.id
        }
        fn list(item: &Item) -> &str {
            &item.list_id
        }

        Self::new("items_by_listId", primary, index, prefix, id, list)
    }
}

impl EntityKind<Note> {
    /// Notes, indexed by owner.
    pub fn notes() -> Self {
        fn primary(id: &str) -> Key {
            Key::new(["notes", id])
        }
        fn index(owner: &str, id: &str) -> Key {
            Key::new(["notes_by_userId", owner, id])
        }
        fn prefix(owner: &str) -> Key {
            Key::new(["notes_by_userId", owner])
        }
        fn id(note: &Note) -> &str {
            &note.id
        }
        fn owner(note: &Note) -> &str {
            &note.owner_id
        }

        Self::new("notes_by_userId", primary, index, prefix, id, owner)
    }
}
