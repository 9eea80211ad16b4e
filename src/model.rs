//! Entity shapes stored by the repositories.
//!
//! Field names on the wire follow the camelCase convention clients expect
//! (`userId`, `listId`, `isChecked`, `createdAt`).

use crate::types::{new_id, Timestamp};
use serde::{Deserialize, Serialize};

/// A signed-in principal. Owns lists and notes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
            image: None,
        }
    }
}

/// A named list owned by a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub id: String,
    pub name: String,
    #[serde(rename = "userId")]
    pub owner_id: String,
    pub created_at: Timestamp,
}

impl List {
    /// A new list with a fresh id.
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            owner_id: owner_id.into(),
            created_at: Timestamp::now(),
        }
    }
}

/// An entry of a list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub title: String,
    pub list_id: String,
    pub is_checked: bool,
    pub created_at: Timestamp,
}

impl Item {
    /// A new, unchecked item with a fresh id.
    pub fn new(list_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            title: title.into(),
            list_id: list_id.into(),
            is_checked: false,
            created_at: Timestamp::now(),
        }
    }
}

/// A free-form document owned by a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    /// Serialized editor content.
    pub content: String,
    #[serde(rename = "userId")]
    pub owner_id: String,
    /// Editor instance that produced this revision, so it can skip its own echo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub created_at: Timestamp,
}

impl Note {
    pub fn new(owner_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            content: content.into(),
            owner_id: owner_id.into(),
            instance_id: None,
            created_at: Timestamp::now(),
        }
    }
}
