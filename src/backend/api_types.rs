//! Serde types matching the platform's REST responses.
//!
//! These are kept apart from domain types: documents come back as an id,
//! timestamps and a loose field map, and are converted into `User`/`Post`/
//! `SaveRecord` once their fields are known.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use super::types::{Account, Post, SaveRecord, Session, StoredFile, User};

/// Re-serialize a value through JSON to convert between compatible types.
pub fn reserialize<T: DeserializeOwned>(value: impl Serialize) -> serde_json::Result<T> {
  serde_json::from_value(serde_json::to_value(value)?)
}

// ============================================================================
// Account / session / file / error
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiAccount {
  #[serde(rename = "$id")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub email: String,
}

impl From<ApiAccount> for Account {
  fn from(a: ApiAccount) -> Self {
    Account {
      id: a.id,
      name: a.name,
      email: a.email,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiSession {
  #[serde(rename = "$id")]
  pub id: String,
  #[serde(rename = "userId")]
  pub user_id: String,
  pub expire: DateTime<Utc>,
}

impl ApiSession {
  pub fn into_session(self, cookie: Option<String>) -> Session {
    Session {
      id: self.id,
      account_id: self.user_id,
      expires_at: self.expire,
      cookie,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiFile {
  #[serde(rename = "$id")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(rename = "sizeOriginal", default)]
  pub size: u64,
}

impl From<ApiFile> for StoredFile {
  fn from(f: ApiFile) -> Self {
    StoredFile {
      id: f.id,
      name: f.name,
      size: f.size,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub code: u16,
  #[serde(rename = "type", default)]
  pub kind: String,
}

// ============================================================================
// Documents
// ============================================================================

/// A database document: system attributes plus the collection's fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDocument {
  #[serde(rename = "$id")]
  pub id: String,
  #[serde(rename = "$createdAt")]
  pub created_at: DateTime<Utc>,
  #[serde(rename = "$updatedAt")]
  pub updated_at: DateTime<Utc>,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ApiDocumentList {
  #[serde(default)]
  pub total: u64,
  pub documents: Vec<ApiDocument>,
}

/// A relationship attribute: either the related id or the expanded document.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiRef {
  Id(String),
  Document {
    #[serde(rename = "$id")]
    id: String,
  },
}

impl ApiRef {
  pub fn into_id(self) -> String {
    match self {
      ApiRef::Id(id) | ApiRef::Document { id } => id,
    }
  }
}

#[derive(Debug, Deserialize)]
struct ApiUserFields {
  #[serde(rename = "accountId")]
  account_id: String,
  #[serde(default)]
  name: String,
  #[serde(default)]
  username: Option<String>,
  #[serde(default)]
  email: String,
  #[serde(rename = "imageUrl", default)]
  image_url: Option<String>,
  #[serde(rename = "imageId", default)]
  image_id: Option<String>,
  #[serde(default)]
  bio: Option<String>,
  #[serde(default)]
  save: Vec<ApiNestedSave>,
  #[serde(default)]
  liked: Vec<ApiRef>,
}

/// Save document as expanded inside a user; the back-reference may be absent.
#[derive(Debug, Deserialize)]
struct ApiNestedSave {
  #[serde(rename = "$id")]
  id: String,
  #[serde(default)]
  user: Option<ApiRef>,
  post: Option<ApiRef>,
}

#[derive(Debug, Deserialize)]
struct ApiPostFields {
  creator: ApiRef,
  #[serde(default)]
  caption: String,
  #[serde(rename = "imageUrl", default)]
  image_url: String,
  #[serde(rename = "imageId", default)]
  image_id: String,
  #[serde(default)]
  location: Option<String>,
  #[serde(default)]
  tags: Vec<String>,
  #[serde(default)]
  likes: Vec<ApiRef>,
}

#[derive(Debug, Deserialize)]
struct ApiSaveFields {
  user: ApiRef,
  post: ApiRef,
}

impl ApiDocument {
  pub fn into_user(self) -> serde_json::Result<User> {
    let fields: ApiUserFields = reserialize(&self.fields)?;
    let id = self.id;

    let saves = fields
      .save
      .into_iter()
      // A save whose post was deleted has nothing to point at
      .filter_map(|s| {
        let post = s.post?.into_id();
        Some(SaveRecord {
          id: s.id,
          user: s.user.map(ApiRef::into_id).unwrap_or_else(|| id.clone()),
          post,
        })
      })
      .collect();

    Ok(User {
      account_id: fields.account_id,
      name: fields.name,
      username: fields.username.unwrap_or_default(),
      email: fields.email,
      image_url: fields.image_url.unwrap_or_default(),
      image_id: fields.image_id,
      bio: fields.bio,
      saves,
      liked: fields.liked.into_iter().map(ApiRef::into_id).collect(),
      id,
    })
  }

  pub fn into_post(self) -> serde_json::Result<Post> {
    let fields: ApiPostFields = reserialize(&self.fields)?;

    Ok(Post {
      id: self.id,
      creator: fields.creator.into_id(),
      caption: fields.caption,
      image_url: fields.image_url,
      image_id: fields.image_id,
      location: fields.location.unwrap_or_default(),
      tags: fields.tags,
      likes: fields.likes.into_iter().map(ApiRef::into_id).collect(),
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }

  pub fn into_save(self) -> serde_json::Result<SaveRecord> {
    let fields: ApiSaveFields = reserialize(&self.fields)?;

    Ok(SaveRecord {
      id: self.id,
      user: fields.user.into_id(),
      post: fields.post.into_id(),
    })
  }
}

// ============================================================================
// Queries
// ============================================================================

/// One clause of a document list request.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentQuery {
  Equal(String, Value),
  Search(String, String),
  OrderDesc(String),
  Limit(u32),
  CursorAfter(String),
}

impl DocumentQuery {
  pub fn equal(attribute: &str, value: impl Into<Value>) -> Self {
    Self::Equal(attribute.to_string(), value.into())
  }

  pub fn search(attribute: &str, term: &str) -> Self {
    Self::Search(attribute.to_string(), term.to_string())
  }

  pub fn order_desc(attribute: &str) -> Self {
    Self::OrderDesc(attribute.to_string())
  }

  fn to_json(&self) -> Value {
    match self {
      Self::Equal(attr, value) => {
        json!({ "method": "equal", "attribute": attr, "values": [value] })
      }
      Self::Search(attr, term) => {
        json!({ "method": "search", "attribute": attr, "values": [term] })
      }
      Self::OrderDesc(attr) => json!({ "method": "orderDesc", "attribute": attr }),
      Self::Limit(n) => json!({ "method": "limit", "values": [n] }),
      Self::CursorAfter(id) => json!({ "method": "cursorAfter", "values": [id] }),
    }
  }
}

impl fmt::Display for DocumentQuery {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_json())
  }
}
