use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Authenticated platform account (credentials side of a user)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
  pub id: String,
  pub name: String,
  pub email: String,
}

/// An authenticated session with the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub id: String,
  pub account_id: String,
  pub expires_at: DateTime<Utc>,
  /// Fallback cookie sent back on every request made in this session
  pub cookie: Option<String>,
}

impl Session {
  pub fn is_expired(&self) -> bool {
    self.expires_at <= Utc::now()
  }
}

/// Profile document of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub account_id: String,
  pub name: String,
  pub username: String,
  pub email: String,
  pub image_url: String,
  pub image_id: Option<String>,
  pub bio: Option<String>,
  /// Posts this user saved, in save order
  pub saves: Vec<SaveRecord>,
  /// Ids of posts this user liked
  pub liked: Vec<String>,
}

impl User {
  /// The save record for `post_id`, if this user saved it.
  pub fn save_for(&self, post_id: &str) -> Option<&SaveRecord> {
    self.saves.iter().find(|s| s.post == post_id)
  }
}

/// A post in the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
  pub id: String,
  /// User id of the author
  pub creator: String,
  pub caption: String,
  pub image_url: String,
  pub image_id: String,
  pub location: String,
  pub tags: Vec<String>,
  /// User ids of everyone who liked the post
  pub likes: Vec<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Post {
  pub fn is_liked_by(&self, user_id: &str) -> bool {
    self.likes.iter().any(|id| id == user_id)
  }
}

/// Link between a user and a post they saved. One per (user, post).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRecord {
  pub id: String,
  pub user: String,
  pub post: String,
}

/// A file stored in the platform bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
  pub id: String,
  pub name: String,
  pub size: u64,
}

/// Binary payload for an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
  pub name: String,
  pub mime: String,
  pub bytes: Vec<u8>,
}

impl FileUpload {
  pub fn from_path(path: &Path) -> std::io::Result<Self> {
    let bytes = std::fs::read(path)?;
    let name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "upload".to_string());
    let mime = mime_for(path).to_string();

    Ok(Self { name, mime, bytes })
  }
}

fn mime_for(path: &Path) -> &'static str {
  let ext = path
    .extension()
    .map(|e| e.to_string_lossy().to_lowercase())
    .unwrap_or_default();

  match ext.as_str() {
    "png" => "image/png",
    "jpg" | "jpeg" => "image/jpeg",
    "gif" => "image/gif",
    "webp" => "image/webp",
    "svg" => "image/svg+xml",
    _ => "application/octet-stream",
  }
}

/// Image transformation for preview URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewOptions {
  pub width: u32,
  pub height: u32,
  pub gravity: String,
  pub quality: u8,
}

impl Default for PreviewOptions {
  fn default() -> Self {
    Self {
      width: 2000,
      height: 2000,
      gravity: "top".to_string(),
      quality: 100,
    }
  }
}

// ============================================================================
// Mutation inputs
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewUser {
  pub name: String,
  pub username: String,
  pub email: String,
  pub password: String,
}

#[derive(Debug, Clone)]
pub struct NewPost {
  pub user_id: String,
  pub caption: String,
  pub file: FileUpload,
  pub location: String,
  /// Comma separated, e.g. "art, travel"
  pub tags: String,
}

#[derive(Debug, Clone)]
pub struct UpdatePost {
  pub post_id: String,
  pub caption: String,
  /// Current image, replaced only if `file` is set
  pub image_id: String,
  pub image_url: String,
  pub file: Option<FileUpload>,
  pub location: String,
  pub tags: String,
}

#[derive(Debug, Clone)]
pub struct UpdateUser {
  pub user_id: String,
  pub name: String,
  pub bio: Option<String>,
  /// Current avatar file, if the avatar is an uploaded file
  pub image_id: Option<String>,
  pub image_url: String,
  pub file: Option<FileUpload>,
}

/// Split a comma separated tag list. Spaces are dropped, as are empty tags.
pub fn parse_tags(input: &str) -> Vec<String> {
  input
    .replace(' ', "")
    .split(',')
    .filter(|t| !t.is_empty())
    .map(String::from)
    .collect()
}
