//! Caching implementations for Snapgram types.

use crate::cache::{CacheKey, Cacheable, QueryKey};

use super::types::{Post, SaveRecord, User};

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Post {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "post"
  }
}

impl Cacheable for User {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "user"
  }
}

impl Cacheable for SaveRecord {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "save"
  }
}

// ============================================================================
// Query key types
// ============================================================================

/// Every read the client caches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapgramQueryKey {
  /// Latest posts for the home feed
  RecentPosts,
  /// Explore feed, cursor-paginated by update time
  InfinitePosts,
  /// Any other list of posts
  Posts,
  /// Full-text search over captions; `None` addresses every search
  SearchPosts { term: Option<String> },
  PostById { id: Option<String> },
  /// Posts by one creator; `None` addresses every creator
  UserPosts { user_id: Option<String> },
  CurrentUser,
  Users { limit: Option<u32> },
  UserById { id: Option<String> },
}

impl SnapgramQueryKey {
  pub fn search(term: &str) -> Self {
    Self::SearchPosts {
      term: Some(term.to_string()),
    }
  }

  pub fn post(id: &str) -> Self {
    Self::PostById {
      id: Some(id.to_string()),
    }
  }

  pub fn user_posts(user_id: &str) -> Self {
    Self::UserPosts {
      user_id: Some(user_id.to_string()),
    }
  }

  pub fn user(id: &str) -> Self {
    Self::UserById {
      id: Some(id.to_string()),
    }
  }

  fn operation(&self) -> &'static str {
    match self {
      Self::RecentPosts => "getRecentPosts",
      Self::InfinitePosts => "getInfinitePosts",
      Self::Posts => "getPosts",
      Self::SearchPosts { .. } => "searchPosts",
      Self::PostById { .. } => "getPostById",
      Self::UserPosts { .. } => "getUserPosts",
      Self::CurrentUser => "getCurrentUser",
      Self::Users { .. } => "getUsers",
      Self::UserById { .. } => "getUserById",
    }
  }
}

impl QueryKey for SnapgramQueryKey {
  fn to_cache_key(&self) -> CacheKey {
    let key = CacheKey::new(self.operation());
    let param = match self {
      Self::SearchPosts { term } => term.as_ref().map(|t| normalize_term(t)),
      Self::PostById { id } | Self::UserById { id } => id.clone(),
      Self::UserPosts { user_id } => user_id.clone(),
      Self::Users { limit } => Some(limit.map(|l| l.to_string()).unwrap_or_default()),
      _ => None,
    };

    match param {
      Some(p) => key.with(p),
      None => key,
    }
  }

  fn description(&self) -> String {
    match self {
      Self::RecentPosts => "recent posts".to_string(),
      Self::InfinitePosts => "explore feed".to_string(),
      Self::Posts => "posts".to_string(),
      Self::SearchPosts { term: Some(t) } => format!("posts matching {}", t),
      Self::SearchPosts { term: None } => "all searches".to_string(),
      Self::PostById { id: Some(id) } => format!("post {}", id),
      Self::PostById { id: None } => "every post".to_string(),
      Self::UserPosts { user_id: Some(id) } => format!("posts by {}", id),
      Self::UserPosts { user_id: None } => "posts by every user".to_string(),
      Self::CurrentUser => "current user".to_string(),
      Self::Users { limit: Some(n) } => format!("{} users", n),
      Self::Users { limit: None } => "users".to_string(),
      Self::UserById { id: Some(id) } => format!("user {}", id),
      Self::UserById { id: None } => "every user".to_string(),
    }
  }
}

/// Normalize a search term for consistent keys.
/// Trims whitespace and lowercases for case-insensitive matching.
fn normalize_term(term: &str) -> String {
  term.trim().to_lowercase()
}

// ============================================================================
// Mutations
// ============================================================================

/// A successful write and the reads it can make stale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
  CreatePost,
  UpdatePost { post_id: String },
  DeletePost { post_id: String },
  LikePost { post_id: String },
  SavePost,
  DeleteSavedPost,
  UpdateUser { user_id: String },
}

impl Mutation {
  /// Keys to mark stale once the write succeeds.
  ///
  /// List views embed like counts and save state, so every list of posts
  /// is in the set of any mutation touching a post. Profiles embed the
  /// user's saves and likes, and these mutations only know the post, so
  /// every cached profile goes stale with them.
  pub fn invalidation_set(&self) -> Vec<CacheKey> {
    use SnapgramQueryKey as K;

    let keys: Vec<SnapgramQueryKey> = match self {
      Self::CreatePost => vec![
        K::RecentPosts,
        K::InfinitePosts,
        K::Posts,
        K::UserPosts { user_id: None },
      ],
      Self::UpdatePost { post_id } => vec![
        K::post(post_id),
        K::RecentPosts,
        K::InfinitePosts,
        K::Posts,
        K::UserPosts { user_id: None },
        K::SearchPosts { term: None },
      ],
      Self::DeletePost { post_id } | Self::LikePost { post_id } => vec![
        K::post(post_id),
        K::RecentPosts,
        K::InfinitePosts,
        K::Posts,
        K::UserPosts { user_id: None },
        K::SearchPosts { term: None },
        K::CurrentUser,
        K::UserById { id: None },
        K::Users { limit: None },
      ],
      Self::SavePost | Self::DeleteSavedPost => vec![
        K::RecentPosts,
        K::InfinitePosts,
        K::Posts,
        K::CurrentUser,
        K::UserById { id: None },
        K::Users { limit: None },
      ],
      Self::UpdateUser { user_id } => vec![
        K::CurrentUser,
        K::user(user_id),
        K::Users { limit: None },
      ],
    };

    keys.iter().map(|k| k.prefix_key()).collect()
  }
}

impl SnapgramQueryKey {
  /// Key used when invalidating: parameterless variants address the whole
  /// operation rather than the "no parameter" instance.
  fn prefix_key(&self) -> CacheKey {
    match self {
      Self::Users { limit: None } => CacheKey::new(self.operation()),
      _ => self.to_cache_key(),
    }
  }
}
