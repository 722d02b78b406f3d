//! Cached client that wraps the gateway with read-through caching.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheLayer, MemoryStorage, NoopStorage, Page};
use crate::config::Config;
use crate::error::GatewayResult;
use crate::query::InfiniteQuery;
use crate::session::{SessionContext, SessionStore};

use super::cache::{Mutation, SnapgramQueryKey};
use super::client::AppwriteClient;
use super::gateway::Gateway;
use super::types::{NewPost, NewUser, Post, SaveRecord, Session, UpdatePost, UpdateUser, User};

/// Snapgram client with transparent caching support.
///
/// Reads go through the cache; every successful write invalidates the reads
/// listed in its `Mutation::invalidation_set`. Failed writes invalidate
/// nothing.
#[derive(Clone)]
pub struct CachedGateway {
  inner: Gateway,
  cache: CacheLayer,
  page_size: u32,
}

impl CachedGateway {
  pub fn new(inner: Gateway, cache: CacheLayer, page_size: u32) -> Self {
    Self {
      inner,
      cache,
      page_size,
    }
  }

  /// Build the client described by `config`: Appwrite platform, persisted
  /// session, and the configured cache backend.
  pub fn from_config(config: &Config) -> Result<Self> {
    let platform = AppwriteClient::new(&config.appwrite)?;
    let session = SessionContext::with_store(SessionStore::open()?)?;
    let gateway = Gateway::new(Arc::new(platform), session);

    let cache = if config.cache.enabled {
      CacheLayer::new(MemoryStorage::new())
    } else {
      CacheLayer::new(NoopStorage)
    }
    .with_stale_time(config.cache.stale_time()?);

    Ok(Self::new(gateway, cache, config.feed.page_size))
  }

  pub fn gateway(&self) -> &Gateway {
    &self.inner
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  pub fn session(&self) -> &SessionContext {
    self.inner.session()
  }

  fn apply(&self, mutation: Mutation) {
    let mut count = 0;
    for prefix in mutation.invalidation_set() {
      count += self.cache.invalidate(&prefix);
    }
    debug!(?mutation, entries = count, "applied invalidation set");
  }

  // ==========================================================================
  // Auth
  // ==========================================================================

  pub async fn create_user_account(&self, user: NewUser) -> GatewayResult<User> {
    let user = self.inner.create_user_account(user).await?;
    self.apply(Mutation::UpdateUser {
      user_id: user.id.clone(),
    });
    Ok(user)
  }

  pub async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session> {
    let session = self.inner.sign_in(email, password).await?;
    self.cache.clear();
    Ok(session)
  }

  pub async fn sign_out(&self) -> GatewayResult<()> {
    self.inner.sign_out().await?;
    self.cache.clear();
    info!("signed out, cache cleared");
    Ok(())
  }

  /// Current user, cached.
  pub async fn current_user(&self) -> GatewayResult<User> {
    let inner = self.inner.clone();
    let result = self
      .cache
      .fetch(&SnapgramQueryKey::CurrentUser, move || async move {
        inner.get_current_user().await
      })
      .await?;
    Ok(result.data)
  }

  // ==========================================================================
  // Post reads
  // ==========================================================================

  pub async fn recent_posts(&self) -> GatewayResult<Vec<Post>> {
    let inner = self.inner.clone();
    let result = self
      .cache
      .fetch(&SnapgramQueryKey::RecentPosts, move || async move {
        inner.get_recent_posts().await
      })
      .await?;
    Ok(result.data)
  }

  pub async fn post_by_id(&self, post_id: &str) -> GatewayResult<Post> {
    let inner = self.inner.clone();
    let id = post_id.to_string();
    let result = self
      .cache
      .fetch(&SnapgramQueryKey::post(post_id), move || async move {
        inner.get_post_by_id(&id).await
      })
      .await?;
    Ok(result.data)
  }

  pub async fn user_posts(&self, user_id: &str) -> GatewayResult<Vec<Post>> {
    let inner = self.inner.clone();
    let id = user_id.to_string();
    let result = self
      .cache
      .fetch(&SnapgramQueryKey::user_posts(user_id), move || async move {
        inner.get_user_posts(&id).await
      })
      .await?;
    Ok(result.data)
  }

  /// Search captions. An empty term is a disabled query: no request, no results.
  pub async fn search_posts(&self, term: &str) -> GatewayResult<Vec<Post>> {
    if term.trim().is_empty() {
      return Ok(Vec::new());
    }

    let inner = self.inner.clone();
    let term_owned = term.trim().to_string();
    let result = self
      .cache
      .fetch(&SnapgramQueryKey::search(term), move || async move {
        inner.search_posts(&term_owned).await
      })
      .await?;
    Ok(result.data)
  }

  /// One page of the explore feed.
  pub async fn posts_page(&self, cursor: Option<&str>) -> GatewayResult<Page<Post>> {
    let inner = self.inner.clone();
    let page_size = self.page_size;
    self
      .cache
      .fetch_page(&SnapgramQueryKey::InfinitePosts, cursor, move |cursor| async move {
        inner.get_infinite_posts(cursor.as_deref(), page_size).await
      })
      .await
  }

  /// Paginated handle over the explore feed.
  pub fn infinite_posts(&self) -> InfiniteQuery<Post> {
    let inner = self.inner.clone();
    let page_size = self.page_size;
    InfiniteQuery::new(
      self.cache.clone(),
      SnapgramQueryKey::InfinitePosts,
      move |cursor| {
        let inner = inner.clone();
        async move { inner.get_infinite_posts(cursor.as_deref(), page_size).await }
      },
    )
  }

  // ==========================================================================
  // Post writes
  // ==========================================================================

  pub async fn create_post(&self, post: NewPost) -> GatewayResult<Post> {
    let post = self.inner.create_post(post).await?;
    self.apply(Mutation::CreatePost);
    Ok(post)
  }

  pub async fn update_post(&self, post: UpdatePost) -> GatewayResult<Post> {
    let post = self.inner.update_post(post).await?;
    self.apply(Mutation::UpdatePost {
      post_id: post.id.clone(),
    });
    Ok(post)
  }

  pub async fn delete_post(&self, post_id: &str, image_id: &str) -> GatewayResult<()> {
    self.inner.delete_post(post_id, image_id).await?;
    self.apply(Mutation::DeletePost {
      post_id: post_id.to_string(),
    });
    Ok(())
  }

  pub async fn like_post(&self, post_id: &str, likes: &[String]) -> GatewayResult<Post> {
    let post = self.inner.like_post(post_id, likes).await?;
    self.apply(Mutation::LikePost {
      post_id: post_id.to_string(),
    });
    Ok(post)
  }

  pub async fn save_post(&self, user_id: &str, post_id: &str) -> GatewayResult<SaveRecord> {
    let record = self.inner.save_post(user_id, post_id).await?;
    self.apply(Mutation::SavePost);
    Ok(record)
  }

  pub async fn delete_saved_post(&self, save_id: &str) -> GatewayResult<()> {
    self.inner.delete_saved_post(save_id).await?;
    self.apply(Mutation::DeleteSavedPost);
    Ok(())
  }

  // ==========================================================================
  // Users
  // ==========================================================================

  pub async fn users(&self, limit: Option<u32>) -> GatewayResult<Vec<User>> {
    let inner = self.inner.clone();
    let result = self
      .cache
      .fetch(&SnapgramQueryKey::Users { limit }, move || async move {
        inner.get_users(limit).await
      })
      .await?;
    Ok(result.data)
  }

  pub async fn user_by_id(&self, user_id: &str) -> GatewayResult<User> {
    let inner = self.inner.clone();
    let id = user_id.to_string();
    let result = self
      .cache
      .fetch(&SnapgramQueryKey::user(user_id), move || async move {
        inner.get_user_by_id(&id).await
      })
      .await?;
    Ok(result.data)
  }

  pub async fn update_user(&self, user: UpdateUser) -> GatewayResult<User> {
    let user = self.inner.update_user(user).await?;
    self.apply(Mutation::UpdateUser {
      user_id: user.id.clone(),
    });
    Ok(user)
  }
}
