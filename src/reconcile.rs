//! Optimistic like and save toggles for one post as seen by one user.
//!
//! The local state flips before the remote write is sent. When the write
//! fails, `RollbackPolicy` decides whether the flip is undone.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::cached_client::CachedGateway;
use crate::backend::types::{Post, SaveRecord, User};
use crate::error::GatewayResult;

/// What to do with an optimistic change whose remote write failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackPolicy {
  /// Restore the state from before the toggle
  #[default]
  Revert,
  /// Leave the optimistic state in place until the next refresh
  Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeState {
  NotLiked,
  Liked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
  NotSaved,
  Saved,
}

/// Like and save state of a post for the viewing user
#[derive(Debug, Clone)]
pub struct PostStats {
  post_id: String,
  user_id: String,
  likes: Vec<String>,
  /// Save record known for this (user, post), if any
  save: Option<SaveRecord>,
  saved: bool,
  policy: RollbackPolicy,
}

impl PostStats {
  pub fn new(post: &Post, viewer: &User, policy: RollbackPolicy) -> Self {
    let save = viewer.save_for(&post.id).cloned();
    Self {
      post_id: post.id.clone(),
      user_id: viewer.id.clone(),
      likes: post.likes.clone(),
      saved: save.is_some(),
      save,
      policy,
    }
  }

  /// Re-sync with fresh server data, dropping any local divergence.
  pub fn refresh_from(&mut self, post: &Post, viewer: &User) {
    *self = Self::new(post, viewer, self.policy);
  }

  pub fn post_id(&self) -> &str {
    &self.post_id
  }

  pub fn likes(&self) -> &[String] {
    &self.likes
  }

  pub fn like_count(&self) -> usize {
    self.likes.len()
  }

  pub fn like_state(&self) -> LikeState {
    if self.likes.iter().any(|id| *id == self.user_id) {
      LikeState::Liked
    } else {
      LikeState::NotLiked
    }
  }

  pub fn save_state(&self) -> SaveState {
    if self.saved {
      SaveState::Saved
    } else {
      SaveState::NotSaved
    }
  }

  pub fn save_record(&self) -> Option<&SaveRecord> {
    self.save.as_ref()
  }

  /// Flip the viewer's like locally and return the resulting likers.
  /// Unliking removes every occurrence of the viewer.
  pub fn apply_like_toggle(&mut self) -> Vec<String> {
    match self.like_state() {
      LikeState::Liked => self.likes.retain(|id| *id != self.user_id),
      LikeState::NotLiked => self.likes.push(self.user_id.clone()),
    }
    self.likes.clone()
  }

  /// Toggle the like and send the full resulting likers list.
  pub async fn toggle_like(&mut self, client: &CachedGateway) -> GatewayResult<LikeState> {
    let before = self.likes.clone();
    let likes = self.apply_like_toggle();
    debug!(post = %self.post_id, likes = likes.len(), "optimistic like toggle");

    match client.like_post(&self.post_id, &likes).await {
      Ok(post) => {
        self.likes = post.likes;
        Ok(self.like_state())
      }
      Err(e) => {
        warn!(post = %self.post_id, error = %e, policy = ?self.policy, "like failed");
        if self.policy == RollbackPolicy::Revert {
          self.likes = before;
        }
        Err(e)
      }
    }
  }

  /// Save the post, or delete the known save record.
  pub async fn toggle_save(&mut self, client: &CachedGateway) -> GatewayResult<SaveState> {
    let before = (self.save.clone(), self.saved);

    let result = match self.save.take() {
      Some(record) => {
        self.saved = false;
        client.delete_saved_post(&record.id).await
      }
      None => {
        self.saved = true;
        client
          .save_post(&self.user_id, &self.post_id)
          .await
          .map(|record| self.save = Some(record))
      }
    };

    match result {
      Ok(()) => Ok(self.save_state()),
      Err(e) => {
        warn!(post = %self.post_id, error = %e, policy = ?self.policy, "save toggle failed");
        if self.policy == RollbackPolicy::Revert {
          (self.save, self.saved) = before;
        }
        Err(e)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::cache::SnapgramQueryKey;
  use crate::backend::client::Collection;
  use crate::backend::gateway::Gateway;
  use crate::backend::mock::{MockPlatform, Op};
  use crate::backend::types::{FileUpload, NewPost, NewUser};
  use crate::cache::{CacheLayer, MemoryStorage};
  use crate::session::SessionContext;
  use chrono::Utc;
  use std::sync::Arc;

  fn post_with_likes(likes: &[&str]) -> Post {
    Post {
      id: "p1".into(),
      creator: "u9".into(),
      caption: String::new(),
      image_url: String::new(),
      image_id: "f1".into(),
      location: String::new(),
      tags: Vec::new(),
      likes: likes.iter().map(|s| s.to_string()).collect(),
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  fn viewer(id: &str, saves: Vec<SaveRecord>) -> User {
    User {
      id: id.into(),
      account_id: format!("acct-{}", id),
      name: id.into(),
      username: id.into(),
      email: format!("{}@example.com", id),
      image_url: String::new(),
      image_id: None,
      bio: None,
      saves,
      liked: Vec::new(),
    }
  }

  #[test]
  fn test_like_toggle_adds_viewer_last() {
    let mut stats = PostStats::new(&post_with_likes(&["u1"]), &viewer("u2", vec![]), RollbackPolicy::Revert);
    assert_eq!(stats.like_state(), LikeState::NotLiked);

    assert_eq!(stats.apply_like_toggle(), vec!["u1", "u2"]);
    assert_eq!(stats.like_state(), LikeState::Liked);
    assert_eq!(stats.like_count(), 2);
  }

  #[test]
  fn test_unlike_removes_every_occurrence() {
    let mut stats = PostStats::new(
      &post_with_likes(&["u2", "u1", "u2"]),
      &viewer("u2", vec![]),
      RollbackPolicy::Revert,
    );
    assert_eq!(stats.apply_like_toggle(), vec!["u1"]);
  }

  #[test]
  fn test_even_toggles_restore_state() {
    let mut stats = PostStats::new(&post_with_likes(&["u1"]), &viewer("u2", vec![]), RollbackPolicy::Revert);
    for _ in 0..4 {
      stats.apply_like_toggle();
    }
    assert_eq!(stats.likes(), ["u1"]);
    assert_eq!(stats.like_state(), LikeState::NotLiked);
  }

  #[test]
  fn test_save_state_from_viewer_saves() {
    let record = SaveRecord {
      id: "s1".into(),
      user: "u2".into(),
      post: "p1".into(),
    };
    let stats = PostStats::new(&post_with_likes(&[]), &viewer("u2", vec![record.clone()]), RollbackPolicy::Keep);
    assert_eq!(stats.save_state(), SaveState::Saved);
    assert_eq!(stats.save_record(), Some(&record));
  }

  #[test]
  fn test_policy_from_yaml() {
    let keep: RollbackPolicy = serde_yaml::from_str("keep").unwrap();
    assert_eq!(keep, RollbackPolicy::Keep);
    assert_eq!(RollbackPolicy::default(), RollbackPolicy::Revert);
  }

  // --------------------------------------------------------------------------
  // Against the mock platform
  // --------------------------------------------------------------------------

  async fn sign_up(client: &CachedGateway, name: &str) -> User {
    let email = format!("{}@example.com", name);
    client
      .create_user_account(NewUser {
        name: name.to_string(),
        username: name.to_string(),
        email: email.clone(),
        password: "hunter22".into(),
      })
      .await
      .unwrap();
    client.sign_in(&email, "hunter22").await.unwrap();
    client.current_user().await.unwrap()
  }

  async fn setup() -> (CachedGateway, Arc<MockPlatform>, User, Post) {
    let platform = Arc::new(MockPlatform::new());
    let gateway = Gateway::new(platform.clone(), SessionContext::new());
    let client = CachedGateway::new(gateway, CacheLayer::new(MemoryStorage::new()), 9);

    let user = sign_up(&client, "ann").await;
    let post = client
      .create_post(NewPost {
        user_id: user.id.clone(),
        caption: "first".into(),
        file: FileUpload {
          name: "a.png".into(),
          mime: "image/png".into(),
          bytes: vec![1],
        },
        location: String::new(),
        tags: String::new(),
      })
      .await
      .unwrap();

    (client, platform, user, post)
  }

  #[tokio::test]
  async fn test_second_liker_is_appended_and_views_go_stale() {
    let (client, _platform, ann, post) = setup().await;

    let mut stats = PostStats::new(&post, &ann, RollbackPolicy::Revert);
    assert_eq!(stats.toggle_like(&client).await.unwrap(), LikeState::Liked);

    client.sign_out().await.unwrap();
    let bob = sign_up(&client, "bob").await;

    let post = client.post_by_id(&post.id).await.unwrap();
    client.recent_posts().await.unwrap();
    client.current_user().await.unwrap();

    let mut stats = PostStats::new(&post, &bob, RollbackPolicy::Revert);
    stats.toggle_like(&client).await.unwrap();
    assert_eq!(stats.likes(), [ann.id.clone(), bob.id.clone()]);

    let cache = client.cache();
    assert!(cache.needs_fetch(&SnapgramQueryKey::post(&post.id)));
    assert!(cache.needs_fetch(&SnapgramQueryKey::RecentPosts));
    assert!(cache.needs_fetch(&SnapgramQueryKey::CurrentUser));
    assert_eq!(client.post_by_id(&post.id).await.unwrap().likes, stats.likes());
  }

  #[tokio::test]
  async fn test_failed_like_reverts() {
    let (client, platform, ann, post) = setup().await;
    platform.fail_next(Op::UpdateDocument);

    let mut stats = PostStats::new(&post, &ann, RollbackPolicy::Revert);
    assert!(stats.toggle_like(&client).await.is_err());
    assert!(stats.likes().is_empty());
    assert_eq!(stats.like_state(), LikeState::NotLiked);
  }

  #[tokio::test]
  async fn test_failed_like_kept_with_keep_policy() {
    let (client, platform, ann, post) = setup().await;
    platform.fail_next(Op::UpdateDocument);

    let mut stats = PostStats::new(&post, &ann, RollbackPolicy::Keep);
    assert!(stats.toggle_like(&client).await.is_err());
    assert_eq!(stats.like_state(), LikeState::Liked);

    // The server never saw it
    assert!(client.post_by_id(&post.id).await.unwrap().likes.is_empty());
  }

  #[tokio::test]
  async fn test_save_toggle_round_trip() {
    let (client, platform, ann, post) = setup().await;

    let mut stats = PostStats::new(&post, &ann, RollbackPolicy::Revert);
    assert_eq!(stats.toggle_save(&client).await.unwrap(), SaveState::Saved);
    let record = stats.save_record().cloned().unwrap();

    let me = client.current_user().await.unwrap();
    assert_eq!(me.save_for(&post.id), Some(&record));

    // A fresh view of the same pair finds the record and deletes it
    let mut again = PostStats::new(&post, &me, RollbackPolicy::Revert);
    assert_eq!(again.toggle_save(&client).await.unwrap(), SaveState::NotSaved);
    assert_eq!(platform.document_count(Collection::Saves), 0);
  }

  #[tokio::test]
  async fn test_unsave_save_unsave_keeps_at_most_one_record() {
    let (client, platform, ann, post) = setup().await;
    client.save_post(&ann.id, &post.id).await.unwrap();
    let me = client.current_user().await.unwrap();

    let mut stats = PostStats::new(&post, &me, RollbackPolicy::Revert);
    assert_eq!(stats.save_state(), SaveState::Saved);

    let expected = [SaveState::NotSaved, SaveState::Saved, SaveState::NotSaved];
    for state in expected {
      assert_eq!(stats.toggle_save(&client).await.unwrap(), state);
      assert!(platform.document_count(Collection::Saves) <= 1);
    }
    assert_eq!(platform.document_count(Collection::Saves), 0);
    assert!(client.current_user().await.unwrap().save_for(&post.id).is_none());
  }

  #[tokio::test]
  async fn test_second_view_reuses_save_record() {
    let (client, platform, ann, post) = setup().await;

    let mut a = PostStats::new(&post, &ann, RollbackPolicy::Revert);
    let mut b = PostStats::new(&post, &ann, RollbackPolicy::Revert);
    a.toggle_save(&client).await.unwrap();
    b.toggle_save(&client).await.unwrap();

    assert_eq!(a.save_record(), b.save_record());
    assert_eq!(platform.document_count(Collection::Saves), 1);
  }

  #[tokio::test]
  async fn test_failed_save_reverts() {
    let (client, platform, ann, post) = setup().await;
    platform.fail_next(Op::CreateDocument);

    let mut stats = PostStats::new(&post, &ann, RollbackPolicy::Revert);
    assert!(stats.toggle_save(&client).await.is_err());
    assert_eq!(stats.save_state(), SaveState::NotSaved);
    assert!(stats.save_record().is_none());
  }

  #[tokio::test]
  async fn test_failed_unsave_restores_record() {
    let (client, platform, ann, post) = setup().await;
    let mut stats = PostStats::new(&post, &ann, RollbackPolicy::Revert);
    stats.toggle_save(&client).await.unwrap();
    let record = stats.save_record().cloned();

    platform.fail_next(Op::DeleteDocument);
    assert!(stats.toggle_save(&client).await.is_err());
    assert_eq!(stats.save_state(), SaveState::Saved);
    assert_eq!(stats.save_record().cloned(), record);
  }
}
