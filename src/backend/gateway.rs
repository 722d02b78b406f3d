//! Remote data gateway: one async operation per remote action.
//!
//! Compound writes (post create/update, profile update) sequence an upload,
//! a preview URL and a document write. If a step after the upload fails, the
//! uploaded file is deleted before the error is returned. The file a document
//! used to reference is deleted only after the new write is confirmed.

use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

use super::api_types::{ApiDocument, DocumentQuery};
use super::client::{Collection, Platform};
use super::types::{
  parse_tags, Account, FileUpload, NewPost, NewUser, Post, PreviewOptions, SaveRecord, Session,
  StoredFile, UpdatePost, UpdateUser, User,
};
use crate::error::{GatewayError, GatewayResult};
use crate::ids;
use crate::session::SessionContext;

/// Latest posts shown on the home feed
const RECENT_POSTS_LIMIT: u32 = 20;

/// Gateway over the platform, bound to a session context
#[derive(Clone)]
pub struct Gateway {
  platform: Arc<dyn Platform>,
  session: SessionContext,
}

impl Gateway {
  pub fn new(platform: Arc<dyn Platform>, session: SessionContext) -> Self {
    Self { platform, session }
  }

  pub fn session(&self) -> &SessionContext {
    &self.session
  }

  fn require_session(&self) -> GatewayResult<Session> {
    self.session.current().ok_or(GatewayError::Unauthenticated)
  }

  // ==========================================================================
  // Auth
  // ==========================================================================

  /// Sign up: account, then the user's profile document with an initials avatar.
  pub async fn create_user_account(&self, user: NewUser) -> GatewayResult<User> {
    let account = self
      .platform
      .create_account(&ids::unique(), &user.email, &user.password, &user.name)
      .await?;

    let avatar = self.platform.avatar_initials(&account.name)?;

    let doc = self
      .platform
      .create_document(
        None,
        Collection::Users,
        &ids::unique(),
        json!({
          "accountId": account.id,
          "name": account.name,
          "email": account.email,
          "username": user.username,
          "imageUrl": avatar.as_str(),
        }),
      )
      .await?;

    info!(account = %account.id, user = %doc.id, "account created");
    Ok(doc.into_user()?)
  }

  pub async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session> {
    let session = self.platform.create_session(email, password).await?;
    self.session.begin(session.clone());
    Ok(session)
  }

  /// Delete the remote session and tear down the local one. A session the
  /// platform no longer knows about is still torn down locally.
  pub async fn sign_out(&self) -> GatewayResult<()> {
    let Some(session) = self.session.current() else {
      return Ok(());
    };

    match self.platform.delete_session(&session).await {
      Ok(()) | Err(GatewayError::NotFound { .. }) | Err(GatewayError::Unauthenticated) => {
        self.session.end();
        Ok(())
      }
      Err(e) => Err(e),
    }
  }

  pub async fn get_account(&self) -> GatewayResult<Account> {
    let session = self.require_session()?;

    match self.platform.get_account(&session).await {
      Err(GatewayError::Unauthenticated) => {
        warn!("session rejected by platform");
        self.session.end();
        Err(GatewayError::Unauthenticated)
      }
      other => other,
    }
  }

  pub async fn get_current_user(&self) -> GatewayResult<User> {
    let account = self.get_account().await?;
    let session = self.session.current();

    let doc = self
      .platform
      .list_documents(
        session.as_ref(),
        Collection::Users,
        &[DocumentQuery::equal("accountId", account.id.as_str())],
      )
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| GatewayError::not_found(format!("user for account {}", account.id)))?;

    Ok(doc.into_user()?)
  }

  // ==========================================================================
  // Files
  // ==========================================================================

  pub async fn upload_file(&self, file: FileUpload) -> GatewayResult<StoredFile> {
    let session = self.require_session()?;
    self.upload_with(&session, file).await
  }

  async fn upload_with(&self, session: &Session, file: FileUpload) -> GatewayResult<StoredFile> {
    let stored = self
      .platform
      .upload_file(Some(session), &ids::unique(), file)
      .await?;
    info!(file = %stored.id, size = stored.size, "file uploaded");
    Ok(stored)
  }

  pub fn get_file_preview(&self, file_id: &str) -> GatewayResult<Url> {
    self
      .platform
      .file_preview(file_id, &PreviewOptions::default())
  }

  pub async fn delete_file(&self, file_id: &str) -> GatewayResult<()> {
    let session = self.session.current();
    self.platform.delete_file(session.as_ref(), file_id).await
  }

  /// Delete a just-uploaded file after a later step failed.
  /// Returns the error the caller should report.
  async fn compensate(&self, session: &Session, file_id: &str, cause: GatewayError) -> GatewayError {
    warn!(file = %file_id, error = %cause, "write failed, deleting uploaded file");

    match self.platform.delete_file(Some(session), file_id).await {
      Ok(()) => cause,
      Err(cleanup) => {
        error!(file = %file_id, error = %cleanup, "cleanup failed, file is orphaned");
        GatewayError::CompensationFailed {
          cause: Box::new(cause),
          cleanup: Box::new(cleanup),
          orphaned_file: file_id.to_string(),
        }
      }
    }
  }

  /// Upload `file` and resolve its preview URL, deleting the upload if the
  /// preview can't be produced.
  async fn upload_with_preview(
    &self,
    session: &Session,
    file: FileUpload,
  ) -> GatewayResult<(StoredFile, Url)> {
    let stored = self.upload_with(session, file).await?;

    match self.get_file_preview(&stored.id) {
      Ok(url) => Ok((stored, url)),
      Err(e) => Err(self.compensate(session, &stored.id, e).await),
    }
  }

  /// Delete a file the entity no longer references. The entity is already
  /// consistent, so a failure here only leaves an orphan behind.
  async fn discard_replaced(&self, session: &Session, file_id: &str) {
    if let Err(e) = self.platform.delete_file(Some(session), file_id).await {
      warn!(file = %file_id, error = %e, "replaced file not deleted, left orphaned");
    }
  }

  // ==========================================================================
  // Posts
  // ==========================================================================

  pub async fn create_post(&self, post: NewPost) -> GatewayResult<Post> {
    let session = self.require_session()?;
    let (file, image_url) = self.upload_with_preview(&session, post.file).await?;

    let data = json!({
      "creator": post.user_id,
      "caption": post.caption,
      "imageUrl": image_url.as_str(),
      "imageId": file.id,
      "location": post.location,
      "tags": parse_tags(&post.tags),
    });

    let doc = match self
      .platform
      .create_document(Some(&session), Collection::Posts, &ids::unique(), data)
      .await
    {
      Ok(doc) => doc,
      Err(e) => return Err(self.compensate(&session, &file.id, e).await),
    };

    info!(post = %doc.id, "post created");
    Ok(doc.into_post()?)
  }

  pub async fn update_post(&self, post: UpdatePost) -> GatewayResult<Post> {
    let session = self.require_session()?;

    let uploaded = match post.file {
      Some(file) => Some(self.upload_with_preview(&session, file).await?),
      None => None,
    };
    let (image_id, image_url) = match &uploaded {
      Some((file, url)) => (file.id.clone(), url.to_string()),
      None => (post.image_id.clone(), post.image_url.clone()),
    };

    let data = json!({
      "caption": post.caption,
      "imageUrl": image_url,
      "imageId": image_id,
      "location": post.location,
      "tags": parse_tags(&post.tags),
    });

    let doc = match self
      .platform
      .update_document(Some(&session), Collection::Posts, &post.post_id, data)
      .await
    {
      Ok(doc) => doc,
      Err(e) => {
        return Err(match &uploaded {
          Some((file, _)) => self.compensate(&session, &file.id, e).await,
          None => e,
        })
      }
    };

    if uploaded.is_some() {
      self.discard_replaced(&session, &post.image_id).await;
    }

    info!(post = %doc.id, "post updated");
    Ok(doc.into_post()?)
  }

  /// Delete a post document, then its image.
  pub async fn delete_post(&self, post_id: &str, image_id: &str) -> GatewayResult<()> {
    if post_id.is_empty() || image_id.is_empty() {
      return Err(GatewayError::InvalidInput(
        "post id and image id are required".to_string(),
      ));
    }
    let session = self.require_session()?;

    self
      .platform
      .delete_document(Some(&session), Collection::Posts, post_id)
      .await?;
    self.discard_replaced(&session, image_id).await;

    info!(post = %post_id, "post deleted");
    Ok(())
  }

  /// Replace the likers of a post with `likes`, in full.
  ///
  /// Two clients writing concurrently race; whichever write lands last wins.
  pub async fn like_post(&self, post_id: &str, likes: &[String]) -> GatewayResult<Post> {
    let session = self.require_session()?;

    let doc = self
      .platform
      .update_document(
        Some(&session),
        Collection::Posts,
        post_id,
        json!({ "likes": likes }),
      )
      .await?;

    Ok(doc.into_post()?)
  }

  /// Save a post for a user, reusing the existing record for the pair.
  pub async fn save_post(&self, user_id: &str, post_id: &str) -> GatewayResult<SaveRecord> {
    let session = self.require_session()?;

    let existing = self
      .platform
      .list_documents(
        Some(&session),
        Collection::Saves,
        &[
          DocumentQuery::equal("user", user_id),
          DocumentQuery::equal("post", post_id),
          DocumentQuery::Limit(1),
        ],
      )
      .await?;
    if let Some(doc) = existing.into_iter().next() {
      info!(save = %doc.id, "post already saved");
      return Ok(doc.into_save()?);
    }

    let doc = self
      .platform
      .create_document(
        Some(&session),
        Collection::Saves,
        &ids::unique(),
        json!({ "user": user_id, "post": post_id }),
      )
      .await?;

    Ok(doc.into_save()?)
  }

  pub async fn delete_saved_post(&self, save_id: &str) -> GatewayResult<()> {
    let session = self.require_session()?;
    self
      .platform
      .delete_document(Some(&session), Collection::Saves, save_id)
      .await
  }

  pub async fn get_post_by_id(&self, post_id: &str) -> GatewayResult<Post> {
    if post_id.is_empty() {
      return Err(GatewayError::InvalidInput("post id is required".to_string()));
    }
    let session = self.session.current();

    let doc = self
      .platform
      .get_document(session.as_ref(), Collection::Posts, post_id)
      .await?;
    Ok(doc.into_post()?)
  }

  pub async fn get_recent_posts(&self) -> GatewayResult<Vec<Post>> {
    self
      .list_posts(&[
        DocumentQuery::order_desc("$createdAt"),
        DocumentQuery::Limit(RECENT_POSTS_LIMIT),
      ])
      .await
  }

  pub async fn get_user_posts(&self, user_id: &str) -> GatewayResult<Vec<Post>> {
    self
      .list_posts(&[
        DocumentQuery::equal("creator", user_id),
        DocumentQuery::order_desc("$createdAt"),
      ])
      .await
  }

  pub async fn search_posts(&self, term: &str) -> GatewayResult<Vec<Post>> {
    self
      .list_posts(&[DocumentQuery::search("caption", term)])
      .await
  }

  /// One page of the explore feed, newest update first.
  pub async fn get_infinite_posts(
    &self,
    cursor: Option<&str>,
    page_size: u32,
  ) -> GatewayResult<Vec<Post>> {
    let mut queries = vec![
      DocumentQuery::order_desc("$updatedAt"),
      DocumentQuery::Limit(page_size),
    ];
    if let Some(cursor) = cursor {
      queries.push(DocumentQuery::CursorAfter(cursor.to_string()));
    }

    self.list_posts(&queries).await
  }

  async fn list_posts(&self, queries: &[DocumentQuery]) -> GatewayResult<Vec<Post>> {
    let session = self.session.current();
    let docs = self
      .platform
      .list_documents(session.as_ref(), Collection::Posts, queries)
      .await?;

    Ok(
      docs
        .into_iter()
        .map(ApiDocument::into_post)
        .collect::<serde_json::Result<Vec<_>>>()?,
    )
  }

  // ==========================================================================
  // Users
  // ==========================================================================

  pub async fn get_users(&self, limit: Option<u32>) -> GatewayResult<Vec<User>> {
    let mut queries = vec![DocumentQuery::order_desc("$createdAt")];
    if let Some(limit) = limit {
      queries.push(DocumentQuery::Limit(limit));
    }

    let session = self.session.current();
    let docs = self
      .platform
      .list_documents(session.as_ref(), Collection::Users, &queries)
      .await?;

    Ok(
      docs
        .into_iter()
        .map(ApiDocument::into_user)
        .collect::<serde_json::Result<Vec<_>>>()?,
    )
  }

  pub async fn get_user_by_id(&self, user_id: &str) -> GatewayResult<User> {
    if user_id.is_empty() {
      return Err(GatewayError::InvalidInput("user id is required".to_string()));
    }
    let session = self.session.current();

    let doc = self
      .platform
      .get_document(session.as_ref(), Collection::Users, user_id)
      .await?;
    Ok(doc.into_user()?)
  }

  pub async fn update_user(&self, user: UpdateUser) -> GatewayResult<User> {
    let session = self.require_session()?;

    let uploaded = match user.file {
      Some(file) => Some(self.upload_with_preview(&session, file).await?),
      None => None,
    };
    let (image_id, image_url) = match &uploaded {
      Some((file, url)) => (Some(file.id.clone()), url.to_string()),
      None => (user.image_id.clone(), user.image_url.clone()),
    };

    let data = json!({
      "name": user.name,
      "bio": user.bio,
      "imageUrl": image_url,
      "imageId": image_id,
    });

    let doc = match self
      .platform
      .update_document(Some(&session), Collection::Users, &user.user_id, data)
      .await
    {
      Ok(doc) => doc,
      Err(e) => {
        return Err(match &uploaded {
          Some((file, _)) => self.compensate(&session, &file.id, e).await,
          None => e,
        })
      }
    };

    // An initials avatar has no file to delete
    if let (Some(_), Some(previous)) = (&uploaded, &user.image_id) {
      self.discard_replaced(&session, previous).await;
    }

    info!(user = %doc.id, "profile updated");
    Ok(doc.into_user()?)
  }
}
