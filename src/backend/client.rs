use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::backend::api_types::{
  ApiAccount, ApiDocument, ApiDocumentList, ApiError, ApiFile, ApiSession, DocumentQuery,
};
use crate::backend::types::{Account, FileUpload, PreviewOptions, Session, StoredFile};
use crate::config::AppwriteConfig;
use crate::error::{GatewayError, GatewayResult};

const FALLBACK_COOKIE_HEADER: &str = "x-fallback-cookies";

/// Database collections the client works with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  Users,
  Posts,
  Saves,
}

/// The backend platform: accounts, documents and file storage.
///
/// Every method is a single remote call. Calls that act on behalf of the user
/// take the current session, if any.
#[async_trait]
pub trait Platform: Send + Sync {
  async fn create_account(
    &self,
    account_id: &str,
    email: &str,
    password: &str,
    name: &str,
  ) -> GatewayResult<Account>;

  async fn create_session(&self, email: &str, password: &str) -> GatewayResult<Session>;

  async fn delete_session(&self, session: &Session) -> GatewayResult<()>;

  async fn get_account(&self, session: &Session) -> GatewayResult<Account>;

  /// URL of an initials avatar for `name`. Built locally, no request.
  fn avatar_initials(&self, name: &str) -> GatewayResult<Url>;

  async fn create_document(
    &self,
    session: Option<&Session>,
    collection: Collection,
    document_id: &str,
    data: Value,
  ) -> GatewayResult<ApiDocument>;

  async fn get_document(
    &self,
    session: Option<&Session>,
    collection: Collection,
    document_id: &str,
  ) -> GatewayResult<ApiDocument>;

  async fn update_document(
    &self,
    session: Option<&Session>,
    collection: Collection,
    document_id: &str,
    data: Value,
  ) -> GatewayResult<ApiDocument>;

  async fn delete_document(
    &self,
    session: Option<&Session>,
    collection: Collection,
    document_id: &str,
  ) -> GatewayResult<()>;

  async fn list_documents(
    &self,
    session: Option<&Session>,
    collection: Collection,
    queries: &[DocumentQuery],
  ) -> GatewayResult<Vec<ApiDocument>>;

  async fn upload_file(
    &self,
    session: Option<&Session>,
    file_id: &str,
    file: FileUpload,
  ) -> GatewayResult<StoredFile>;

  /// URL of a transformed preview of a stored image. Built locally, no request.
  fn file_preview(&self, file_id: &str, options: &PreviewOptions) -> GatewayResult<Url>;

  async fn delete_file(&self, session: Option<&Session>, file_id: &str) -> GatewayResult<()>;
}

/// Appwrite REST client
#[derive(Clone)]
pub struct AppwriteClient {
  http: reqwest::Client,
  endpoint: String,
  project_id: String,
  database_id: String,
  user_collection_id: String,
  post_collection_id: String,
  saves_collection_id: String,
  storage_id: String,
}

impl AppwriteClient {
  pub fn new(config: &AppwriteConfig) -> Result<Self> {
    Url::parse(&config.endpoint)
      .map_err(|e| eyre!("Invalid Appwrite endpoint {}: {}", config.endpoint, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("snapgram/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      endpoint: config.endpoint.trim_end_matches('/').to_string(),
      project_id: config.project_id.clone(),
      database_id: config.database_id.clone(),
      user_collection_id: config.user_collection_id.clone(),
      post_collection_id: config.post_collection_id.clone(),
      saves_collection_id: config.saves_collection_id.clone(),
      storage_id: config.storage_id.clone(),
    })
  }

  fn collection_id(&self, collection: Collection) -> &str {
    match collection {
      Collection::Users => &self.user_collection_id,
      Collection::Posts => &self.post_collection_id,
      Collection::Saves => &self.saves_collection_id,
    }
  }

  fn url(&self, path: &str) -> GatewayResult<Url> {
    Url::parse(&format!("{}{}", self.endpoint, path))
      .map_err(|e| GatewayError::InvalidResponse(format!("bad url for {}: {}", path, e)))
  }

  fn documents_path(&self, collection: Collection) -> String {
    format!(
      "/databases/{}/collections/{}/documents",
      self.database_id,
      self.collection_id(collection)
    )
  }

  fn request(
    &self,
    method: Method,
    path: &str,
    session: Option<&Session>,
  ) -> GatewayResult<RequestBuilder> {
    let url = self.url(path)?;
    debug!(%method, %url, "platform request");

    let mut builder = self
      .http
      .request(method, url)
      .header("X-Appwrite-Project", &self.project_id)
      .header("X-Appwrite-Response-Format", "1.5.0");

    if let Some(cookie) = session.and_then(|s| s.cookie.as_deref()) {
      builder = builder.header("X-Fallback-Cookies", cookie);
    }

    Ok(builder)
  }

  /// Turn an error status into a `GatewayError`, pass successes through.
  async fn check(response: Response) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let error: ApiError = serde_json::from_str(&body).unwrap_or(ApiError {
      message: body,
      code: status.as_u16(),
      kind: String::new(),
    });
    debug!(code = status.as_u16(), kind = %error.kind, "platform error");

    Err(match status {
      StatusCode::NOT_FOUND => GatewayError::not_found(error.message),
      StatusCode::UNAUTHORIZED => GatewayError::Unauthenticated,
      _ => GatewayError::Platform {
        code: status.as_u16(),
        message: error.message,
      },
    })
  }

  async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> GatewayResult<T> {
    let response = Self::check(builder.send().await?).await?;
    Ok(response.json().await?)
  }

  async fn send_empty(builder: RequestBuilder) -> GatewayResult<()> {
    Self::check(builder.send().await?).await?;
    Ok(())
  }
}

#[async_trait]
impl Platform for AppwriteClient {
  async fn create_account(
    &self,
    account_id: &str,
    email: &str,
    password: &str,
    name: &str,
  ) -> GatewayResult<Account> {
    let body = json!({
      "userId": account_id,
      "email": email,
      "password": password,
      "name": name,
    });
    let account: ApiAccount =
      Self::send(self.request(Method::POST, "/account", None)?.json(&body)).await?;
    Ok(account.into())
  }

  async fn create_session(&self, email: &str, password: &str) -> GatewayResult<Session> {
    let body = json!({ "email": email, "password": password });
    let response = self
      .request(Method::POST, "/account/sessions/email", None)?
      .json(&body)
      .send()
      .await?;

    let cookie = response
      .headers()
      .get(FALLBACK_COOKIE_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    let session: ApiSession = Self::check(response).await?.json().await?;
    Ok(session.into_session(cookie))
  }

  async fn delete_session(&self, session: &Session) -> GatewayResult<()> {
    let path = format!("/account/sessions/{}", session.id);
    Self::send_empty(self.request(Method::DELETE, &path, Some(session))?).await
  }

  async fn get_account(&self, session: &Session) -> GatewayResult<Account> {
    let account: ApiAccount =
      Self::send(self.request(Method::GET, "/account", Some(session))?).await?;
    Ok(account.into())
  }

  fn avatar_initials(&self, name: &str) -> GatewayResult<Url> {
    let mut url = self.url("/avatars/initials")?;
    url
      .query_pairs_mut()
      .append_pair("name", name)
      .append_pair("project", &self.project_id);
    Ok(url)
  }

  async fn create_document(
    &self,
    session: Option<&Session>,
    collection: Collection,
    document_id: &str,
    data: Value,
  ) -> GatewayResult<ApiDocument> {
    let body = json!({ "documentId": document_id, "data": data });
    let path = self.documents_path(collection);
    Self::send(self.request(Method::POST, &path, session)?.json(&body)).await
  }

  async fn get_document(
    &self,
    session: Option<&Session>,
    collection: Collection,
    document_id: &str,
  ) -> GatewayResult<ApiDocument> {
    let path = format!("{}/{}", self.documents_path(collection), document_id);
    Self::send(self.request(Method::GET, &path, session)?).await
  }

  async fn update_document(
    &self,
    session: Option<&Session>,
    collection: Collection,
    document_id: &str,
    data: Value,
  ) -> GatewayResult<ApiDocument> {
    let body = json!({ "data": data });
    let path = format!("{}/{}", self.documents_path(collection), document_id);
    Self::send(self.request(Method::PATCH, &path, session)?.json(&body)).await
  }

  async fn delete_document(
    &self,
    session: Option<&Session>,
    collection: Collection,
    document_id: &str,
  ) -> GatewayResult<()> {
    let path = format!("{}/{}", self.documents_path(collection), document_id);
    Self::send_empty(self.request(Method::DELETE, &path, session)?).await
  }

  async fn list_documents(
    &self,
    session: Option<&Session>,
    collection: Collection,
    queries: &[DocumentQuery],
  ) -> GatewayResult<Vec<ApiDocument>> {
    let params: Vec<(&str, String)> = queries.iter().map(|q| ("queries[]", q.to_string())).collect();
    let path = self.documents_path(collection);
    let list: ApiDocumentList =
      Self::send(self.request(Method::GET, &path, session)?.query(&params)).await?;

    debug!(total = list.total, returned = list.documents.len(), "listed documents");
    Ok(list.documents)
  }

  async fn upload_file(
    &self,
    session: Option<&Session>,
    file_id: &str,
    file: FileUpload,
  ) -> GatewayResult<StoredFile> {
    let part = reqwest::multipart::Part::bytes(file.bytes)
      .file_name(file.name)
      .mime_str(&file.mime)?;
    let form = reqwest::multipart::Form::new()
      .text("fileId", file_id.to_string())
      .part("file", part);

    let path = format!("/storage/buckets/{}/files", self.storage_id);
    let stored: ApiFile =
      Self::send(self.request(Method::POST, &path, session)?.multipart(form)).await?;
    Ok(stored.into())
  }

  fn file_preview(&self, file_id: &str, options: &PreviewOptions) -> GatewayResult<Url> {
    if file_id.is_empty() {
      return Err(GatewayError::InvalidInput("empty file id".to_string()));
    }

    let path = format!("/storage/buckets/{}/files/{}/preview", self.storage_id, file_id);
    let mut url = self.url(&path)?;
    url
      .query_pairs_mut()
      .append_pair("width", &options.width.to_string())
      .append_pair("height", &options.height.to_string())
      .append_pair("gravity", &options.gravity)
      .append_pair("quality", &options.quality.to_string())
      .append_pair("project", &self.project_id);
    Ok(url)
  }

  async fn delete_file(&self, session: Option<&Session>, file_id: &str) -> GatewayResult<()> {
    let path = format!("/storage/buckets/{}/files/{}", self.storage_id, file_id);
    Self::send_empty(self.request(Method::DELETE, &path, session)?).await
  }
}
