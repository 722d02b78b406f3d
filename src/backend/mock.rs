//! In-memory platform for tests: records calls and injects failures.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;
use url::Url;

use super::api_types::{ApiDocument, DocumentQuery};
use super::client::{Collection, Platform};
use super::types::{Account, FileUpload, PreviewOptions, Session, StoredFile};
use crate::error::{GatewayError, GatewayResult};

/// Platform operations that can be counted or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  CreateDocument,
  GetDocument,
  UpdateDocument,
  DeleteDocument,
  ListDocuments,
  UploadFile,
  Preview,
  DeleteFile,
}

struct MockAccount {
  account: Account,
  password: String,
}

#[derive(Default)]
struct State {
  accounts: Vec<MockAccount>,
  documents: HashMap<Collection, Vec<ApiDocument>>,
  files: HashMap<String, FileUpload>,
  uploaded: Vec<String>,
  deleted_files: Vec<String>,
  calls: HashMap<Op, usize>,
  failures: HashMap<Op, usize>,
  clock: i64,
}

impl State {
  /// Deterministic, strictly increasing timestamps
  fn tick(&mut self) -> DateTime<Utc> {
    self.clock += 1;
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(self.clock)
  }

  fn record(&mut self, op: Op) -> GatewayResult<()> {
    *self.calls.entry(op).or_default() += 1;

    match self.failures.get_mut(&op) {
      Some(n) if *n > 0 => {
        *n -= 1;
        Err(GatewayError::Platform {
          code: 500,
          message: format!("injected {:?} failure", op),
        })
      }
      _ => Ok(()),
    }
  }

  fn collection(&mut self, collection: Collection) -> &mut Vec<ApiDocument> {
    self.documents.entry(collection).or_default()
  }

  /// Expand a user's saves and liked posts the way the platform expands
  /// relationships.
  fn hydrate(&self, collection: Collection, mut doc: ApiDocument) -> ApiDocument {
    if collection == Collection::Users {
      let user_id = Value::String(doc.id.clone());
      let saves: Vec<Value> = self
        .documents
        .get(&Collection::Saves)
        .into_iter()
        .flatten()
        .filter(|s| s.fields.get("user") == Some(&user_id))
        .map(|s| json!({ "$id": s.id, "post": s.fields.get("post").cloned() }))
        .collect();
      let liked: Vec<Value> = self
        .documents
        .get(&Collection::Posts)
        .into_iter()
        .flatten()
        .filter(|p| {
          p.fields
            .get("likes")
            .and_then(Value::as_array)
            .is_some_and(|likes| likes.contains(&user_id))
        })
        .map(|p| json!({ "$id": p.id }))
        .collect();
      doc.fields.insert("save".to_string(), Value::Array(saves));
      doc.fields.insert("liked".to_string(), Value::Array(liked));
    }
    doc
  }
}

pub struct MockPlatform {
  state: Mutex<State>,
  latency: Option<StdDuration>,
}

impl MockPlatform {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(State::default()),
      latency: None,
    }
  }

  /// Delay every document read and write, to hold requests in flight.
  pub fn with_latency(mut self, latency: StdDuration) -> Self {
    self.latency = Some(latency);
    self
  }

  fn state(&self) -> std::sync::MutexGuard<'_, State> {
    self.state.lock().unwrap()
  }

  async fn delay(&self) {
    if let Some(latency) = self.latency {
      tokio::time::sleep(latency).await;
    }
  }

  /// Make the next call of `op` fail. Stacks.
  pub fn fail_next(&self, op: Op) {
    *self.state().failures.entry(op).or_default() += 1;
  }

  pub fn count(&self, op: Op) -> usize {
    self.state().calls.get(&op).copied().unwrap_or(0)
  }

  pub fn has_file(&self, file_id: &str) -> bool {
    self.state().files.contains_key(file_id)
  }

  pub fn file_count(&self) -> usize {
    self.state().files.len()
  }

  pub fn uploaded_ids(&self) -> Vec<String> {
    self.state().uploaded.clone()
  }

  /// Files deleted successfully, in order
  pub fn deleted_files(&self) -> Vec<String> {
    self.state().deleted_files.clone()
  }

  pub fn document_count(&self, collection: Collection) -> usize {
    self
      .state()
      .documents
      .get(&collection)
      .map_or(0, |docs| docs.len())
  }

  /// Overwrite a document's fields behind the client's back.
  pub fn patch_document(&self, collection: Collection, id: &str, data: Value) {
    let mut state = self.state();
    let now = state.tick();
    if let Some(doc) = state.collection(collection).iter_mut().find(|d| d.id == id) {
      if let Value::Object(fields) = data {
        doc.fields.extend(fields);
      }
      doc.updated_at = now;
    }
  }
}

fn matches(doc: &ApiDocument, query: &DocumentQuery) -> bool {
  match query {
    DocumentQuery::Equal(attr, value) => doc.fields.get(attr) == Some(value),
    DocumentQuery::Search(attr, term) => doc
      .fields
      .get(attr)
      .and_then(Value::as_str)
      .is_some_and(|v| v.to_lowercase().contains(&term.to_lowercase())),
    _ => true,
  }
}

fn sort_key(doc: &ApiDocument, attr: &str) -> DateTime<Utc> {
  match attr {
    "$updatedAt" => doc.updated_at,
    _ => doc.created_at,
  }
}

#[async_trait]
impl Platform for MockPlatform {
  async fn create_account(
    &self,
    account_id: &str,
    email: &str,
    password: &str,
    name: &str,
  ) -> GatewayResult<Account> {
    let mut state = self.state();
    if state.accounts.iter().any(|a| a.account.email == email) {
      return Err(GatewayError::Platform {
        code: 409,
        message: "account already exists".to_string(),
      });
    }

    let account = Account {
      id: account_id.to_string(),
      name: name.to_string(),
      email: email.to_string(),
    };
    state.accounts.push(MockAccount {
      account: account.clone(),
      password: password.to_string(),
    });
    Ok(account)
  }

  async fn create_session(&self, email: &str, password: &str) -> GatewayResult<Session> {
    let state = self.state();
    let account = state
      .accounts
      .iter()
      .find(|a| a.account.email == email && a.password == password)
      .ok_or(GatewayError::Unauthenticated)?;

    Ok(Session {
      id: format!("session-{}", account.account.id),
      account_id: account.account.id.clone(),
      expires_at: Utc::now() + Duration::days(365),
      cookie: Some("{}".to_string()),
    })
  }

  async fn delete_session(&self, _session: &Session) -> GatewayResult<()> {
    Ok(())
  }

  async fn get_account(&self, session: &Session) -> GatewayResult<Account> {
    self
      .state()
      .accounts
      .iter()
      .find(|a| a.account.id == session.account_id)
      .map(|a| a.account.clone())
      .ok_or(GatewayError::Unauthenticated)
  }

  fn avatar_initials(&self, name: &str) -> GatewayResult<Url> {
    let mut url = Url::parse("https://mock.local/v1/avatars/initials")
      .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
    url.query_pairs_mut().append_pair("name", name);
    Ok(url)
  }

  async fn create_document(
    &self,
    _session: Option<&Session>,
    collection: Collection,
    document_id: &str,
    data: Value,
  ) -> GatewayResult<ApiDocument> {
    self.delay().await;
    let mut state = self.state();
    state.record(Op::CreateDocument)?;

    let now = state.tick();
    let fields: Map<String, Value> = match data {
      Value::Object(fields) => fields,
      other => return Err(GatewayError::InvalidInput(format!("not an object: {}", other))),
    };
    let doc = ApiDocument {
      id: document_id.to_string(),
      created_at: now,
      updated_at: now,
      fields,
    };
    state.collection(collection).push(doc.clone());
    Ok(state.hydrate(collection, doc))
  }

  async fn get_document(
    &self,
    _session: Option<&Session>,
    collection: Collection,
    document_id: &str,
  ) -> GatewayResult<ApiDocument> {
    self.delay().await;
    let mut state = self.state();
    state.record(Op::GetDocument)?;

    let doc = state
      .collection(collection)
      .iter()
      .find(|d| d.id == document_id)
      .cloned()
      .ok_or_else(|| GatewayError::not_found(format!("document {}", document_id)))?;
    Ok(state.hydrate(collection, doc))
  }

  async fn update_document(
    &self,
    _session: Option<&Session>,
    collection: Collection,
    document_id: &str,
    data: Value,
  ) -> GatewayResult<ApiDocument> {
    self.delay().await;
    let mut state = self.state();
    state.record(Op::UpdateDocument)?;

    let now = state.tick();
    let doc = state
      .collection(collection)
      .iter_mut()
      .find(|d| d.id == document_id)
      .ok_or_else(|| GatewayError::not_found(format!("document {}", document_id)))?;
    if let Value::Object(fields) = data {
      doc.fields.extend(fields);
    }
    doc.updated_at = now;

    let doc = doc.clone();
    Ok(state.hydrate(collection, doc))
  }

  async fn delete_document(
    &self,
    _session: Option<&Session>,
    collection: Collection,
    document_id: &str,
  ) -> GatewayResult<()> {
    self.delay().await;
    let mut state = self.state();
    state.record(Op::DeleteDocument)?;

    let docs = state.collection(collection);
    let before = docs.len();
    docs.retain(|d| d.id != document_id);
    if docs.len() == before {
      return Err(GatewayError::not_found(format!("document {}", document_id)));
    }
    Ok(())
  }

  async fn list_documents(
    &self,
    _session: Option<&Session>,
    collection: Collection,
    queries: &[DocumentQuery],
  ) -> GatewayResult<Vec<ApiDocument>> {
    self.delay().await;
    let mut state = self.state();
    state.record(Op::ListDocuments)?;

    let mut docs: Vec<ApiDocument> = state
      .collection(collection)
      .iter()
      .filter(|d| queries.iter().all(|q| matches(d, q)))
      .cloned()
      .collect();

    for query in queries {
      if let DocumentQuery::OrderDesc(attr) = query {
        docs.sort_by(|a, b| sort_key(b, attr).cmp(&sort_key(a, attr)));
      }
    }
    for query in queries {
      if let DocumentQuery::CursorAfter(id) = query {
        let pos = docs
          .iter()
          .position(|d| &d.id == id)
          .ok_or_else(|| GatewayError::Platform {
            code: 400,
            message: format!("cursor document {} not found", id),
          })?;
        docs.drain(..=pos);
      }
    }
    for query in queries {
      if let DocumentQuery::Limit(n) = query {
        docs.truncate(*n as usize);
      }
    }

    Ok(
      docs
        .into_iter()
        .map(|d| state.hydrate(collection, d))
        .collect(),
    )
  }

  async fn upload_file(
    &self,
    _session: Option<&Session>,
    file_id: &str,
    file: FileUpload,
  ) -> GatewayResult<StoredFile> {
    let mut state = self.state();
    state.record(Op::UploadFile)?;

    let stored = StoredFile {
      id: file_id.to_string(),
      name: file.name.clone(),
      size: file.bytes.len() as u64,
    };
    state.files.insert(file_id.to_string(), file);
    state.uploaded.push(file_id.to_string());
    Ok(stored)
  }

  fn file_preview(&self, file_id: &str, options: &PreviewOptions) -> GatewayResult<Url> {
    self.state().record(Op::Preview)?;

    Url::parse(&format!(
      "https://mock.local/v1/storage/buckets/media/files/{}/preview?width={}",
      file_id, options.width
    ))
    .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
  }

  async fn delete_file(&self, _session: Option<&Session>, file_id: &str) -> GatewayResult<()> {
    let mut state = self.state();
    state.record(Op::DeleteFile)?;

    if state.files.remove(file_id).is_none() {
      return Err(GatewayError::not_found(format!("file {}", file_id)));
    }
    state.deleted_files.push(file_id.to_string());
    Ok(())
  }
}
