//! Error taxonomy for calls that cross the platform boundary.

use thiserror::Error;

/// Tagged failure of a gateway or platform call.
///
/// Logical absence of a single entity is `NotFound`; an empty list is not an
/// error and comes back as `Ok(vec![])`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
  #[error("{resource} not found")]
  NotFound { resource: String },

  #[error("no active session")]
  Unauthenticated,

  #[error("transport error: {0}")]
  Transport(String),

  #[error("platform error {code}: {message}")]
  Platform { code: u16, message: String },

  #[error("invalid response: {0}")]
  InvalidResponse(String),

  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// A compound operation failed and the cleanup of its uploaded file failed too.
  #[error("{cause}; cleanup of file {orphaned_file} also failed: {cleanup}")]
  CompensationFailed {
    cause: Box<GatewayError>,
    cleanup: Box<GatewayError>,
    orphaned_file: String,
  },
}

impl GatewayError {
  pub fn not_found(resource: impl Into<String>) -> Self {
    Self::NotFound {
      resource: resource.into(),
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound { .. })
  }

  /// Whether the failure happened below the platform (network, TLS, decoding
  /// of a transport frame). Offline fallback only applies to these.
  pub fn is_transport(&self) -> bool {
    matches!(self, Self::Transport(_))
  }
}

impl From<reqwest::Error> for GatewayError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      Self::InvalidResponse(e.to_string())
    } else {
      Self::Transport(e.to_string())
    }
  }
}

impl From<serde_json::Error> for GatewayError {
  fn from(e: serde_json::Error) -> Self {
    Self::InvalidResponse(e.to_string())
  }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
