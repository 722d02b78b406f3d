//! Snapgram backend: Appwrite platform client, domain types and the gateway.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod gateway;
#[cfg(test)]
pub mod mock;
pub mod types;
