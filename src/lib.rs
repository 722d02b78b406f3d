//! Client core for Snapgram: remote data gateway, query cache and
//! optimistic like/save reconciliation.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod ids;
pub mod logging;
pub mod query;
pub mod reconcile;
pub mod session;
