//! Client layer for a residential community platform.
//!
//! Screens read through a shared [`cache::CacheStore`], write through
//! optimistic mutations that patch the store before the server answers, and
//! stay current through realtime listeners that invalidate what other
//! residents change.

pub mod backend;
pub mod cache;
pub mod community;
pub mod config;
pub mod error;
pub mod mutation;
pub mod patch;
pub mod query;
pub mod realtime;
pub mod reconcile;
pub mod session;

pub use error::{ErrorKind, RemoteError, RemoteResult};
pub use session::Session;
