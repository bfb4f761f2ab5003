//! Remote data access over the PostgREST-style HTTP API.

mod rest;

pub use rest::{classify, RestClient};
