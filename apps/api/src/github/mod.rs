//! GitHub integration: REST client, linked repositories and their handlers.

pub mod client;
pub mod handlers;
pub mod store;

pub use client::{GithubClient, GithubError};
