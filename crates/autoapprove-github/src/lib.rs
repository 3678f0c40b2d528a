//! GitHub hosting client for autoapprove
//!
//! Implements [`autoapprove_core::HostingApi`] over the GitHub REST API, with
//! the GraphQL API used for enabling auto-merge.
//!
//! # Modules
//!
//! - `client`: `GitHubClient` and its connection settings
//! - `credential`: bearer-token sources
//! - `error`: response and transport error classification
//! - `wire`: REST payloads and their conversion into domain types

pub mod client;
pub mod credential;
pub mod error;
pub mod wire;

pub use client::{GitHubClient, GitHubConfig};
pub use credential::{CredentialProvider, EnvToken, StaticToken};
