//! Collaborators that answer questions about system packages.
//!
//! - [`ubuntu`] fetches copyright text from the Ubuntu changelog server.
//! - [`apt_index`] lists the versions of a package known to the local apt index.
//!
//! Both sit behind `async_trait` seams so resolvers can be tested with
//! in-memory doubles.

pub mod apt_index;
pub mod ubuntu;

use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

pub const USER_AGENT: &str = concat!("license-auditr/", env!("CARGO_PKG_VERSION"));

/// HTTP client shared by every network collaborator in a run.
pub fn build_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(10))
        .build()?)
}
