//! External capability adapters used by the include resolution engine.
//!
//! Each capability sits behind a narrow async trait with a production
//! implementation and a mock used in engine tests.

mod api;
mod fs;
mod http;

pub use api::{GitLabRegistryApi, RegistryApi};
pub use fs::{normalize_path, LocalFileSystem, FileSystem};
pub use http::{HttpFetcher, ReqwestFetcher};

#[cfg(test)]
pub use api::MockRegistryApi;
#[cfg(test)]
pub use fs::MockFileSystem;
#[cfg(test)]
pub use http::MockHttpFetcher;
