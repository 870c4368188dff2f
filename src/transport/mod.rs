//! Transport layer.
//!
//! The server is reached over HTTP only; see [`http`].

pub mod http;

pub use http::{AppState, HttpTransport, router};

use crate::error::DbResult;
use std::future::Future;

/// A network front end for the reflection service.
pub trait Transport: Send + Sync {
    /// Serve requests until shutdown.
    fn run(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
