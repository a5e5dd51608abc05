//! The transport collaborator.
//!
//! The core never performs I/O itself. A `Connection` composes the final
//! transport request from the resolved parts (attaching a base URL, adding
//! auth headers, ...) and executes it. Timeouts, retries and connection
//! pooling all live behind this trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse, RequestParts};
use crate::progress::TransferContext;

/// The connection refused to compose a request.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConnectionError(pub String);

#[async_trait]
pub trait Connection: Send + Sync {
    /// Compose the transport request. Pure: no I/O.
    fn build_request(&self, parts: RequestParts) -> Result<HttpRequest, ConnectionError>;

    /// Execute `request`.
    ///
    /// Any completed exchange, whatever its status, should come back as
    /// `Ok`; the pipeline classifies non-2xx statuses itself. `Err` is for
    /// failures with no response (connectivity, timeouts). Progress and the
    /// advisory pause state are available through `transfer`.
    async fn send(
        &self,
        request: HttpRequest,
        transfer: TransferContext,
    ) -> Result<HttpResponse, TransportError>;
}
