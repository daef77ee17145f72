//! Single-read body capture with independent replays.

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::error::{Error, Result};

/// A fully buffered body that can be replayed any number of times.
///
/// Replays share the underlying buffer; each one is an independent stream
/// starting at the first byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedBody(Bytes);

impl CapturedBody {
    /// Read `body` to the end, failing once more than `limit` bytes arrive.
    pub async fn capture(body: Body, limit: usize) -> Result<Self> {
        let mut stream = body.into_data_stream();
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Internal(format!("failed to read body: {}", e)))?;
            if buf.len().saturating_add(chunk.len()) > limit {
                return Err(Error::PayloadTooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(Self(buf.freeze()))
    }

    /// A fresh stream over the captured bytes.
    pub fn replay(&self) -> Body {
        Body::from(self.0.clone())
    }

    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for CapturedBody {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}
