//! The remote-call builder.
//!
//! A locator is accumulated segment by segment, then frozen by the
//! terminal [`RemoteCall::invoke`], which serializes `(name, args,
//! kwargs)`, emits the WORK frame and hands back the pending result.

use crate::engine::Engine;
use palaver_types::{PalaverError, PeerId};
use palaver_wire::{Kwargs, Value};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// A partially-built remote call: dotted-name segments, an optional
/// explicit target, and the arguments gathered so far.
#[derive(Clone)]
pub struct RemoteCall {
    engine: Arc<Engine>,
    target: Option<PeerId>,
    segments: Vec<String>,
    args: Vec<Value>,
    kwargs: Kwargs,
}

impl RemoteCall {
    pub(crate) fn new(engine: Arc<Engine>, target: Option<PeerId>) -> Self {
        Self {
            engine,
            target,
            segments: Vec::new(),
            args: Vec::new(),
            kwargs: Kwargs::new(),
        }
    }

    pub(crate) fn with_path(engine: Arc<Engine>, target: Option<PeerId>, path: &str) -> Self {
        let mut call = Self::new(engine, target);
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            call.segments.push(segment.to_string());
        }
        call
    }

    /// Append one dotted-name segment.
    pub fn attr(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// The locator accumulated so far.
    pub fn name(&self) -> String {
        self.segments.join(".")
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Freeze the locator, emit the WORK message and await the response.
    ///
    /// Resolves with the remote result, or rejects with the reconstructed
    /// remote error / `Timeout` / `Shutdown`.
    pub async fn invoke(self) -> Result<Value, PalaverError> {
        let name = self.name();
        let receiver = self
            .engine
            .send_work(self.target.as_ref(), &name, self.args, self.kwargs)
            .await?;
        match receiver.await {
            Ok(result) => result,
            // The registry dropped the sender without resolving; only
            // shutdown does that.
            Err(_) => Err(PalaverError::Shutdown),
        }
    }

    /// [`invoke`](Self::invoke) plus deserialization of the result.
    pub async fn invoke_as<T: DeserializeOwned>(self) -> Result<T, PalaverError> {
        let value = self.invoke().await?;
        serde_json::from_value(value).map_err(|e| PalaverError::Codec(e.to_string()))
    }
}
