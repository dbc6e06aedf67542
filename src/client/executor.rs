//! Downstream executor seam.
//!
//! The manager only ever sees `Executor::execute`. Request and response
//! types are whatever the implementation says they are.

use crate::models::{ChatPayload, ChatResult};
use async_trait::async_trait;
use std::fmt;

/// Something that performs a downstream call.
///
/// May fail, may take arbitrarily long, and has no retry built in.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Request forwarded unmodified by the manager
    type Request: Send + 'static;
    /// Successful result
    type Response: Send + 'static;
    /// Downstream failure, returned to the caller verbatim
    type Error: fmt::Display + Send + 'static;

    /// Perform one downstream call.
    async fn execute(&self, request: Self::Request) -> Result<Self::Response, Self::Error>;
}

/// Chat client with a payload preparation hook.
///
/// `prepare` normalises a payload (default model, media handling) before
/// `execute_chat` sends it. The default `prepare` passes payloads through.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Client-specific failure
    type Error: fmt::Display + Send + 'static;

    /// Adjust a payload before it is sent.
    fn prepare(&self, payload: ChatPayload) -> Result<ChatPayload, Self::Error> {
        Ok(payload)
    }

    /// Send a prepared payload.
    async fn execute_chat(&self, prepared: ChatPayload) -> Result<ChatResult, Self::Error>;
}

/// Adapts a [`ChatClient`] into an [`Executor`] running prepare-then-send.
#[derive(Debug, Clone)]
pub struct ChatExecutor<C> {
    client: C,
}

impl<C: ChatClient> ChatExecutor<C> {
    /// Wrap a chat client.
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: ChatClient> Executor for ChatExecutor<C> {
    type Request = ChatPayload;
    type Response = ChatResult;
    type Error = C::Error;

    async fn execute(&self, request: ChatPayload) -> Result<ChatResult, C::Error> {
        let prepared = self.client.prepare(request)?;
        self.client.execute_chat(prepared).await
    }
}
