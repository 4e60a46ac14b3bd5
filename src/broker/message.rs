//! Publish messages and the handler strategy
//!
//! `PublishMessage` is what the broker hands to application code for every
//! inbound QoS 0 PUBLISH. It is ephemeral: built per packet, consumed by the
//! handler, never stored by the broker.
//!
//! A `PublishHandler` is installed on the broker at startup (and may be
//! swapped at runtime). The broker awaits it before fanning the message out
//! and before reading the next packet from the same connection, so handlers
//! see one client's publishes in wire order. Handlers run concurrently for
//! different clients and must be `Send + Sync`.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    pub client_id: String,
    pub topic: String,
    pub payload: Vec<u8>,
}

pub trait PublishHandler: Send + Sync + 'static {
    fn handle(&self, message: PublishMessage) -> BoxFuture<'_, ()>;
}

/// Handler installed until the application provides one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl PublishHandler for NoopHandler {
    fn handle(&self, _message: PublishMessage) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

impl<F, Fut> PublishHandler for F
where
    F: Fn(PublishMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, message: PublishMessage) -> BoxFuture<'_, ()> {
        Box::pin(self(message))
    }
}

/// Run `handler` on `message`, containing any panic to this one message.
/// Returns `false` if the handler panicked.
pub async fn invoke_handler(handler: Arc<dyn PublishHandler>, message: PublishMessage) -> bool {
    let topic = message.topic.clone();
    let client = message.client_id.clone();

    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(panic) => Err(panic),
    };

    match outcome {
        Ok(()) => true,
        Err(panic) => {
            error!(
                client = %client,
                topic = %topic,
                panic = %panic_message(panic.as_ref()),
                "publish handler panic"
            );
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
