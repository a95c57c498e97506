//! Transport boundary: fetching unread inbound mail and sending outbound
//! mail. Modeled on the borrowed-client style of the teacher's webhook
//! dispatcher (`webhooks::deliver_webhooks`) — a trait object lets the poll
//! loop and engines stay agnostic of the concrete mailbox backend.

use async_trait::async_trait;

use crate::error::HubResult;
use crate::mail::{InboundEmail, OutboundEmail};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches and marks-as-read every message that has arrived since the
    /// last call. Order is not guaranteed; callers sort if they care.
    async fn fetch_unread(&self) -> HubResult<Vec<InboundEmail>>;

    /// Sends one outbound message, returning the transport-assigned message id.
    async fn send(&self, email: OutboundEmail) -> HubResult<String>;
}

/// In-memory transport for tests: an inbox queue to drain and an outbox
/// recording everything sent, so assertions can inspect both sides.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MockTransport {
        inbox: Mutex<Vec<InboundEmail>>,
        pub outbox: Mutex<Vec<OutboundEmail>>,
        next_id: Mutex<u64>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_inbound(&self, email: InboundEmail) {
            self.inbox.lock().unwrap().push(email);
        }

        pub fn sent(&self) -> Vec<OutboundEmail> {
            self.outbox.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn fetch_unread(&self) -> HubResult<Vec<InboundEmail>> {
            let mut inbox = self.inbox.lock().unwrap();
            Ok(std::mem::take(&mut *inbox))
        }

        async fn send(&self, email: OutboundEmail) -> HubResult<String> {
            let mut id = self.next_id.lock().unwrap();
            *id += 1;
            let message_id = format!("mock-{id}@hub.local");
            self.outbox.lock().unwrap().push(email);
            Ok(message_id)
        }
    }

    /// Lets integration tests hand an `Arc<MockTransport>` to `PollLoop`
    /// (which takes ownership of a `Box<dyn Transport>`) while keeping a
    /// handle of their own to inspect `sent()`/call `push_inbound()` after
    /// construction.
    #[async_trait]
    impl Transport for std::sync::Arc<MockTransport> {
        async fn fetch_unread(&self) -> HubResult<Vec<InboundEmail>> {
            self.as_ref().fetch_unread().await
        }

        async fn send(&self, email: OutboundEmail) -> HubResult<String> {
            self.as_ref().send(email).await
        }
    }
}
