//! Notify and request over a [`MessageTransport`].
//!
//! The browser's messaging call is fire-and-forget with an optional reply.
//! The two uses are kept apart here: `notify` never fails, `request` fails
//! with [`MessageError::NoResponder`] when nobody answers.

use serde::de::DeserializeOwned;

use crate::message::Message;
use crate::platform::{Destination, MessageTransport};

/// Error type returned by transports.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// No listener exists at the destination (no content script, closed tab)
    #[error("Could not establish connection: receiving end does not exist")]
    NoReceiver,
    #[error("Message transport failed: {0}")]
    Failed(String),
}

/// Error type for [`request`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("No responder for {action}")]
    NoResponder { action: &'static str },
    #[error("Malformed reply to {action}: {reason}")]
    MalformedReply { action: &'static str, reason: String },
    #[error(transparent)]
    Transport(TransportError),
}

/// Send a message without expecting a reply.
///
/// Failures, including a missing receiver, are swallowed and logged at
/// debug level.
pub async fn notify(transport: &dyn MessageTransport, to: Destination, message: &Message) {
    if let Err(e) = transport.deliver(to, message).await {
        log::debug!("{} to {:?} dropped: {}", message.action(), to, e);
    }
}

/// Send a message and decode its reply.
pub async fn request<R: DeserializeOwned>(
    transport: &dyn MessageTransport,
    to: Destination,
    message: &Message,
) -> Result<R, MessageError> {
    let action = message.action();
    let reply = match transport.deliver(to, message).await {
        Ok(Some(reply)) if !reply.is_null() => reply,
        Ok(_) | Err(TransportError::NoReceiver) => return Err(MessageError::NoResponder { action }),
        Err(e) => return Err(MessageError::Transport(e)),
    };

    serde_json::from_value(reply).map_err(|e| MessageError::MalformedReply {
        action,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::cell::RefCell;

    use crate::message::{RetrieveReply, TabIdReply};

    struct Scripted {
        reply: Result<Option<Value>, TransportError>,
        sent: RefCell<Vec<(Destination, Message)>>,
    }

    impl Scripted {
        fn new(reply: Result<Option<Value>, TransportError>) -> Self {
            Self { reply, sent: RefCell::new(Vec::new()) }
        }
    }

    #[async_trait(?Send)]
    impl MessageTransport for Scripted {
        async fn deliver(&self, to: Destination, message: &Message) -> Result<Option<Value>, TransportError> {
            self.sent.borrow_mut().push((to, message.clone()));
            self.reply.clone()
        }
    }

    #[tokio::test]
    async fn test_notify_swallows_missing_receiver() {
        let transport = Scripted::new(Err(TransportError::NoReceiver));
        notify(&transport, Destination::Tab(3), &Message::Set { rate: 2.0 }).await;
        assert_eq!(transport.sent.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_request_decodes_reply() {
        let transport = Scripted::new(Ok(Some(json!({"playbackRate": 1.5, "videoCount": 3}))));
        let reply: RetrieveReply = request(&transport, Destination::Tab(1), &Message::Retrieve)
            .await
            .unwrap();
        assert_eq!(reply, RetrieveReply { playback_rate: 1.5, video_count: 3 });
    }

    #[tokio::test]
    async fn test_request_without_responder() {
        for outcome in [Ok(None), Ok(Some(Value::Null)), Err(TransportError::NoReceiver)] {
            let transport = Scripted::new(outcome);
            let result: Result<TabIdReply, _> =
                request(&transport, Destination::Coordinator, &Message::GetTabId).await;
            assert_eq!(result, Err(MessageError::NoResponder { action: "GET_TAB_ID" }));
        }
    }

    #[tokio::test]
    async fn test_request_malformed_reply() {
        let transport = Scripted::new(Ok(Some(json!({"tab": 1}))));
        let result: Result<TabIdReply, _> =
            request(&transport, Destination::Coordinator, &Message::GetTabId).await;
        assert!(matches!(result, Err(MessageError::MalformedReply { .. })));

        let transport = Scripted::new(Err(TransportError::Failed("port closed".into())));
        let result: Result<TabIdReply, _> =
            request(&transport, Destination::Coordinator, &Message::GetTabId).await;
        assert!(matches!(result, Err(MessageError::Transport(_))));
    }
}
