//! Event delivery to the owning connection.
//!
//! Each connection has one outbound queue. Producers (recognizer forwarders,
//! synthesis tasks) each push in their own production order; nothing orders
//! events across producers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use speechlink_core::protocol::ServerEvent;
use speechlink_core::types::RecognitionEvent;

/// A message bound for the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized as a JSON text frame.
    Event(ServerEvent),
    /// Sent as a binary frame.
    Audio(Vec<u8>),
}

/// Handle for delivering events to one connection.
///
/// Sending never blocks. Once the connection is gone events are silently
/// unobserved rather than treated as errors.
#[derive(Debug, Clone)]
pub struct EventSink {
    conn_id: Arc<str>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl EventSink {
    pub fn new(conn_id: &str, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            conn_id: Arc::from(conn_id),
            tx,
        }
    }

    /// Create a sink together with the receiving end of its queue.
    pub fn channel(conn_id: &str) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(conn_id, tx), rx)
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Returns `false` when the connection is no longer listening.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.push(Outbound::Event(event))
    }

    pub fn send_audio(&self, chunk: Vec<u8>) -> bool {
        self.push(Outbound::Audio(chunk))
    }

    /// Translate and deliver a recognition event.
    pub fn recognition(&self, event: RecognitionEvent) -> bool {
        recognition_events(event)
            .into_iter()
            .all(|e| self.send(e))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, msg: Outbound) -> bool {
        let delivered = self.tx.send(msg).is_ok();
        if !delivered {
            trace!(conn_id = %self.conn_id, "Connection gone, event unobserved");
        }
        delivered
    }
}

/// Client-facing events for one recognition event.
pub fn recognition_events(event: RecognitionEvent) -> Vec<ServerEvent> {
    match event {
        RecognitionEvent::SentenceBegin { .. } => vec![ServerEvent::SentenceState { state: true }],
        RecognitionEvent::Partial { text, .. } => vec![ServerEvent::Partial { result: text }],
        RecognitionEvent::Final { text, .. } => vec![
            ServerEvent::Final { result: text },
            ServerEvent::SentenceState { state: false },
        ],
        RecognitionEvent::Error { message } => vec![ServerEvent::error(message)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_closes_sentence() {
        let events = recognition_events(RecognitionEvent::Final {
            index: 1,
            text: "done".into(),
        });
        assert_eq!(
            events,
            vec![
                ServerEvent::Final {
                    result: "done".into()
                },
                ServerEvent::SentenceState { state: false },
            ]
        );
    }

    #[tokio::test]
    async fn test_sink_preserves_order() {
        let (sink, mut rx) = EventSink::channel("c1");
        assert!(sink.recognition(RecognitionEvent::SentenceBegin { index: 0 }));
        assert!(sink.send_audio(vec![1, 2]));
        assert!(sink.recognition(RecognitionEvent::Partial {
            index: 0,
            text: "a".into()
        }));

        assert_eq!(
            rx.recv().await,
            Some(Outbound::Event(ServerEvent::SentenceState { state: true }))
        );
        assert_eq!(rx.recv().await, Some(Outbound::Audio(vec![1, 2])));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Event(ServerEvent::Partial { result: "a".into() }))
        );
    }

    #[test]
    fn test_closed_connection_is_unobserved() {
        let (sink, rx) = EventSink::channel("c1");
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.send(ServerEvent::error("late")));
    }
}
