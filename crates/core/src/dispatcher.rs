//! Action dispatcher
//!
//! Runs a batch of actions against the controller one at a time. Each action
//! is a single `Sent -> (Acked | TimedOut)` exchange on the [`SharedLink`];
//! the link is held only for that exchange, so pose queries and other batches
//! can interleave between actions but never inside one.

use std::time::Duration;

use serde::Serialize;

use crate::action::{parse_batch, Action};
use crate::codec::CommandCodec;
use crate::error::Error;
use crate::link::SharedLink;

/// Default body cap for `/api/path`
pub const DEFAULT_MAX_BODY_BYTES: usize = 4096;

/// Default wait for a move/turn acknowledgment
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(3000);

/// Dispatcher configuration
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub ack_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Outcome of one action in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AckEntry {
    /// Serialized as `"<id>_ok"`
    Acked(String),
    /// Serialized as `{"id":"<id>","status":"fail"}`
    Failed { id: String, status: &'static str },
}

impl AckEntry {
    pub fn acked(correlation_id: &str) -> Self {
        AckEntry::Acked(format!("{}_ok", correlation_id))
    }

    pub fn failed(correlation_id: &str) -> Self {
        AckEntry::Failed {
            id: correlation_id.to_string(),
            status: "fail",
        }
    }

    pub fn is_acked(&self) -> bool {
        matches!(self, AckEntry::Acked(_))
    }
}

/// Ordered per-action outcomes of one `/api/path` request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub acks: Vec<AckEntry>,
}

/// Turns request bodies into link exchanges
#[derive(Clone)]
pub struct ActionDispatcher {
    link: SharedLink,
    codec: CommandCodec,
    config: DispatcherConfig,
}

impl ActionDispatcher {
    pub fn new(link: SharedLink, codec: CommandCodec, config: DispatcherConfig) -> Self {
        Self {
            link,
            codec,
            config,
        }
    }

    pub fn config(&self) -> DispatcherConfig {
        self.config
    }

    /// Parse `body` and run every recognised action in submission order.
    ///
    /// Only request-level problems (size, JSON shape) are errors; per-action
    /// timeouts are recorded as failure entries in the result.
    pub async fn dispatch(&self, body: &[u8]) -> crate::Result<BatchResult> {
        let actions = parse_batch(body, self.config.max_body_bytes)?;
        tracing::info!(actions = actions.len(), "Dispatching action batch");

        let mut result = BatchResult {
            acks: Vec::with_capacity(actions.len()),
        };
        for action in &actions {
            if let Some(entry) = self.execute(action).await {
                result.acks.push(entry);
            }
        }
        Ok(result)
    }

    /// Run one action. `None` means the action could not be encoded and is skipped.
    pub async fn execute(&self, action: &Action) -> Option<AckEntry> {
        let id = action.correlation_id.as_str();
        let frame = match self.codec.encode(action) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(correlation_id = %id, "Skipping action: {}", e);
                return None;
            }
        };

        let entry = match self.link.exchange(&frame, id, self.config.ack_timeout).await {
            Ok(reply) if self.codec.decode_ack(&reply, id) => AckEntry::acked(id),
            Ok(reply) => {
                tracing::warn!(
                    correlation_id = %id,
                    policy = ?self.codec.ack_policy(),
                    reply = %String::from_utf8_lossy(&reply),
                    "Reply not accepted as acknowledgment"
                );
                AckEntry::failed(id)
            }
            Err(Error::LinkTimeout { .. }) => AckEntry::failed(id),
            Err(e) => {
                tracing::error!(correlation_id = %id, "Link exchange failed: {}", e);
                AckEntry::failed(id)
            }
        };
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AckPolicy;
    use crate::link::{LinkTiming, MockReply, MockTransport};
    use tokio::time::Instant;

    fn dispatcher(transport: MockTransport, policy: AckPolicy) -> ActionDispatcher {
        ActionDispatcher::new(
            SharedLink::new(transport, LinkTiming::default()),
            CommandCodec::new(policy),
            DispatcherConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_move_acked() {
        let transport = MockTransport::acking("ok");
        let handle = transport.handle();
        let dispatcher = dispatcher(transport, AckPolicy::Lenient);

        let result = dispatcher
            .dispatch(br#"{"cmd":"move","d":0.5,"dir":1,"id":"m1"}"#)
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"acks":["m1_ok"]}"#
        );
        assert_eq!(
            handle.written_strings(),
            vec![r#"{"N":200,"D1":1,"D2":50,"H":"m1"}"#]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_recorded_with_generated_id() {
        let dispatcher = dispatcher(MockTransport::new(), AckPolicy::Lenient);
        let started = Instant::now();

        let result = dispatcher.dispatch(br#"[{"cmd":"turn","a":90}]"#).await.unwrap();

        assert!(started.elapsed() >= DEFAULT_ACK_TIMEOUT);
        assert_eq!(result.acks.len(), 1);
        let AckEntry::Failed { id, status } = &result.acks[0] else {
            panic!("expected failure record, got {:?}", result.acks[0]);
        };
        assert!(id.starts_with('t'));
        assert_eq!(*status, "fail");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["acks"][0]["status"], "fail");
        assert_eq!(json["acks"][0]["id"], id.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_outcomes_keep_submission_order() {
        let transport = MockTransport::scripted([
            MockReply::Immediate(b"ok".to_vec()),
            MockReply::Silent,
            MockReply::Immediate(b"ok".to_vec()),
        ]);
        let dispatcher = dispatcher(transport, AckPolicy::Lenient);

        let result = dispatcher
            .dispatch(
                br#"[
                {"cmd":"move","d":0.5,"dir":1,"id":"m1"},
                {"cmd":"turn","a":90,"id":"t1"},
                {"cmd":"dance","id":"d1"},
                {"cmd":"move","d":0.2,"dir":1,"id":"m2"}
            ]"#,
            )
            .await
            .unwrap();

        assert_eq!(
            result.acks,
            vec![
                AckEntry::acked("m1"),
                AckEntry::failed("t1"),
                AckEntry::acked("m2"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlated_policy_rejects_foreign_reply() {
        let transport = MockTransport::scripted([
            MockReply::Immediate(br#"{"H":"other"}"#.to_vec()),
            MockReply::Immediate(br#"{"H":"m2"}"#.to_vec()),
        ]);
        let dispatcher = dispatcher(transport, AckPolicy::Correlated);

        let result = dispatcher
            .dispatch(br#"[{"cmd":"move","id":"m1"},{"cmd":"move","id":"m2"}]"#)
            .await
            .unwrap();

        assert_eq!(
            result.acks,
            vec![AckEntry::failed("m1"), AckEntry::acked("m2")]
        );
    }

    #[tokio::test]
    async fn test_request_level_errors() {
        let dispatcher = dispatcher(MockTransport::acking("ok"), AckPolicy::Lenient);

        assert!(matches!(
            dispatcher.dispatch(b"nope").await,
            Err(Error::InvalidPayload(_))
        ));
        let oversized = vec![b' '; DEFAULT_MAX_BODY_BYTES + 1];
        assert!(matches!(
            dispatcher.dispatch(&oversized).await,
            Err(Error::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_only_unknown_actions_yields_empty_acks() {
        let transport = MockTransport::acking("ok");
        let handle = transport.handle();
        let dispatcher = dispatcher(transport, AckPolicy::Lenient);

        let result = dispatcher.dispatch(br#"[{"cmd":"fly"}]"#).await.unwrap();
        assert!(result.acks.is_empty());
        assert!(handle.written_frames().is_empty());
    }
}
