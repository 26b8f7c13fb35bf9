//! Pose query bridge
//!
//! One round trip per call: send `{"N":300,"H":"p<n>"}` and hand the
//! controller's reply back untouched.

use std::time::Duration;

use bytes::Bytes;

use crate::action::{Action, ActionKind, CorrelationIds};
use crate::codec::CommandCodec;
use crate::error::Result;
use crate::link::SharedLink;

/// Default wait for a pose reply
pub const DEFAULT_POSE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Raw controller reply to a pose query
#[derive(Debug, Clone)]
pub struct PoseReply {
    pub correlation_id: String,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct PoseQueryBridge {
    link: SharedLink,
    codec: CommandCodec,
    timeout: Duration,
    validate_json: bool,
}

impl PoseQueryBridge {
    pub fn new(link: SharedLink, codec: CommandCodec, timeout: Duration) -> Self {
        Self {
            link,
            codec,
            timeout,
            validate_json: false,
        }
    }

    /// Reject replies that are not a JSON object instead of passing them through
    pub fn with_json_validation(mut self, validate: bool) -> Self {
        self.validate_json = validate;
        self
    }

    /// Query the controller's pose. Timeouts are returned as
    /// [`Error::LinkTimeout`](crate::Error::LinkTimeout); there is no retry.
    pub async fn query(&self) -> Result<PoseReply> {
        let correlation_id = CorrelationIds::new().generate(ActionKind::QueryPose);
        let frame = self.codec.encode(&Action::query_pose(correlation_id.as_str()))?;

        tracing::info!(correlation_id = %correlation_id, "Pose query start");
        let body = self
            .link
            .exchange(&frame, &correlation_id, self.timeout)
            .await?;
        tracing::info!(
            correlation_id = %correlation_id,
            bytes = body.len(),
            "Pose query end"
        );

        if self.validate_json {
            self.codec.decode_response(&body)?;
        }

        Ok(PoseReply {
            correlation_id,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkTiming, MockTransport};
    use crate::Error;

    fn bridge(transport: MockTransport) -> PoseQueryBridge {
        PoseQueryBridge::new(
            SharedLink::new(transport, LinkTiming::default()),
            CommandCodec::default(),
            DEFAULT_POSE_TIMEOUT,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_passed_through_verbatim() {
        let raw = r#"{"H":"p42","pose":{"x":1,"y":2}}"#;
        let transport = MockTransport::acking(raw);
        let handle = transport.handle();

        let reply = bridge(transport).query().await.unwrap();

        assert_eq!(&reply.body[..], raw.as_bytes());
        let sent = handle.written_strings();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], format!(r#"{{"N":300,"H":"{}"}}"#, reply.correlation_id));

        let number: u32 = reply.correlation_id[1..].parse().unwrap();
        assert!((1000..9999).contains(&number));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_an_error() {
        let err = bridge(MockTransport::new()).query().await.unwrap_err();
        assert!(matches!(err, Error::LinkTimeout { timeout_ms: 3000, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_json_validation() {
        let lenient = bridge(MockTransport::acking("not json")).query().await;
        assert!(lenient.is_ok());

        let strict = bridge(MockTransport::acking("not json"))
            .with_json_validation(true)
            .query()
            .await;
        assert!(matches!(strict, Err(Error::Parse(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_controller_answers() {
        let reply = bridge(MockTransport::simulated()).query().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(value["H"], reply.correlation_id.as_str());
        assert_eq!(value["pose"]["x"], 0.0);
    }
}
