//! Command codec
//!
//! Translates [`Action`]s into the JSON frames the motion controller reads,
//! and classifies the bytes it sends back.
//!
//! | Action     | Frame                                          |
//! |------------|------------------------------------------------|
//! | Move       | `{"N":200,"D1":<dir>,"D2":<cm>,"H":"<id>"}`      |
//! | Turn       | `{"N":201,"D1":<deg>,"H":"<id>"}`               |
//! | Query pose | `{"N":300,"H":"<id>"}`                          |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{Action, Command};
use crate::error::{Error, Result};

/// Opcode of a move frame
pub const OP_MOVE: u16 = 200;
/// Opcode of a turn frame
pub const OP_TURN: u16 = 201;
/// Opcode of a pose query frame
pub const OP_QUERY_POSE: u16 = 300;

/// Serialized form of one action on the link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    #[serde(rename = "N")]
    pub opcode: u16,

    #[serde(rename = "D1", default, skip_serializing_if = "Option::is_none")]
    pub d1: Option<i64>,

    #[serde(rename = "D2", default, skip_serializing_if = "Option::is_none")]
    pub d2: Option<i64>,

    #[serde(rename = "H")]
    pub correlation_id: String,
}

impl WireFrame {
    pub fn from_action(action: &Action) -> Self {
        let (opcode, d1, d2) = match action.command {
            Command::Move {
                distance_m,
                direction,
            } => (
                OP_MOVE,
                Some(direction.wire_code()),
                Some(i64::from(meters_to_centimeters(distance_m))),
            ),
            Command::Turn { angle_deg } => (OP_TURN, Some(i64::from(angle_deg)), None),
            Command::QueryPose => (OP_QUERY_POSE, None, None),
        };
        Self {
            opcode,
            d1,
            d2,
            correlation_id: action.correlation_id.clone(),
        }
    }
}

/// Convert meters to whole centimeters, rounding half away from zero.
///
/// Negative and NaN distances saturate to 0.
pub fn meters_to_centimeters(distance_m: f64) -> u32 {
    (distance_m * 100.0).round() as u32
}

/// How a reply to a move/turn frame is judged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    /// Any reply that is non-empty after trimming counts as an acknowledgment.
    /// A stale reply to an earlier request is indistinguishable from a fresh one.
    #[default]
    Lenient,
    /// The reply must also contain the frame's correlation id
    Correlated,
}

/// Encodes actions and decodes link replies
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandCodec {
    ack_policy: AckPolicy,
}

impl CommandCodec {
    pub fn new(ack_policy: AckPolicy) -> Self {
        Self { ack_policy }
    }

    pub fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }

    /// Serialize `action` into the bytes written to the link
    pub fn encode(&self, action: &Action) -> Result<Vec<u8>> {
        serde_json::to_vec(&WireFrame::from_action(action)).map_err(|e| {
            Error::InvalidAction(format!("cannot encode {}: {}", action.correlation_id, e))
        })
    }

    /// Whether `raw` acknowledges the frame sent with `correlation_id`
    pub fn decode_ack(&self, raw: &[u8], correlation_id: &str) -> bool {
        let reply = trim_ascii(raw);
        if reply.is_empty() {
            return false;
        }
        match self.ack_policy {
            AckPolicy::Lenient => true,
            AckPolicy::Correlated => String::from_utf8_lossy(reply).contains(correlation_id),
        }
    }

    /// Parse a structured reply (pose queries). No retry on failure.
    pub fn decode_response(&self, raw: &[u8]) -> Result<Value> {
        match serde_json::from_slice::<Value>(trim_ascii(raw)) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(other) => Err(Error::Parse(format!("expected object, got {}", other))),
            Err(e) => Err(Error::Parse(e.to_string())),
        }
    }
}

fn trim_ascii(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &raw[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Direction;

    fn encode_str(action: &Action) -> String {
        String::from_utf8(CommandCodec::default().encode(action).unwrap()).unwrap()
    }

    #[test]
    fn test_move_frame() {
        let frame = encode_str(&Action::move_by("m1", 0.5, Direction::Forward));
        assert_eq!(frame, r#"{"N":200,"D1":1,"D2":50,"H":"m1"}"#);

        let frame = encode_str(&Action::move_by("m2", 1.0, Direction::Backward));
        assert_eq!(frame, r#"{"N":200,"D1":2,"D2":100,"H":"m2"}"#);
    }

    #[test]
    fn test_turn_and_pose_frames() {
        assert_eq!(
            encode_str(&Action::turn("t1", -90)),
            r#"{"N":201,"D1":-90,"H":"t1"}"#
        );
        assert_eq!(
            encode_str(&Action::query_pose("p4242")),
            r#"{"N":300,"H":"p4242"}"#
        );
    }

    #[test]
    fn test_centimeter_rounding_half_up() {
        assert_eq!(meters_to_centimeters(0.125), 13);
        assert_eq!(meters_to_centimeters(0.005), 1);
        assert_eq!(meters_to_centimeters(0.29), 29);
        assert_eq!(meters_to_centimeters(0.0), 0);
        assert_eq!(meters_to_centimeters(0.375), 38);
        assert_eq!(meters_to_centimeters(0.625), 63);
    }

    #[test]
    fn test_negative_distance_saturates() {
        assert_eq!(meters_to_centimeters(-1.0), 0);
        assert_eq!(meters_to_centimeters(f64::NAN), 0);
    }

    #[test]
    fn test_lenient_ack() {
        let codec = CommandCodec::new(AckPolicy::Lenient);
        assert!(codec.decode_ack(b"ok", "m1"));
        assert!(codec.decode_ack(b"{\"H\":\"other\"}\r\n", "m1"));
        assert!(!codec.decode_ack(b"", "m1"));
        assert!(!codec.decode_ack(b" \r\n", "m1"));
    }

    #[test]
    fn test_correlated_ack() {
        let codec = CommandCodec::new(AckPolicy::Correlated);
        assert!(codec.decode_ack(b"{\"H\":\"m1\"}", "m1"));
        assert!(!codec.decode_ack(b"ok", "m1"));
    }

    #[test]
    fn test_decode_response() {
        let codec = CommandCodec::default();
        let value = codec
            .decode_response(b"{\"H\":\"p42\",\"pose\":{\"x\":1,\"y\":2}}\n")
            .unwrap();
        assert_eq!(value["pose"]["y"], 2);

        assert!(matches!(codec.decode_response(b"ok"), Err(Error::Parse(_))));
        assert!(matches!(codec.decode_response(b"[1]"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_wire_frame_parses_back() {
        let frame: WireFrame = serde_json::from_str(r#"{"N":201,"D1":45,"H":"t9"}"#).unwrap();
        assert_eq!(frame.opcode, OP_TURN);
        assert_eq!(frame.d1, Some(45));
        assert_eq!(frame.d2, None);
    }
}
