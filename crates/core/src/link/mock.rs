//! In-process link transports for tests and hardware-free runs
//!
//! [`MockTransport`] records every frame written to it and answers through a
//! responder closure. [`SimulatedController`] is a responder that behaves like
//! the motion controller: it acknowledges move/turn frames and answers pose
//! queries from a dead-reckoned pose.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::Transport;
use crate::codec::{WireFrame, OP_MOVE, OP_QUERY_POSE, OP_TURN};
use crate::error::Result;

/// How the mock answers one written frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Reply bytes become readable immediately
    Immediate(Vec<u8>),
    /// Reply bytes become readable after the delay
    Delayed(Vec<u8>, Duration),
    /// Never reply
    Silent,
}

type Responder = Box<dyn FnMut(&[u8]) -> MockReply + Send>;

struct MockState {
    inbound: VecDeque<u8>,
    scheduled: Vec<(Instant, Vec<u8>)>,
    written: Vec<Vec<u8>>,
    responder: Responder,
}

impl MockState {
    fn promote_due(&mut self) {
        let now = Instant::now();
        let mut index = 0;
        while index < self.scheduled.len() {
            if self.scheduled[index].0 <= now {
                let (_, bytes) = self.scheduled.remove(index);
                self.inbound.extend(bytes);
            } else {
                index += 1;
            }
        }
    }
}

/// Scripted transport that never touches hardware
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Inspection handle that stays valid after the transport moves into a link
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// A controller that never answers
    pub fn new() -> Self {
        Self::with_responder(|_| MockReply::Silent)
    }

    /// Answer every frame with the same bytes
    pub fn acking(reply: impl Into<Vec<u8>>) -> Self {
        let reply = reply.into();
        Self::with_responder(move |_| MockReply::Immediate(reply.clone()))
    }

    /// Answer frames with `replies` in order, then stay silent
    pub fn scripted(replies: impl IntoIterator<Item = MockReply>) -> Self {
        let mut replies: VecDeque<MockReply> = replies.into_iter().collect();
        Self::with_responder(move |_| replies.pop_front().unwrap_or(MockReply::Silent))
    }

    /// Answer frames like the motion controller would
    pub fn simulated() -> Self {
        let mut controller = SimulatedController::default();
        Self::with_responder(move |frame| controller.respond(frame))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> MockReply + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(MockState {
                inbound: VecDeque::new(),
                scheduled: Vec::new(),
                written: Vec::new(),
                responder: Box::new(responder),
            })),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Every frame written so far, in order
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Written frames decoded as UTF-8
    pub fn written_strings(&self) -> Vec<String> {
        self.state
            .lock()
            .written
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }

    /// Make bytes readable that no frame asked for (e.g. a late reply)
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend(bytes.iter().copied());
    }

    /// Bytes currently readable
    pub fn pending_inbound(&self) -> usize {
        let mut state = self.state.lock();
        state.promote_due();
        state.inbound.len()
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        state.promote_due();
        let n = buffer.len().min(state.inbound.len());
        for (slot, byte) in buffer.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        state.written.push(data.to_vec());
        match (state.responder)(data) {
            MockReply::Immediate(bytes) => state.inbound.extend(bytes),
            MockReply::Delayed(bytes, delay) => {
                state.scheduled.push((Instant::now() + delay, bytes));
            }
            MockReply::Silent => {}
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        let mut state = self.state.lock();
        state.promote_due();
        Ok(state.inbound.len())
    }
}

/// Dead-reckoning stand-in for the motion controller
#[derive(Debug, Clone, Default)]
pub struct SimulatedController {
    x_cm: f64,
    y_cm: f64,
    heading_deg: f64,
}

impl SimulatedController {
    /// Current pose as (x cm, y cm, heading degrees)
    pub fn pose(&self) -> (f64, f64, f64) {
        (self.x_cm, self.y_cm, self.heading_deg)
    }

    pub fn respond(&mut self, frame: &[u8]) -> MockReply {
        let frame: WireFrame = match serde_json::from_slice(frame) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Simulated controller ignoring unparsable frame: {}", e);
                return MockReply::Silent;
            }
        };

        match frame.opcode {
            OP_MOVE => {
                let sign = if frame.d1 == Some(2) { -1.0 } else { 1.0 };
                let distance = sign * frame.d2.unwrap_or(0) as f64;
                let heading = self.heading_deg.to_radians();
                self.x_cm += distance * heading.cos();
                self.y_cm += distance * heading.sin();
                MockReply::Immediate(b"ok".to_vec())
            }
            OP_TURN => {
                self.heading_deg =
                    (self.heading_deg + frame.d1.unwrap_or(0) as f64).rem_euclid(360.0);
                MockReply::Immediate(b"ok".to_vec())
            }
            OP_QUERY_POSE => {
                let reply = serde_json::json!({
                    "H": frame.correlation_id,
                    "pose": {
                        "x": round2(self.x_cm / 100.0),
                        "y": round2(self.y_cm / 100.0),
                        "theta": round2(self.heading_deg),
                    }
                });
                MockReply::Immediate(reply.to_string().into_bytes())
            }
            _ => MockReply::Silent,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(transport: &mut MockTransport) -> Vec<u8> {
        let mut buffer = [0u8; 256];
        let n = transport.read(&mut buffer).unwrap();
        buffer[..n].to_vec()
    }

    #[test]
    fn test_scripted_replies_then_silence() {
        let mut transport = MockTransport::scripted([
            MockReply::Immediate(b"first".to_vec()),
            MockReply::Silent,
        ]);
        let handle = transport.handle();

        transport.write(b"a").unwrap();
        assert_eq!(transport.available().unwrap(), 5);
        assert_eq!(read_all(&mut transport), b"first");

        transport.write(b"b").unwrap();
        transport.write(b"c").unwrap();
        assert_eq!(transport.available().unwrap(), 0);
        assert_eq!(handle.written_strings(), vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_reply() {
        let mut transport = MockTransport::scripted([MockReply::Delayed(
            b"late".to_vec(),
            Duration::from_millis(50),
        )]);
        transport.write(b"x").unwrap();
        assert_eq!(transport.available().unwrap(), 0);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(transport.available().unwrap(), 4);
    }

    #[test]
    fn test_simulated_controller_pose() {
        let mut controller = SimulatedController::default();
        let ok = MockReply::Immediate(b"ok".to_vec());

        assert_eq!(
            controller.respond(br#"{"N":200,"D1":1,"D2":50,"H":"m1"}"#),
            ok
        );
        assert_eq!(controller.respond(br#"{"N":201,"D1":90,"H":"t1"}"#), ok);
        controller.respond(br#"{"N":200,"D1":1,"D2":20,"H":"m2"}"#);

        let (x, y, heading) = controller.pose();
        assert!((x - 50.0).abs() < 1e-9);
        assert!((y - 20.0).abs() < 1e-9);
        assert!((heading - 90.0).abs() < 1e-9);

        let MockReply::Immediate(reply) = controller.respond(br#"{"N":300,"H":"p1234"}"#) else {
            panic!("pose query must be answered");
        };
        let reply: serde_json::Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply["H"], "p1234");
        assert_eq!(reply["pose"]["x"], 0.5);
        assert_eq!(reply["pose"]["y"], 0.2);
    }

    #[test]
    fn test_simulated_controller_ignores_garbage() {
        let mut controller = SimulatedController::default();
        assert_eq!(controller.respond(b"hello"), MockReply::Silent);
        assert_eq!(controller.respond(br#"{"N":999,"H":"z"}"#), MockReply::Silent);
    }
}
