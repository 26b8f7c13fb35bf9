//! Mutually exclusive access to the controller link

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use super::Transport;
use crate::error::{Error, Result};

const READ_CHUNK: usize = 256;

/// Most stale bytes discarded before a frame is sent
const DRAIN_LIMIT: usize = 64 * 1024;

/// Most bytes taken off the link between two settle checks
const READ_BUDGET: usize = 4 * 1024;

/// Polling cadence of a link exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Sleep between availability checks while waiting for a reply
    pub poll_interval: Duration,
    /// Quiet gap after which a reply is considered complete
    pub settle: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            settle: Duration::from_millis(20),
        }
    }
}

/// Cloneable handle to the one physical link.
///
/// Every request/response exchange holds the lock from the first stale-byte
/// check until the reply (or the deadline), so replies consumed by one
/// exchange are never seen by another.
#[derive(Clone)]
pub struct SharedLink {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    timing: LinkTiming,
}

impl SharedLink {
    pub fn new<T: Transport + 'static>(transport: T, timing: LinkTiming) -> Self {
        Self {
            transport: Arc::new(Mutex::new(Box::new(transport))),
            timing,
        }
    }

    pub fn timing(&self) -> LinkTiming {
        self.timing
    }

    /// Send `frame` and wait up to `timeout` for a non-empty reply.
    ///
    /// Dropping the returned future stops waiting and releases the link; the
    /// controller is not told.
    pub async fn exchange(
        &self,
        frame: &[u8],
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<Bytes> {
        let mut guard = self.transport.clone().lock_owned().await;

        let stale = drain(&mut **guard)?;
        if stale > 0 {
            tracing::debug!(correlation_id, bytes = stale, "Discarded stale link bytes");
        }

        // A serial flush waits for the UART to drain, so it runs off the
        // async workers. The guard travels with it and the link stays held.
        let payload = frame.to_vec();
        let mut guard = tokio::task::spawn_blocking(move || -> Result<LinkGuard> {
            write_all(&mut **guard, &payload)?;
            guard.flush()?;
            Ok(guard)
        })
        .await
        .map_err(|e| Error::Link(format!("link write task failed: {}", e)))??;
        let transport: &mut dyn Transport = &mut **guard;
        tracing::debug!(
            correlation_id,
            frame = %String::from_utf8_lossy(frame),
            "Sent link frame"
        );

        let deadline = Instant::now() + timeout;
        loop {
            if transport.available()? > 0 {
                let reply = self.read_reply(transport, deadline).await?;
                if !reply.is_empty() {
                    tracing::debug!(
                        correlation_id,
                        reply = %String::from_utf8_lossy(&reply),
                        "Received link reply"
                    );
                    return Ok(reply);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    correlation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Link reply timed out"
                );
                return Err(Error::LinkTimeout {
                    correlation_id: correlation_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.timing.poll_interval.min(deadline - now)).await;
        }
    }

    /// Read until the line stays quiet for one settle period or the
    /// deadline passes, whichever comes first
    async fn read_reply(&self, transport: &mut dyn Transport, deadline: Instant) -> Result<Bytes> {
        let mut reply = BytesMut::new();
        loop {
            read_available(transport, &mut reply, READ_BUDGET)?;

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    bytes = reply.len(),
                    "Link still sending at deadline, taking reply as is"
                );
                return Ok(reply.freeze());
            }
            tokio::time::sleep(self.timing.settle.min(deadline - now)).await;
            if transport.available()? == 0 {
                return Ok(reply.freeze());
            }
        }
    }
}

type LinkGuard = OwnedMutexGuard<Box<dyn Transport>>;

/// Take at most `limit` of the bytes currently waiting
fn read_available(transport: &mut dyn Transport, into: &mut BytesMut, limit: usize) -> Result<usize> {
    let mut total = 0;
    let mut chunk = [0u8; READ_CHUNK];
    while total < limit && transport.available()? > 0 {
        let want = READ_CHUNK.min(limit - total);
        let n = transport.read(&mut chunk[..want])?;
        if n == 0 {
            break;
        }
        into.extend_from_slice(&chunk[..n]);
        total += n;
    }
    Ok(total)
}

fn drain(transport: &mut dyn Transport) -> Result<usize> {
    let mut discard = BytesMut::new();
    read_available(transport, &mut discard, DRAIN_LIMIT)
}

fn write_all(transport: &mut dyn Transport, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let n = transport.write(data)?;
        if n == 0 {
            return Err(Error::Link("link accepted no bytes".to_string()));
        }
        data = &data[n..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::link::{MockReply, MockTransport};

    const TIMEOUT: Duration = Duration::from_millis(3000);

    #[tokio::test(start_paused = true)]
    async fn test_exchange_returns_reply() {
        let transport = MockTransport::acking("ok\r\n");
        let handle = transport.handle();
        let link = SharedLink::new(transport, LinkTiming::default());

        let reply = link.exchange(b"frame", "m1", TIMEOUT).await.unwrap();
        assert_eq!(&reply[..], b"ok\r\n");
        assert_eq!(handle.written_strings(), vec!["frame"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds() {
        let link = SharedLink::new(MockTransport::new(), LinkTiming::default());
        let started = Instant::now();

        let err = link.exchange(b"frame", "t1", TIMEOUT).await.unwrap_err();
        let waited = started.elapsed();

        assert!(matches!(
            err,
            Error::LinkTimeout { ref correlation_id, timeout_ms: 3000 } if correlation_id == "t1"
        ));
        assert!(waited >= TIMEOUT);
        assert!(waited <= TIMEOUT + link.timing().poll_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_reply_within_deadline() {
        let transport = MockTransport::scripted([MockReply::Delayed(
            b"ok".to_vec(),
            Duration::from_millis(1200),
        )]);
        let link = SharedLink::new(transport, LinkTiming::default());
        let started = Instant::now();

        let reply = link.exchange(b"frame", "m1", TIMEOUT).await.unwrap();
        assert_eq!(&reply[..], b"ok");
        assert!(started.elapsed() >= Duration::from_millis(1200));
        assert!(started.elapsed() < TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_bytes_are_discarded_before_sending() {
        let transport = MockTransport::scripted([MockReply::Delayed(
            b"fresh".to_vec(),
            Duration::from_millis(10),
        )]);
        let handle = transport.handle();
        handle.inject(b"stale-from-earlier-timeout");
        let link = SharedLink::new(transport, LinkTiming::default());

        let reply = link.exchange(b"frame", "m1", TIMEOUT).await.unwrap();
        assert_eq!(&reply[..], b"fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_exchanges_never_share_replies() {
        let mut counter = 0;
        let transport = MockTransport::with_responder(move |frame| {
            counter += 1;
            let reply = format!("reply-to-{}", String::from_utf8_lossy(frame));
            MockReply::Delayed(reply.into_bytes(), Duration::from_millis(40 + counter * 7))
        });
        let link = SharedLink::new(transport, LinkTiming::default());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let link = link.clone();
            tasks.push(tokio::spawn(async move {
                let frame = format!("f{}", i);
                let reply = link.exchange(frame.as_bytes(), &frame, TIMEOUT).await.unwrap();
                (frame, reply)
            }));
        }

        for task in tasks {
            let (frame, reply) = task.await.unwrap();
            assert_eq!(reply, Bytes::from(format!("reply-to-{}", frame)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chatty_link_still_ends_at_deadline() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let link = SharedLink::new(transport, LinkTiming::default());

        let chatter = tokio::spawn(async move {
            loop {
                handle.inject(b"telemetry\n");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(Duration::from_secs(30), link.exchange(b"frame", "m1", TIMEOUT))
                .await;
        chatter.abort();

        let reply = outcome.expect("exchange outlived its deadline").unwrap();
        assert!(reply.starts_with(b"telemetry\n"));
        assert!(started.elapsed() <= TIMEOUT + link.timing().poll_interval);
    }

    #[test]
    fn test_read_available_respects_limit() {
        let mut transport = MockTransport::new();
        transport.handle().inject(&[b'x'; 600]);

        let mut into = BytesMut::new();
        assert_eq!(read_available(&mut transport, &mut into, 300).unwrap(), 300);
        assert_eq!(into.len(), 300);
        assert_eq!(transport.available().unwrap(), 300);
    }

    /// Transport whose flush blocks the calling thread until released
    struct SlowFlush {
        inbound: Vec<u8>,
        release: Arc<AtomicBool>,
        released_during_flush: Arc<AtomicBool>,
    }

    impl Transport for SlowFlush {
        fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
            let n = buffer.len().min(self.inbound.len());
            buffer[..n].copy_from_slice(&self.inbound[..n]);
            self.inbound.drain(..n);
            Ok(n)
        }

        fn write(&mut self, data: &[u8]) -> Result<usize> {
            self.inbound.extend_from_slice(b"ok");
            Ok(data.len())
        }

        fn flush(&mut self) -> Result<()> {
            let started = std::time::Instant::now();
            while !self.release.load(Ordering::SeqCst)
                && started.elapsed() < Duration::from_millis(500)
            {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.released_during_flush
                .store(self.release.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok(())
        }

        fn available(&mut self) -> Result<usize> {
            Ok(self.inbound.len())
        }
    }

    #[tokio::test]
    async fn test_blocking_flush_leaves_runtime_free() {
        let release = Arc::new(AtomicBool::new(false));
        let released_during_flush = Arc::new(AtomicBool::new(false));
        let link = SharedLink::new(
            SlowFlush {
                inbound: Vec::new(),
                release: release.clone(),
                released_during_flush: released_during_flush.clone(),
            },
            LinkTiming::default(),
        );

        let (reply, _) = tokio::join!(link.exchange(b"frame", "m1", TIMEOUT), async {
            tokio::task::yield_now().await;
            release.store(true, Ordering::SeqCst);
        });

        assert_eq!(&reply.unwrap()[..], b"ok");
        assert!(released_during_flush.load(Ordering::SeqCst));
    }
}
