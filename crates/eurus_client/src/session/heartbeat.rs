//! Keep-alive ping tracking.
//!
//! Each ping carries an 8-byte big-endian sequence number. Several pings may
//! be in flight; a pong acknowledges its own ping and every earlier one. The
//! transport counts as dead once the oldest unanswered ping is older than the
//! pong timeout.

use std::time::Duration;

use tokio::time::Instant;

/// Outstanding-ping tracker for one live transport.
#[derive(Debug)]
pub struct KeepAlive {
    pong_timeout: Duration,
    next_seq: u64,
    /// Unanswered pings in send order: (seq, sent_at).
    pending: Vec<(u64, Instant)>,
    last_rtt: Option<Duration>,
}

impl KeepAlive {
    pub fn new(pong_timeout: Duration) -> Self {
        Self {
            pong_timeout,
            next_seq: 1,
            pending: Vec::new(),
            last_rtt: None,
        }
    }

    /// Record a ping sent at `now` and return its payload.
    pub fn ping(&mut self, now: Instant) -> Vec<u8> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1).max(1);
        self.pending.push((seq, now));
        seq.to_be_bytes().to_vec()
    }

    /// Match a pong. Returns the round-trip time if it answers a pending ping.
    pub fn on_pong(&mut self, payload: &[u8], now: Instant) -> Option<Duration> {
        let seq = u64::from_be_bytes(payload.try_into().ok()?);
        let (_, sent_at) = *self.pending.iter().find(|(s, _)| *s == seq)?;
        self.pending.retain(|(s, _)| *s > seq);
        let rtt = now.saturating_duration_since(sent_at);
        self.last_rtt = Some(rtt);
        Some(rtt)
    }

    /// When the oldest unanswered ping expires, if any is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending
            .first()
            .map(|(_, sent_at)| *sent_at + self.pong_timeout)
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }
}
