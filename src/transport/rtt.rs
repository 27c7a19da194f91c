//! Round-trip-time measurement over ping/ack correlation.
//!
//! Outbound ping codes are remembered in a bounded circular slot map; when
//! the matching acknowledgement arrives, the elapsed time becomes a sample in
//! a bounded rolling window. The reported smoothed RTT is the arithmetic mean
//! over that window. Acknowledgements for unknown codes are a recoverable
//! no-op: the ack was stale, duplicated or spoofed, and the statistics are
//! left untouched.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One consistent view of the timer's statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttSnapshot {
    /// Mean round-trip time over the rolling window, `None` before the first
    /// completed sample.
    pub smoothed_rtt: Option<Duration>,
    /// Population variance over the rolling window, in milliseconds squared.
    pub variance: f64,
    /// The most recent sample.
    pub last_sample: Option<Duration>,
    /// Total samples recorded since construction.
    pub sample_count: u64,
}

struct RttInner {
    /// Circular map of in-flight pings; `next_slot` overwrites the oldest
    /// entry when the capacity is reached.
    in_flight: Vec<Option<(u16, Instant)>>,
    next_slot: usize,
    /// Rolling window of completed samples, newest at the back.
    samples: VecDeque<Duration>,
    window: usize,
    last_sample: Option<Duration>,
    total: u64,
}

/// Tracks outbound pings and derives smoothed latency from their acks.
///
/// Safe to call from the send and receive paths concurrently; the slot map
/// and statistics sit behind one short critical section.
pub struct RoundTripTimer {
    inner: Mutex<RttInner>,
}

impl RoundTripTimer {
    /// Create a timer holding at most `max_in_flight` outstanding pings and
    /// averaging over the last `window` samples.
    ///
    /// # Panics
    ///
    /// Panics if either size is zero.
    pub fn new(max_in_flight: usize, window: usize) -> Self {
        assert!(max_in_flight > 0, "in-flight capacity must be non-zero");
        assert!(window > 0, "sample window must be non-zero");
        Self {
            inner: Mutex::new(RttInner {
                in_flight: vec![None; max_in_flight],
                next_slot: 0,
                samples: VecDeque::with_capacity(window),
                window,
                last_sample: None,
                total: 0,
            }),
        }
    }

    /// Record that a ping with `code` is leaving now.
    pub fn record_outbound(&self, code: u16) {
        self.record_outbound_at(code, Instant::now());
    }

    fn record_outbound_at(&self, code: u16, at: Instant) {
        let mut inner = self.inner.lock().unwrap();
        // Re-sending a code that is already in flight re-arms it in place.
        if let Some(entry) = inner
            .in_flight
            .iter_mut()
            .flatten()
            .find(|(pending, _)| *pending == code)
        {
            entry.1 = at;
            return;
        }
        let slot = inner.next_slot;
        inner.in_flight[slot] = Some((code, at));
        inner.next_slot = (slot + 1) % inner.in_flight.len();
    }

    /// Record an acknowledgement for `code`, returning the completed sample.
    ///
    /// Returns `None` when the code was never recorded outbound (or was
    /// already evicted); the statistics are unchanged in that case.
    pub fn record_inbound(&self, code: u16) -> Option<Duration> {
        self.record_inbound_at(code, Instant::now())
    }

    fn record_inbound_at(&self, code: u16, at: Instant) -> Option<Duration> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .in_flight
            .iter()
            .position(|entry| matches!(entry, Some((pending, _)) if *pending == code))?;
        let (_, sent) = inner.in_flight[slot].take()?;
        let sample = at.saturating_duration_since(sent);
        if inner.samples.len() == inner.window {
            inner.samples.pop_front();
        }
        inner.samples.push_back(sample);
        inner.last_sample = Some(sample);
        inner.total += 1;
        Some(sample)
    }

    /// Mean round-trip time over the rolling window.
    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.snapshot().smoothed_rtt
    }

    /// The most recent sample.
    pub fn last_sample(&self) -> Option<Duration> {
        self.inner.lock().unwrap().last_sample
    }

    /// Total samples recorded since construction.
    pub fn sample_count(&self) -> u64 {
        self.inner.lock().unwrap().total
    }

    /// All statistics under a single lock acquisition.
    pub fn snapshot(&self) -> RttSnapshot {
        let inner = self.inner.lock().unwrap();
        let smoothed_rtt = if inner.samples.is_empty() {
            None
        } else {
            let sum: Duration = inner.samples.iter().sum();
            Some(sum / inner.samples.len() as u32)
        };
        let variance = if inner.samples.is_empty() {
            0.0
        } else {
            let mean_ms = smoothed_rtt.unwrap_or_default().as_secs_f64() * 1000.0;
            inner
                .samples
                .iter()
                .map(|sample| {
                    let delta = sample.as_secs_f64() * 1000.0 - mean_ms;
                    delta * delta
                })
                .sum::<f64>()
                / inner.samples.len() as f64
        };
        RttSnapshot {
            smoothed_rtt,
            variance,
            last_sample: inner.last_sample,
            sample_count: inner.total,
        }
    }
}

impl std::fmt::Debug for RoundTripTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("RoundTripTimer")
            .field("smoothed_rtt", &snapshot.smoothed_rtt)
            .field("sample_count", &snapshot.sample_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_smoothed_rtt_is_window_mean() {
        let timer = RoundTripTimer::new(8, 8);
        let start = Instant::now();
        // Pings at t=0, 10, 20 ms; acks at t=15, 25, 35 ms: 15 ms each.
        for (code, sent, acked) in [(1u16, 0, 15), (2, 10, 25), (3, 20, 35)] {
            timer.record_outbound_at(code, start + ms(sent));
            assert_eq!(
                timer.record_inbound_at(code, start + ms(acked)),
                Some(ms(15))
            );
        }
        let snapshot = timer.snapshot();
        assert_eq!(snapshot.smoothed_rtt, Some(ms(15)));
        assert_eq!(snapshot.sample_count, 3);
        assert_eq!(snapshot.last_sample, Some(ms(15)));
        assert_eq!(snapshot.variance, 0.0);
    }

    #[test]
    fn test_mixed_samples_average() {
        let timer = RoundTripTimer::new(8, 8);
        let start = Instant::now();
        timer.record_outbound_at(1, start);
        timer.record_inbound_at(1, start + ms(10));
        timer.record_outbound_at(2, start);
        timer.record_inbound_at(2, start + ms(30));
        assert_eq!(timer.smoothed_rtt(), Some(ms(20)));
        assert!(timer.snapshot().variance > 0.0);
    }

    #[test]
    fn test_window_evicts_oldest_sample() {
        let timer = RoundTripTimer::new(8, 2);
        let start = Instant::now();
        for (code, rtt) in [(1u16, 100), (2, 10), (3, 20)] {
            timer.record_outbound_at(code, start);
            timer.record_inbound_at(code, start + ms(rtt));
        }
        // The 100 ms sample fell out of the window of two.
        assert_eq!(timer.smoothed_rtt(), Some(ms(15)));
        assert_eq!(timer.sample_count(), 3);
    }

    #[test]
    fn test_unknown_ack_is_noop() {
        let timer = RoundTripTimer::new(4, 4);
        let start = Instant::now();
        timer.record_outbound_at(1, start);
        assert_eq!(timer.record_inbound_at(99, start + ms(5)), None);
        let snapshot = timer.snapshot();
        assert_eq!(snapshot.sample_count, 0);
        assert_eq!(snapshot.smoothed_rtt, None);
        // The real ping is still in flight.
        assert_eq!(timer.record_inbound_at(1, start + ms(7)), Some(ms(7)));
    }

    #[test]
    fn test_full_map_evicts_oldest_ping() {
        let timer = RoundTripTimer::new(2, 4);
        let start = Instant::now();
        timer.record_outbound_at(1, start);
        timer.record_outbound_at(2, start);
        timer.record_outbound_at(3, start); // overwrites code 1
        assert_eq!(timer.record_inbound_at(1, start + ms(5)), None);
        assert_eq!(timer.record_inbound_at(2, start + ms(5)), Some(ms(5)));
        assert_eq!(timer.record_inbound_at(3, start + ms(5)), Some(ms(5)));
    }

    #[test]
    fn test_duplicate_outbound_rearms_in_place() {
        let timer = RoundTripTimer::new(4, 4);
        let start = Instant::now();
        timer.record_outbound_at(7, start);
        timer.record_outbound_at(7, start + ms(10));
        // The sample is measured from the re-armed send time.
        assert_eq!(timer.record_inbound_at(7, start + ms(15)), Some(ms(5)));
        // And the code is gone afterwards.
        assert_eq!(timer.record_inbound_at(7, start + ms(20)), None);
    }

    #[test]
    fn test_duplicate_ack_is_noop() {
        let timer = RoundTripTimer::new(4, 4);
        let start = Instant::now();
        timer.record_outbound_at(1, start);
        assert_eq!(timer.record_inbound_at(1, start + ms(5)), Some(ms(5)));
        assert_eq!(timer.record_inbound_at(1, start + ms(9)), None);
        assert_eq!(timer.sample_count(), 1);
    }
}
