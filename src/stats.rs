//! Non-blocking telemetry publishers (§5 "Shared resources", §6
//! "Publishers").
//!
//! Grounded on `original_source/src/goesrecv/publisher.h`/`.cc` and
//! `stats_publisher.cc`: a publisher checks `hasSubscribers()` before doing
//! any work, and `publish()` never blocks the caller waiting for a slow or
//! absent subscriber. The original achieves this with a nanomsg `PUB`
//! socket, whose `NN_STAT_CURRENT_CONNECTIONS` statistic backs
//! `hasSubscribers()` and whose `nn_send` is fire-and-forget per
//! connection. This crate has no message bus to bind to, so the same shape
//! is reconstructed with in-process channels: each subscriber gets a
//! bounded [`std::sync::mpsc::SyncSender`], `publish()` does a non-blocking
//! `try_send` to each one, and a subscriber that can't keep up just misses
//! updates rather than stalling the producer.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

/// Per-subscriber channel capacity. Telemetry is inherently lossy: a
/// subscriber that falls this far behind starts missing updates instead of
/// back-pressuring the pipeline.
const SUBSCRIBER_CAPACITY: usize = 16;

/// A single-producer, multi-consumer, non-blocking fan-out of `T` values.
///
/// Cloning is not supported: exactly one stage owns the producer side,
/// matching the "single-producer" note in the specification's shared
/// resources section. Consumers subscribe independently and may come and
/// go at any time.
pub struct Publisher<T: Clone> {
    subscribers: Mutex<Vec<SyncSender<T>>>,
}

impl<T: Clone> Publisher<T> {
    /// Create a publisher with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber, returning the receiving end.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = sync_channel(SUBSCRIBER_CAPACITY);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Whether at least one subscriber is currently registered.
    ///
    /// Mirrors the original's `hasSubscribers()` gate: callers check this
    /// before doing any work to build the value they'd publish.
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.lock().unwrap().is_empty()
    }

    /// Publish one value to every current subscriber.
    ///
    /// A no-op when there are no subscribers. Never blocks: a full
    /// subscriber channel drops the value for that subscriber rather than
    /// waiting, and a subscriber whose receiver has been dropped is
    /// removed from the list.
    pub fn publish(&self, value: T) {
        let mut subs = self.subscribers.lock().unwrap();
        if subs.is_empty() {
            return;
        }
        subs.retain(|tx| match tx.try_send(value.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl<T: Clone> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Demodulator-stage telemetry: one sample per reporting interval from the
/// AGC, Costas loop, and clock recovery loops.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemodStats {
    /// Current AGC gain.
    pub agc_gain: f32,
    /// Costas loop frequency estimate, in radians/sample.
    pub costas_frequency: f32,
    /// Clock recovery's current samples-per-symbol estimate.
    pub clock_omega: f32,
}

/// Shared sink for [`DemodStats`]: the AGC, Costas loop, and clock
/// recovery stages each run on their own thread and own only one field of
/// the demodulator's overall state, so they share one snapshot behind a
/// mutex and republish the merged value whenever any of them updates.
pub struct DemodTelemetry {
    current: Mutex<DemodStats>,
    publisher: Publisher<DemodStats>,
}

impl DemodTelemetry {
    /// Create a telemetry sink with no subscribers yet.
    pub fn new() -> Self {
        Self {
            current: Mutex::new(DemodStats::default()),
            publisher: Publisher::new(),
        }
    }

    /// Register a new subscriber, returning the receiving end.
    pub fn subscribe(&self) -> Receiver<DemodStats> {
        self.publisher.subscribe()
    }

    /// Apply `f` to the shared snapshot and republish it, unless nobody
    /// is listening.
    pub fn update(&self, f: impl FnOnce(&mut DemodStats)) {
        if !self.publisher.has_subscribers() {
            return;
        }
        let mut snapshot = self.current.lock().unwrap();
        f(&mut snapshot);
        self.publisher.publish(*snapshot);
    }
}

impl Default for DemodTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Packetizer-stage telemetry, one sample per decoded frame.
#[derive(Debug, Clone, Copy)]
pub struct PacketizerStats {
    /// Whether the frame was accepted (Reed-Solomon succeeded).
    pub ok: bool,
    /// Bit errors the Viterbi decoder's re-encode check found.
    pub viterbi_bit_errors: usize,
    /// Byte errors Reed-Solomon corrected, if the codeword was decodable.
    pub reed_solomon_byte_errors: Option<usize>,
    /// Symbols skipped while reacquiring lock, since the last frame.
    pub skipped_symbols: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subscribers_means_no_work_but_does_not_panic() {
        let pub_: Publisher<u32> = Publisher::new();
        assert!(!pub_.has_subscribers());
        pub_.publish(42);
    }

    #[test]
    fn a_subscriber_receives_published_values() {
        let pub_: Publisher<u32> = Publisher::new();
        let rx = pub_.subscribe();
        assert!(pub_.has_subscribers());
        pub_.publish(7);
        assert_eq!(rx.try_recv(), Ok(7));
    }

    #[test]
    fn a_full_subscriber_is_not_dropped_from_the_list() {
        let pub_: Publisher<u32> = Publisher::new();
        let _rx = pub_.subscribe();
        for i in 0..(SUBSCRIBER_CAPACITY as u32 + 5) {
            pub_.publish(i);
        }
        assert!(pub_.has_subscribers());
    }

    #[test]
    fn a_dropped_receiver_is_pruned_on_next_publish() {
        let pub_: Publisher<u32> = Publisher::new();
        let rx = pub_.subscribe();
        drop(rx);
        pub_.publish(1);
        assert!(!pub_.has_subscribers());
    }

    #[test]
    fn demod_telemetry_merges_updates_from_every_field() {
        let telemetry = DemodTelemetry::new();
        let rx = telemetry.subscribe();

        telemetry.update(|s| s.agc_gain = 1.5);
        telemetry.update(|s| s.costas_frequency = 0.01);
        telemetry.update(|s| s.clock_omega = 4.0);

        let last = rx.try_iter().last().unwrap();
        assert_eq!(last.agc_gain, 1.5);
        assert_eq!(last.costas_frequency, 0.01);
        assert_eq!(last.clock_omega, 4.0);
    }

    #[test]
    fn demod_telemetry_skips_work_with_no_subscribers() {
        let telemetry = DemodTelemetry::new();
        telemetry.update(|s| s.agc_gain = 99.0);
        assert!(!telemetry.publisher.has_subscribers());
    }
}
