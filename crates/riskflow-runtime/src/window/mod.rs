//! Event-time windowing
//!
//! Windows are keyed, event-time bounded, and closed by watermark. The
//! watermark trails the maximum observed event time by the configured
//! out-of-orderness bound; a window emits once the watermark passes its end
//! plus the allowed lateness, and events targeting an already-closed window
//! are dropped and counted.

pub mod aggregates;

use riskflow_core::{AggregateRecord, Transaction};
use std::collections::HashMap;
use tracing::debug;

pub use aggregates::AggregatorSet;

/// Default watermark lag behind max event time
pub const DEFAULT_OUT_OF_ORDERNESS_MS: i64 = 10_000;
/// Tighter bound used by the high-frequency detector
pub const HIGH_FREQUENCY_OUT_OF_ORDERNESS_MS: i64 = 5_000;
/// Grace period past window end before the window closes
pub const ALLOWED_LATENESS_MS: i64 = 30_000;

/// Window assignment strategy
#[derive(Debug, Clone, Copy)]
pub enum WindowKind {
    Tumbling { size_ms: i64 },
    Sliding { size_ms: i64, slide_ms: i64 },
    Session { gap_ms: i64 },
}

/// Per-key accumulator folded over a window's transactions
///
/// Merging must be commutative and associative; accumulators track the
/// min/max event timestamps of their contributions so emitted records bound
/// the actual events, not the nominal window.
pub trait Accumulator: Default + Send {
    fn add(&mut self, tx: &Transaction);
    fn merge(&mut self, other: Self);
    fn finish(&self) -> AggregateRecord;
    fn count(&self) -> u64;
}

struct WindowState<A> {
    start_ms: i64,
    end_ms: i64,
    acc: A,
    adds_since_trigger: u64,
}

/// Keyed event-time window operator
pub struct WindowedAggregator<A: Accumulator> {
    name: &'static str,
    kind: WindowKind,
    out_of_orderness_ms: i64,
    allowed_lateness_ms: i64,
    key_fn: Box<dyn Fn(&Transaction) -> String + Send + Sync>,
    /// Early-emission trigger: fire a snapshot every N additions
    count_trigger: Option<u64>,
    watermark_ms: i64,
    windows: HashMap<String, Vec<WindowState<A>>>,
    late_dropped: u64,
}

impl<A: Accumulator> WindowedAggregator<A> {
    pub fn new(
        name: &'static str,
        kind: WindowKind,
        out_of_orderness_ms: i64,
        key_fn: impl Fn(&Transaction) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            kind,
            out_of_orderness_ms,
            allowed_lateness_ms: ALLOWED_LATENESS_MS,
            key_fn: Box::new(key_fn),
            count_trigger: None,
            watermark_ms: i64::MIN,
            windows: HashMap::new(),
            late_dropped: 0,
        }
    }

    /// Fire an early snapshot every `n` additions to a window
    pub fn with_count_trigger(mut self, n: u64) -> Self {
        self.count_trigger = Some(n);
        self
    }

    pub fn watermark_ms(&self) -> i64 {
        self.watermark_ms
    }

    /// Number of events dropped for arriving after their window closed
    pub fn late_dropped(&self) -> u64 {
        self.late_dropped
    }

    /// Fold one transaction in; returns any records emitted by early
    /// triggers or windows closed by the advancing watermark
    pub fn process(&mut self, tx: &Transaction) -> Vec<AggregateRecord> {
        let ts = tx.event_time_ms();
        let key = (self.key_fn)(tx);
        let mut emitted = Vec::new();

        self.insert(&key, ts, tx, &mut emitted);

        let new_watermark = ts - self.out_of_orderness_ms;
        if new_watermark > self.watermark_ms {
            self.watermark_ms = new_watermark;
        }
        self.close_ready(&mut emitted);

        emitted
    }

    /// Advance the watermark without an event (idle-source progress)
    pub fn advance_watermark(&mut self, watermark_ms: i64) -> Vec<AggregateRecord> {
        if watermark_ms > self.watermark_ms {
            self.watermark_ms = watermark_ms;
        }
        let mut emitted = Vec::new();
        self.close_ready(&mut emitted);
        emitted
    }

    /// Emit everything still buffered, regardless of watermark
    pub fn flush(&mut self) -> Vec<AggregateRecord> {
        let mut emitted = Vec::new();
        for (_, states) in self.windows.drain() {
            for state in states {
                if state.acc.count() > 0 {
                    emitted.push(state.acc.finish());
                }
            }
        }
        emitted
    }

    fn insert(&mut self, key: &str, ts: i64, tx: &Transaction, emitted: &mut Vec<AggregateRecord>) {
        match self.kind {
            WindowKind::Tumbling { size_ms } => {
                let start = ts.div_euclid(size_ms) * size_ms;
                self.add_to_window(key, start, start + size_ms, tx, emitted);
            }
            WindowKind::Sliding { size_ms, slide_ms } => {
                // Every slide-aligned window containing ts
                let last_start = ts.div_euclid(slide_ms) * slide_ms;
                let mut start = last_start;
                while start + size_ms > ts {
                    self.add_to_window(key, start, start + size_ms, tx, emitted);
                    start -= slide_ms;
                }
            }
            WindowKind::Session { gap_ms } => {
                self.add_to_session(key, ts, gap_ms, tx);
            }
        }
    }

    fn add_to_window(
        &mut self,
        key: &str,
        start_ms: i64,
        end_ms: i64,
        tx: &Transaction,
        emitted: &mut Vec<AggregateRecord>,
    ) {
        if self.watermark_ms >= end_ms + self.allowed_lateness_ms {
            self.late_dropped += 1;
            debug!(operator = self.name, key, "dropped late event");
            return;
        }

        let states = self.windows.entry(key.to_string()).or_default();
        let state = match states.iter_mut().find(|s| s.start_ms == start_ms) {
            Some(state) => state,
            None => {
                states.push(WindowState {
                    start_ms,
                    end_ms,
                    acc: A::default(),
                    adds_since_trigger: 0,
                });
                states.last_mut().expect("just pushed")
            }
        };

        state.acc.add(tx);
        state.adds_since_trigger += 1;

        if let Some(trigger) = self.count_trigger {
            if state.adds_since_trigger >= trigger {
                state.adds_since_trigger = 0;
                emitted.push(state.acc.finish());
            }
        }
    }

    fn add_to_session(&mut self, key: &str, ts: i64, gap_ms: i64, tx: &Transaction) {
        if self.watermark_ms >= ts + gap_ms + self.allowed_lateness_ms {
            self.late_dropped += 1;
            return;
        }

        let states = self.windows.entry(key.to_string()).or_default();
        let mut fresh = WindowState {
            start_ms: ts,
            end_ms: ts + gap_ms,
            acc: A::default(),
            adds_since_trigger: 0,
        };
        fresh.acc.add(tx);

        // Merge every session overlapping the new one
        let mut merged = fresh;
        let mut kept = Vec::with_capacity(states.len());
        for state in states.drain(..) {
            if state.start_ms <= merged.end_ms && merged.start_ms <= state.end_ms {
                merged.start_ms = merged.start_ms.min(state.start_ms);
                merged.end_ms = merged.end_ms.max(state.end_ms);
                merged.acc.merge(state.acc);
            } else {
                kept.push(state);
            }
        }
        kept.push(merged);
        *states = kept;
    }

    fn close_ready(&mut self, emitted: &mut Vec<AggregateRecord>) {
        let watermark = self.watermark_ms;
        let lateness = self.allowed_lateness_ms;

        self.windows.retain(|_, states| {
            states.retain_mut(|state| {
                if watermark >= state.end_ms + lateness {
                    if state.acc.count() > 0 {
                        emitted.push(state.acc.finish());
                    }
                    false
                } else {
                    true
                }
            });
            !states.is_empty()
        });
    }
}
