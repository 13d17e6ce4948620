//! Per-actor admission rate limiter.
//!
//! An `Instant`-based housekeeping interval, checked against the current
//! time on every hit, generalized into a standalone, mutex-guarded
//! counter. A single mutex is enough here since the critical section is
//! O(1).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::logging::Logger;

struct State {
    interval_anchor: Instant,
    counts: HashMap<String, u32>,
    logged_once: HashSet<String>,
}

/// Per-actor hit counter that resets on a fixed wall-clock interval, with
/// a one-shot log line on the first rejection per interval per actor.
pub struct RateLimiter {
    interval: Duration,
    max_hits: u32,
    state: Mutex<State>,
    log: Logger,
}

impl RateLimiter {
    /// Constructs a limiter for `(interval_seconds, max_hits)`, applying
    /// the calibration quirk: if `interval_seconds == 1`
    /// and `max_hits` is divisible by one of `{11, 7, 5, 3, 2}` (first
    /// divisor that divides `max_hits`, checked in that order), both are
    /// scaled up by that factor to reduce log spam while preserving the
    /// same admitted rate.
    pub fn new(interval_seconds: u64, max_hits: u32, log: Logger) -> RateLimiter {
        let (interval_seconds, max_hits) = Self::calibrate(interval_seconds, max_hits);

        RateLimiter {
            interval: Duration::from_secs(interval_seconds),
            max_hits,
            state: Mutex::new(State {
                interval_anchor: Instant::now(),
                counts: HashMap::new(),
                logged_once: HashSet::new(),
            }),
            log,
        }
    }

    fn calibrate(interval_seconds: u64, max_hits: u32) -> (u64, u32) {
        if interval_seconds != 1 {
            return (interval_seconds, max_hits);
        }
        for divisor in [11, 7, 5, 3, 2] {
            if max_hits % divisor == 0 {
                return (interval_seconds * divisor as u64, max_hits * divisor);
            }
        }
        (interval_seconds, max_hits)
    }

    /// Attempts to admit one request from `actor`. Returns `true` if
    /// admitted, `false` if rejected. A rejection logs once per interval
    /// per actor; subsequent rejections in the same interval are silent.
    pub fn admit(&self, actor: &str) -> bool {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");

        if state.interval_anchor.elapsed() >= self.interval {
            state.counts.clear();
            state.logged_once.clear();
            state.interval_anchor = Instant::now();
        }

        let count = state.counts.entry(actor.to_string()).or_insert(0);
        if *count >= self.max_hits {
            if state.logged_once.insert(actor.to_string()) {
                slog::info!(self.log, "rate limit exceeded"; "actor" => actor, "limit" => self.max_hits);
            }
            return false;
        }

        *count += 1;
        true
    }
}
