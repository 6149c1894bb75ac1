// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admission control for inbound control messages.
//!
//! No analogous structure exists in the teacher or the rest of the
//! example pack (checked: no token-bucket or sliding-window
//! implementation anywhere under `examples/`), so this is hand-authored
//! in the teacher's general locking idiom — a single mutex around both
//! tiers, mirroring the single-mutex-per-shared-resource discipline of
//! `crates/mux/src/credential/broker.rs`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Global bucket capacity.
const GLOBAL_CAPACITY: f64 = 30.0;
/// Global bucket refill rate, tokens/sec.
const GLOBAL_REFILL_PER_SEC: f64 = 10.0;
/// Per-type window for the expensive set.
const EXPENSIVE_WINDOW: Duration = Duration::from_secs(60);
/// Max occurrences of an expensive type within `EXPENSIVE_WINDOW`.
const EXPENSIVE_LIMIT: usize = 2;

/// Types that bypass both tiers entirely.
const EXEMPT: &[&str] = &["ping"];
/// Types subject to the stricter per-type sliding window.
const EXPENSIVE: &[&str] = &["clone_repo", "start_run", "new_prd"];

fn is_exempt(kind: &str) -> bool {
    EXEMPT.contains(&kind)
}

fn is_expensive(kind: &str) -> bool {
    EXPENSIVE.contains(&kind)
}

#[derive(Debug)]
pub enum Decision {
    Allow,
    Deny { retry_after: Duration },
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(now: Instant) -> Self {
        Self { tokens: GLOBAL_CAPACITY, last_refill: now }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * GLOBAL_REFILL_PER_SEC).min(GLOBAL_CAPACITY);
        self.last_refill = now;
    }

    fn try_consume(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / GLOBAL_REFILL_PER_SEC))
        }
    }
}

struct SlidingWindow {
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new() -> Self {
        Self { timestamps: VecDeque::new() }
    }

    fn trim(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= EXPENSIVE_WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn check(&mut self, now: Instant) -> Result<(), Duration> {
        self.trim(now);
        if self.timestamps.len() >= EXPENSIVE_LIMIT {
            let oldest = self.timestamps[0];
            let retry_after = EXPENSIVE_WINDOW.saturating_sub(now.saturating_duration_since(oldest));
            Err(retry_after)
        } else {
            Ok(())
        }
    }

    fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }
}

struct Inner {
    bucket: TokenBucket,
    windows: HashMap<&'static str, SlidingWindow>,
}

/// Global token bucket plus per-type sliding windows, under one mutex.
pub struct RateLimiter {
    inner: Mutex<Inner>,
}

impl RateLimiter {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            inner: Mutex::new(Inner {
                bucket: TokenBucket::new(now),
                windows: EXPENSIVE.iter().map(|&t| (t, SlidingWindow::new())).collect(),
            }),
        }
    }

    /// Decide whether an inbound message of type `kind` is admitted:
    /// exempt types pass immediately, expensive types must clear their
    /// sliding window before the global bucket is consulted.
    pub async fn check(&self, kind: &str) -> Decision {
        if is_exempt(kind) {
            return Decision::Allow;
        }

        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        if is_expensive(kind) {
            if let Some(window) = inner.windows.get_mut(kind) {
                if let Err(retry_after) = window.check(now) {
                    return Decision::Deny { retry_after };
                }
            }
        }

        match inner.bucket.try_consume(now) {
            Ok(()) => {
                if is_expensive(kind) {
                    if let Some(window) = inner.windows.get_mut(kind) {
                        window.record(now);
                    }
                }
                Decision::Allow
            }
            Err(retry_after) => Decision::Deny { retry_after },
        }
    }

    /// Re-initialize all state. Called on reconnect.
    pub async fn reset(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.bucket = TokenBucket::new(now);
        for window in inner.windows.values_mut() {
            *window = SlidingWindow::new();
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
