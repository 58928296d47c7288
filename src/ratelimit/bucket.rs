//! Token bucket implementation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Default sustained rate in tokens per second.
pub const DEFAULT_RATE: f64 = 2.0;
/// Default burst capacity.
pub const DEFAULT_BURST: u32 = 10;

/// Token count a freshly created bucket starts with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialFill {
    /// Start with `burst` tokens, so a new client may burst immediately
    #[default]
    Full,
    /// Start with no tokens; the first admission waits for a refill
    Empty,
}

/// Parameters shared by every bucket a registry creates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterSettings {
    /// Refill rate in tokens per second
    pub rate: f64,
    /// Maximum number of tokens a bucket can hold
    pub burst: u32,
    /// Initial token count policy
    pub initial_fill: InitialFill,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            burst: DEFAULT_BURST,
            initial_fill: InitialFill::Full,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A continuously refilling token bucket for a single client.
///
/// Rate and capacity are fixed at construction. The token count and the
/// refill timestamp are updated together under one lock, so `allow` is
/// linearizable per bucket and the count always stays in `[0, capacity]`.
#[derive(Debug)]
pub struct TokenBucket {
    /// Refill rate in tokens per second
    rate: f64,
    /// Burst capacity
    capacity: u32,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a new bucket whose clock starts now.
    pub fn new(settings: LimiterSettings) -> Self {
        Self::starting_at(settings, Instant::now())
    }

    /// Create a new bucket whose clock starts at `now`.
    ///
    /// A rate that is not a positive finite number never refills; such a
    /// bucket only hands out its initial tokens.
    pub fn starting_at(settings: LimiterSettings, now: Instant) -> Self {
        let rate = if settings.rate.is_finite() && settings.rate > 0.0 {
            settings.rate
        } else {
            0.0
        };
        let tokens = match settings.initial_fill {
            InitialFill::Full => f64::from(settings.burst),
            InitialFill::Empty => 0.0,
        };

        Self {
            rate,
            capacity: settings.burst,
            state: Mutex::new(BucketState {
                tokens,
                last_refill: now,
            }),
        }
    }

    /// Try to take one token.
    ///
    /// Returns `true` if the request is admitted, `false` if the bucket is empty.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Try to take one token as of the clock reading `now`.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token count, without consuming.
    pub fn tokens(&self) -> f64 {
        self.tokens_at(Instant::now())
    }

    /// Token count as of the clock reading `now`, without consuming.
    pub fn tokens_at(&self, now: Instant) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    /// Get the burst capacity of this bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Credit the tokens earned since the last refill, capped at capacity.
    ///
    /// A reading older than `last_refill` (a caller that sampled the clock
    /// before another caller took the lock) credits nothing.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let refilled = state.tokens + elapsed.as_secs_f64() * self.rate;
        state.tokens = refilled.clamp(0.0, f64::from(self.capacity));
        state.last_refill = now;
    }
}
