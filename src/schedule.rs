//! Rate-controlled emission scheduling.
//!
//! Each rolling hour window gets a target count drawn from the configured
//! envelope. The window is partitioned into equal nominal slots and every
//! instant is jittered by up to plus or minus 40% of the slot width,
//! clamped so instants stay strictly increasing and inside the window.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::pool::{PoolRole, Pools};

/// Length of one emission window.
pub const WINDOW: Duration = Duration::from_secs(3600);

/// Maximum jitter, as a fraction of the nominal slot width.
const JITTER_FRACTION: f64 = 0.4;

/// Gap enforced when clamping would otherwise break monotonicity.
const MIN_GAP: Duration = Duration::from_millis(1);

/// Validated reports-per-hour bounds. A malformed envelope must never
/// start a schedule, so construction is the only way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateEnvelope {
    min_per_hour: u32,
    max_per_hour: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateError {
    #[error("min-per-hour must be positive")]
    ZeroMin,
    #[error("min-per-hour {min} exceeds max-per-hour {max}")]
    Inverted { min: u32, max: u32 },
}

impl RateEnvelope {
    /// Requires `0 < min <= max`.
    pub fn new(min_per_hour: u32, max_per_hour: u32) -> Result<Self, RateError> {
        if min_per_hour == 0 {
            return Err(RateError::ZeroMin);
        }
        if min_per_hour > max_per_hour {
            return Err(RateError::Inverted {
                min: min_per_hour,
                max: max_per_hour,
            });
        }
        Ok(Self {
            min_per_hour,
            max_per_hour,
        })
    }

    pub fn min_per_hour(&self) -> u32 {
        self.min_per_hour
    }

    pub fn max_per_hour(&self) -> u32 {
        self.max_per_hour
    }

    fn draw(&self, rng: &mut impl Rng) -> u32 {
        rng.gen_range(self.min_per_hour..=self.max_per_hour)
    }
}

/// Plan one window: `n` strictly increasing offsets in `[0, WINDOW)`.
///
/// Offset `i` is the nominal slot start `i * WINDOW / n` plus a symmetric
/// jitter. Clamping keeps every offset inside the window; if that would
/// leave an offset at or before its predecessor, it is pushed to
/// immediately follow it.
pub fn plan_window(n: u32, rng: &mut impl Rng) -> Vec<Duration> {
    let window = WINDOW.as_secs_f64();
    let slot = window / f64::from(n);
    let gap = MIN_GAP.as_secs_f64();

    let mut offsets = Vec::with_capacity(n as usize);
    let mut prev = f64::NEG_INFINITY;
    for i in 0..n {
        let nominal = f64::from(i) * slot;
        let jitter = rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION) * slot;
        let mut at = (nominal + jitter).clamp(0.0, window - gap);
        if at <= prev {
            at = prev + gap;
        }
        prev = at;
        offsets.push(Duration::from_secs_f64(at));
    }
    offsets
}

/// One scheduled emission, consumed immediately by the report collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    pub instant: DateTime<Utc>,
    pub role: PoolRole,
    pub source_ip: IpAddr,
}

enum Mode {
    Continuous,
    OneShot { done: bool },
}

/// Lazy, infinite sequence of emissions. Restartable only by recreating
/// the scheduler; each scheduled instant is strictly greater than the
/// previous one.
pub struct Scheduler {
    envelope: RateEnvelope,
    pass_ratio: f64,
    pools: Pools,
    rng: StdRng,
    mode: Mode,
    window_start: Instant,
    window_planned: bool,
    pending: VecDeque<Duration>,
}

impl Scheduler {
    /// The window anchor is the moment of construction.
    pub fn new(envelope: RateEnvelope, pass_ratio: f64, pools: Pools, one_shot: bool) -> Self {
        Self::with_rng(envelope, pass_ratio, pools, one_shot, StdRng::from_entropy())
    }

    /// Like [`Scheduler::new`] with a caller-supplied RNG, for reproducible
    /// schedules.
    pub fn with_rng(
        envelope: RateEnvelope,
        pass_ratio: f64,
        pools: Pools,
        one_shot: bool,
        rng: StdRng,
    ) -> Self {
        debug_assert!((0.0..=1.0).contains(&pass_ratio));
        Self {
            envelope,
            pass_ratio,
            pools,
            rng,
            mode: if one_shot {
                Mode::OneShot { done: false }
            } else {
                Mode::Continuous
            },
            window_start: Instant::now(),
            window_planned: false,
            pending: VecDeque::new(),
        }
    }

    /// Produce the next emission, sleeping until its scheduled instant.
    ///
    /// A tick whose chosen pool is empty is skipped with a warning and the
    /// scheduler moves on to the next instant. One-shot mode emits at most
    /// once, immediately; afterwards the sequence is exhausted and `None`
    /// is returned. Cancellation is the caller's concern: race this future
    /// against a shutdown signal and drop it.
    pub async fn next(&mut self) -> Option<Emission> {
        loop {
            match self.mode {
                Mode::OneShot { done: true } => return None,
                Mode::OneShot { ref mut done } => {
                    *done = true;
                    // A skipped one-shot tick ends the sequence too.
                    return self.emit();
                }
                Mode::Continuous => {
                    let offset = match self.pending.pop_front() {
                        Some(offset) => offset,
                        None => {
                            self.plan_next_window();
                            continue;
                        }
                    };
                    tokio::time::sleep_until(self.window_start + offset).await;
                    if let Some(emission) = self.emit() {
                        return Some(emission);
                    }
                }
            }
        }
    }

    fn plan_next_window(&mut self) {
        if self.window_planned {
            self.window_start += WINDOW;
        } else {
            self.window_planned = true;
        }
        let n = self.envelope.draw(&mut self.rng);
        info!(reports = n, "planned emission window");
        self.pending = plan_window(n, &mut self.rng).into();
    }

    fn emit(&mut self) -> Option<Emission> {
        let role = if self.rng.gen_bool(self.pass_ratio) {
            PoolRole::Pass
        } else {
            PoolRole::Fail
        };
        match self.pools.get(role).sample(&mut self.rng) {
            Some(source_ip) => Some(Emission {
                instant: Utc::now(),
                role,
                source_ip,
            }),
            None => {
                warn!(pool = %role, "pool is empty, skipping emission");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ResolvedPool;

    fn seeded(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    fn pools(pass: &[&str], fail: &[&str]) -> Pools {
        let parse = |cidrs: &[&str]| cidrs.iter().map(|s| s.parse().unwrap()).collect();
        Pools {
            pass: ResolvedPool::new(PoolRole::Pass, parse(pass)),
            fail: ResolvedPool::new(PoolRole::Fail, parse(fail)),
        }
    }

    // --- envelope ---

    #[test]
    fn envelope_rejects_zero_min() {
        assert_eq!(RateEnvelope::new(0, 10), Err(RateError::ZeroMin));
    }

    #[test]
    fn envelope_rejects_inverted_bounds() {
        assert_eq!(
            RateEnvelope::new(10, 5),
            Err(RateError::Inverted { min: 10, max: 5 })
        );
    }

    #[test]
    fn envelope_accepts_equal_bounds() {
        let env = RateEnvelope::new(7, 7).unwrap();
        assert_eq!(env.min_per_hour(), 7);
        assert_eq!(env.max_per_hour(), 7);
    }

    // --- window planning ---

    #[test]
    fn plan_yields_exactly_n_offsets_inside_window() {
        for &n in &[1u32, 7, 100, 300] {
            let offsets = plan_window(n, &mut seeded(42));
            assert_eq!(offsets.len(), n as usize);
            for offset in &offsets {
                assert!(*offset < WINDOW, "offset {offset:?} outside window");
            }
        }
    }

    #[test]
    fn plan_offsets_strictly_increase() {
        for seed in 0..50 {
            let offsets = plan_window(300, &mut seeded(seed));
            for pair in offsets.windows(2) {
                assert!(pair[0] < pair[1], "seed {seed}: {pair:?} not increasing");
            }
        }
    }

    #[test]
    fn plan_jitter_stays_near_nominal_slots() {
        let n = 60u32;
        let slot = WINDOW.as_secs_f64() / f64::from(n);
        let offsets = plan_window(n, &mut seeded(9));
        for (i, offset) in offsets.iter().enumerate() {
            let nominal = i as f64 * slot;
            let deviation = (offset.as_secs_f64() - nominal).abs();
            assert!(
                deviation <= slot * 0.4 + 1e-6,
                "offset {i} deviates {deviation}s from nominal"
            );
        }
    }

    // --- scheduler ---

    #[tokio::test(start_paused = true)]
    async fn fixed_envelope_emits_exactly_n_per_window() {
        let envelope = RateEnvelope::new(5, 5).unwrap();
        let mut scheduler = Scheduler::with_rng(
            envelope,
            0.5,
            pools(&["203.0.113.0/24"], &["198.51.100.0/24"]),
            false,
            seeded(3),
        );

        let start = Instant::now();
        let mut per_window = [0u32; 3];
        for _ in 0..15 {
            scheduler.next().await.unwrap();
            let elapsed = Instant::now().duration_since(start);
            let window = (elapsed.as_secs() / WINDOW.as_secs()) as usize;
            per_window[window.min(2)] += 1;
        }
        assert_eq!(per_window, [5, 5, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn envelope_bounds_hold_across_windows() {
        let envelope = RateEnvelope::new(2, 6).unwrap();
        let mut scheduler = Scheduler::with_rng(
            envelope,
            0.5,
            pools(&["203.0.113.0/24"], &["198.51.100.0/24"]),
            false,
            seeded(11),
        );

        let start = Instant::now();
        let mut counts: Vec<u32> = Vec::new();
        // Keep pulling until five full windows have elapsed.
        loop {
            scheduler.next().await.unwrap();
            let elapsed = Instant::now().duration_since(start);
            let window = (elapsed.as_secs() / WINDOW.as_secs()) as usize;
            if window >= 5 {
                break;
            }
            if counts.len() <= window {
                counts.resize(window + 1, 0);
            }
            counts[window] += 1;
        }
        assert!(counts.len() >= 5);
        for (window, count) in counts.iter().enumerate().take(5) {
            assert!(
                (2..=6).contains(count),
                "window {window} emitted {count} reports"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_instants_strictly_increase() {
        let envelope = RateEnvelope::new(50, 50).unwrap();
        let mut scheduler = Scheduler::with_rng(
            envelope,
            1.0,
            pools(&["203.0.113.0/24"], &[]),
            false,
            seeded(5),
        );

        let mut prev: Option<Instant> = None;
        for i in 0..120 {
            scheduler.next().await.unwrap();
            let now = Instant::now();
            if let Some(prev) = prev {
                assert!(now > prev, "tick {i} did not advance");
            }
            prev = Some(now);
        }
    }

    #[tokio::test]
    async fn one_shot_emits_exactly_once() {
        let envelope = RateEnvelope::new(50, 100).unwrap();
        let mut scheduler = Scheduler::with_rng(
            envelope,
            0.5,
            pools(&["203.0.113.0/24"], &["198.51.100.0/24"]),
            true,
            seeded(1),
        );

        let first = scheduler.next().await;
        assert!(first.is_some());
        assert_eq!(scheduler.next().await, None);
        assert_eq!(scheduler.next().await, None);
    }

    #[tokio::test]
    async fn one_shot_with_empty_pools_skips_and_ends() {
        let envelope = RateEnvelope::new(50, 100).unwrap();
        let mut scheduler = Scheduler::with_rng(envelope, 0.5, pools(&[], &[]), true, seeded(1));
        assert_eq!(scheduler.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pool_ticks_are_skipped_not_fatal() {
        // The pass pool is empty, so roughly half the ticks degrade; the
        // scheduler must keep producing fail emissions regardless.
        let envelope = RateEnvelope::new(20, 20).unwrap();
        let mut scheduler = Scheduler::with_rng(
            envelope,
            0.5,
            pools(&[], &["198.51.100.0/24"]),
            false,
            seeded(8),
        );

        for _ in 0..10 {
            let emission = scheduler.next().await.unwrap();
            assert_eq!(emission.role, PoolRole::Fail);
        }
    }

    #[tokio::test]
    async fn one_shot_respects_pass_bias() {
        let envelope = RateEnvelope::new(1, 1).unwrap();
        let mut scheduler = Scheduler::with_rng(
            envelope,
            1.0,
            pools(&["203.0.113.0/24"], &["198.51.100.0/24"]),
            true,
            seeded(2),
        );
        let emission = scheduler.next().await.unwrap();
        assert_eq!(emission.role, PoolRole::Pass);
        assert!(
            "203.0.113.0/24"
                .parse::<crate::common::cidr::Cidr>()
                .unwrap()
                .contains(emission.source_ip)
        );
    }
}
