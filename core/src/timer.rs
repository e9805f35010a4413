//! Single-shot timeout scheduling, tagged by `(height, round, step)`.
//!
//! Adapted from the generation-counter discipline used elsewhere in this
//! codebase's async actor timers: each scheduled timeout gets a
//! monotonically increasing generation number, and firing checks that
//! generation against the one recorded for its key. A timer replaced before
//! it fires is simply overwritten — its task keeps running but its fire is
//! silently superseded rather than cancelled outright, which keeps the
//! scheduler lock-free on the hot path and makes "a late fire is harmless"
//! (per the design notes) true by construction rather than by the
//! dispatcher's guard alone.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::types::{Height, Round, RoundStep};

/// The tuple a scheduled timeout and its fire event both carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutKey {
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
}

/// Delivered to the dispatcher's event stream when a timeout elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutFire {
    pub key: TimeoutKey,
    generation: u64,
}

/// Schedules at most one outstanding timeout per key; a reschedule of the
/// same key overwrites the previous one (its fire, if already in flight,
/// will be rejected by [`TimerService::is_current`]).
pub struct TimerService {
    tx: mpsc::UnboundedSender<TimeoutFire>,
    generations: HashMap<TimeoutKey, u64>,
    next_generation: u64,
}

impl TimerService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimeoutFire>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                generations: HashMap::new(),
                next_generation: 0,
            },
            rx,
        )
    }

    /// Schedule a timeout for `key` to fire after `duration`. A
    /// `duration` of zero (or negative, clamped to zero) fires immediately
    /// but still goes through the event channel rather than re-entering
    /// the dispatcher synchronously.
    pub fn schedule(&mut self, key: TimeoutKey, duration: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.generations.insert(key, generation);

        let tx = self.tx.clone();
        tokio::spawn(async move {
            if !duration.is_zero() {
                tokio::time::sleep(duration).await;
            }
            let _ = tx.send(TimeoutFire { key, generation });
        });
    }

    /// Whether a fire event is still the most recently scheduled one for
    /// its key — i.e. whether it hasn't been superseded by a later
    /// `schedule` call for the same key. Stale fires are dropped by the
    /// dispatcher without ever reaching the transition guards.
    pub fn is_current(&self, fire: &TimeoutFire) -> bool {
        self.generations.get(&fire.key) == Some(&fire.generation)
    }

    /// Drop all bookkeeping for pending timeouts without firing them.
    /// In-flight sleeper tasks still complete, but their fires will no
    /// longer be current once this has been called and nothing has
    /// rescheduled the same key, since there's nothing left for
    /// `is_current` to match against after a shutdown-driven drop... in
    /// practice callers stop polling the receiver entirely on shutdown,
    /// so those fires are simply never observed.
    pub fn stop(&mut self) {
        self.generations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(step: RoundStep) -> TimeoutKey {
        TimeoutKey {
            height: Height(1),
            round: Round(0),
            step,
        }
    }

    #[tokio::test]
    async fn fires_after_duration() {
        let (mut timer, mut rx) = TimerService::new();
        timer.schedule(key(RoundStep::Propose), Duration::from_millis(1));
        let fire = rx.recv().await.unwrap();
        assert_eq!(fire.key, key(RoundStep::Propose));
        assert!(timer.is_current(&fire));
    }

    #[tokio::test]
    async fn zero_duration_fires_through_the_channel() {
        let (mut timer, mut rx) = TimerService::new();
        timer.schedule(key(RoundStep::Prevote), Duration::ZERO);
        let fire = rx.recv().await.unwrap();
        assert_eq!(fire.key.step, RoundStep::Prevote);
    }

    #[tokio::test]
    async fn rescheduling_supersedes_the_previous_generation() {
        let (mut timer, mut rx) = TimerService::new();
        timer.schedule(key(RoundStep::Precommit), Duration::from_millis(50));
        // Immediately reschedule the same key with a shorter duration.
        timer.schedule(key(RoundStep::Precommit), Duration::from_millis(1));

        let first_fire = rx.recv().await.unwrap();
        // The short-duration reschedule fires first and is current.
        assert!(timer.is_current(&first_fire));

        let second_fire = rx.recv().await.unwrap();
        // The original, now-stale schedule's fire is no longer current.
        assert!(!timer.is_current(&second_fire));
    }

    #[tokio::test]
    async fn stop_makes_pending_fires_stale() {
        let (mut timer, mut rx) = TimerService::new();
        timer.schedule(key(RoundStep::Propose), Duration::from_millis(1));
        timer.stop();
        let fire = rx.recv().await.unwrap();
        assert!(!timer.is_current(&fire));
    }
}
