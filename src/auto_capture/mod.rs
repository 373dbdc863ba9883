//! Auto-capture state machine
//!
//! An explicit state object driven by discrete events. The host (or
//! [`AutoCaptureRunner`]) calls `on_tick` on a timer, performs the sample the
//! machine asks for, and reports the outcome back. The machine guarantees:
//! - at most one sample in flight
//! - one lock per activation: a record is created on the first confident
//!   double match and never again until the machine is reset
//! - completions from a torn-down activation are discarded

pub mod runner;

pub use runner::AutoCaptureRunner;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::matching::{MatchGate, SkillPair};

/// Sampling interval presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoCaptureSpeed {
    Slow,
    #[default]
    Normal,
    Fast,
}

impl AutoCaptureSpeed {
    pub fn interval(&self) -> Duration {
        match self {
            AutoCaptureSpeed::Slow => Duration::from_millis(2000),
            AutoCaptureSpeed::Normal => Duration::from_millis(1200),
            AutoCaptureSpeed::Fast => Duration::from_millis(600),
        }
    }
}

/// Auto-capture settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCaptureSettings {
    pub speed: AutoCaptureSpeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoCaptureState {
    /// Looking for a result (initial)
    Waiting,
    /// Result recorded; further matches are ignored until reset
    Locked,
}

impl fmt::Display for AutoCaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoCaptureState::Waiting => write!(f, "Waiting"),
            AutoCaptureState::Locked => write!(f, "Locked"),
        }
    }
}

/// Handle for one sample, returned by [`AutoCapture::on_tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTicket {
    generation: u64,
    sample: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    InFlight,
}

/// What to do on a timer tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    Skip(SkipReason),
    Sample(SampleTicket),
}

/// What a sample saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Loading placeholder
    Waiting,
    /// Real text, matched against both vocabularies
    Matched(SkillPair),
}

/// Result of reporting a recognition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Placeholder seen; state is (still) waiting
    Waiting,
    /// First confident double match; create exactly one record
    Lock(SkillPair),
    /// Confident match while already locked
    Ignored,
    /// At least one side failed the gate
    Weak(SkillPair),
    /// The sample belongs to a torn-down activation
    Stale,
}

/// The auto-capture state object
#[derive(Debug)]
pub struct AutoCapture {
    state: AutoCaptureState,
    enabled: bool,
    in_flight: Option<u64>,
    generation: u64,
    next_sample: u64,
    gate: MatchGate,
}

impl Default for AutoCapture {
    fn default() -> Self {
        Self::new(MatchGate::default())
    }
}

impl AutoCapture {
    pub fn new(gate: MatchGate) -> Self {
        Self {
            state: AutoCaptureState::Waiting,
            enabled: false,
            in_flight: None,
            generation: 0,
            next_sample: 0,
            gate,
        }
    }

    pub fn state(&self) -> AutoCaptureState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start a fresh activation in `Waiting`
    fn begin(&mut self) {
        self.generation += 1;
        self.in_flight = None;
        self.state = AutoCaptureState::Waiting;
    }

    /// Turn auto mode on
    pub fn enable(&mut self) {
        self.enabled = true;
        self.begin();
        debug!("Auto-capture enabled (generation {})", self.generation);
    }

    /// The target record changed; start over in `Waiting`
    pub fn target_changed(&mut self) {
        self.begin();
        debug!("Auto-capture target changed (generation {})", self.generation);
    }

    /// Turn auto mode off; pending completions are discarded
    pub fn disable(&mut self) {
        self.enabled = false;
        self.generation += 1;
        self.in_flight = None;
    }

    /// Same as [`disable`](Self::disable), for host teardown
    pub fn teardown(&mut self) {
        self.disable();
    }

    /// Timer tick: start a sample unless one is already running
    pub fn on_tick(&mut self) -> TickDecision {
        if !self.enabled {
            return TickDecision::Skip(SkipReason::Disabled);
        }
        if self.in_flight.is_some() {
            return TickDecision::Skip(SkipReason::InFlight);
        }

        self.next_sample += 1;
        self.in_flight = Some(self.next_sample);
        TickDecision::Sample(SampleTicket {
            generation: self.generation,
            sample: self.next_sample,
        })
    }

    /// Whether `ticket` belongs to the running activation
    pub fn is_current(&self, ticket: SampleTicket) -> bool {
        self.enabled && ticket.generation == self.generation
    }

    /// Clear the in-flight flag for `ticket`; no-op for any other sample
    pub fn finish(&mut self, ticket: SampleTicket) {
        if self.is_current(ticket) && self.in_flight == Some(ticket.sample) {
            self.in_flight = None;
        }
    }

    /// The frame was not ready; try again next tick
    pub fn on_capture_skipped(&mut self, ticket: SampleTicket) {
        self.finish(ticket);
    }

    /// Capture, preprocessing or recognition failed; state is unchanged
    pub fn on_failed(&mut self, ticket: SampleTicket) -> bool {
        let current = self.is_current(ticket);
        self.finish(ticket);
        current
    }

    /// Report what a sample recognized
    pub fn on_recognized(&mut self, ticket: SampleTicket, observation: Observation) -> Transition {
        if !self.is_current(ticket) {
            return Transition::Stale;
        }
        self.finish(ticket);

        match observation {
            Observation::Waiting => {
                self.state = AutoCaptureState::Waiting;
                Transition::Waiting
            }
            Observation::Matched(pair) => {
                if !pair.is_strong(&self.gate) {
                    return Transition::Weak(pair);
                }
                match self.state {
                    AutoCaptureState::Waiting => {
                        self.state = AutoCaptureState::Locked;
                        Transition::Lock(pair)
                    }
                    AutoCaptureState::Locked => Transition::Ignored,
                }
            }
        }
    }

    /// The record for a lock could not be created; unlock so a later sample retries
    pub fn on_record_failed(&mut self, ticket: SampleTicket) -> bool {
        if !self.is_current(ticket) || self.state != AutoCaptureState::Locked {
            return false;
        }
        self.state = AutoCaptureState::Waiting;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{MatchMode, MatchResult};

    fn strong_pair() -> SkillPair {
        let result = |skill: &str| MatchResult {
            skill: skill.to_string(),
            score: 5,
            length: 5,
            mode: MatchMode::Substring,
        };
        SkillPair {
            series: result("鎧竜の守護"),
            group: result("ヌシの誇り"),
        }
    }

    fn weak_pair() -> SkillPair {
        let mut pair = strong_pair();
        pair.group = MatchResult::unknown();
        pair
    }

    fn ticket(machine: &mut AutoCapture) -> SampleTicket {
        match machine.on_tick() {
            TickDecision::Sample(ticket) => ticket,
            other => panic!("expected a sample, got {:?}", other),
        }
    }

    #[test]
    fn test_speed_intervals() {
        assert_eq!(AutoCaptureSpeed::Slow.interval(), Duration::from_millis(2000));
        assert_eq!(AutoCaptureSpeed::default().interval(), Duration::from_millis(1200));
        assert_eq!(AutoCaptureSpeed::Fast.interval(), Duration::from_millis(600));
    }

    #[test]
    fn test_disabled_machine_never_samples() {
        let mut machine = AutoCapture::default();
        assert_eq!(machine.on_tick(), TickDecision::Skip(SkipReason::Disabled));
    }

    #[test]
    fn test_second_tick_skipped_while_in_flight() {
        let mut machine = AutoCapture::default();
        machine.enable();

        let first = ticket(&mut machine);
        assert_eq!(machine.on_tick(), TickDecision::Skip(SkipReason::InFlight));

        machine.on_capture_skipped(first);
        assert!(!machine.is_in_flight());
        ticket(&mut machine);
    }

    #[test]
    fn test_lock_once() {
        let mut machine = AutoCapture::default();
        machine.enable();

        let t = ticket(&mut machine);
        assert_eq!(
            machine.on_recognized(t, Observation::Matched(strong_pair())),
            Transition::Lock(strong_pair())
        );
        assert_eq!(machine.state(), AutoCaptureState::Locked);

        for _ in 0..3 {
            let t = ticket(&mut machine);
            assert_eq!(
                machine.on_recognized(t, Observation::Matched(strong_pair())),
                Transition::Ignored
            );
        }
        assert_eq!(machine.state(), AutoCaptureState::Locked);
    }

    #[test]
    fn test_placeholder_returns_to_waiting() {
        let mut machine = AutoCapture::default();
        machine.enable();

        let t = ticket(&mut machine);
        machine.on_recognized(t, Observation::Matched(strong_pair()));

        let t = ticket(&mut machine);
        assert_eq!(machine.on_recognized(t, Observation::Waiting), Transition::Waiting);
        assert_eq!(machine.state(), AutoCaptureState::Waiting);

        // The next result locks again
        let t = ticket(&mut machine);
        assert!(matches!(
            machine.on_recognized(t, Observation::Matched(strong_pair())),
            Transition::Lock(_)
        ));
    }

    #[test]
    fn test_weak_match_does_not_lock() {
        let mut machine = AutoCapture::default();
        machine.enable();

        let t = ticket(&mut machine);
        assert!(matches!(
            machine.on_recognized(t, Observation::Matched(weak_pair())),
            Transition::Weak(_)
        ));
        assert_eq!(machine.state(), AutoCaptureState::Waiting);
    }

    #[test]
    fn test_failure_keeps_state_and_clears_in_flight() {
        let mut machine = AutoCapture::default();
        machine.enable();

        let t = ticket(&mut machine);
        machine.on_recognized(t, Observation::Matched(strong_pair()));

        let t = ticket(&mut machine);
        assert!(machine.on_failed(t));
        assert_eq!(machine.state(), AutoCaptureState::Locked);
        assert!(!machine.is_in_flight());
    }

    #[test]
    fn test_target_change_resets_lock_and_discards_pending() {
        let mut machine = AutoCapture::default();
        machine.enable();

        let t = ticket(&mut machine);
        machine.on_recognized(t, Observation::Matched(strong_pair()));

        let pending = ticket(&mut machine);
        machine.target_changed();
        assert_eq!(machine.state(), AutoCaptureState::Waiting);
        assert!(!machine.is_in_flight());

        assert_eq!(
            machine.on_recognized(pending, Observation::Matched(strong_pair())),
            Transition::Stale
        );
        assert_eq!(machine.state(), AutoCaptureState::Waiting);
    }

    #[test]
    fn test_disable_discards_late_completion() {
        let mut machine = AutoCapture::default();
        machine.enable();

        let pending = ticket(&mut machine);
        machine.disable();
        assert!(!machine.is_in_flight());
        assert_eq!(
            machine.on_recognized(pending, Observation::Matched(strong_pair())),
            Transition::Stale
        );
        assert!(!machine.on_failed(pending));
        assert_eq!(machine.on_tick(), TickDecision::Skip(SkipReason::Disabled));
    }

    #[test]
    fn test_stale_finish_does_not_clear_newer_sample() {
        let mut machine = AutoCapture::default();
        machine.enable();

        let first = ticket(&mut machine);
        machine.finish(first);
        let second = ticket(&mut machine);

        // Late duplicate completion of the first sample
        machine.finish(first);
        assert!(machine.is_in_flight());
        machine.finish(second);
        assert!(!machine.is_in_flight());
    }

    #[test]
    fn test_record_failure_unlocks_for_retry() {
        let mut machine = AutoCapture::default();
        machine.enable();

        let t = ticket(&mut machine);
        machine.on_recognized(t, Observation::Matched(strong_pair()));
        assert!(machine.on_record_failed(t));
        assert_eq!(machine.state(), AutoCaptureState::Waiting);

        let t = ticket(&mut machine);
        assert!(matches!(
            machine.on_recognized(t, Observation::Matched(strong_pair())),
            Transition::Lock(_)
        ));

        machine.disable();
        assert!(!machine.is_current(t));
        assert!(!machine.on_record_failed(t));
        assert_eq!(machine.state(), AutoCaptureState::Locked);
    }
}
