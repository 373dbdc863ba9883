//! Message types sent from the auto-capture loop to its host

use crate::auto_capture::AutoCaptureState;
use crate::matching::SkillPair;
use crate::storage::RecordRef;

/// Events surfaced by a running auto-capture loop
#[derive(Debug, Clone)]
pub enum AutoCaptureEvent {
    /// The loop started or stopped
    Running(bool),
    /// The machine entered a new state
    StateChanged(AutoCaptureState),
    /// Recognition progress of the current sample (0 - 100)
    Progress(u8),
    /// Placeholder text seen; still waiting for the result
    Waiting { raw_text: String },
    /// A confident double match locked the machine and created a record
    Locked {
        pair: SkillPair,
        raw_text: String,
        record: RecordRef,
    },
    /// Text was recognized but did not pass the confidence gate
    Unconfident { pair: SkillPair, raw_text: String },
    /// Recognition failed; the loop keeps sampling
    RecognitionFailed(String),
    /// The record store refused the locked result
    RecordFailed(String),
    /// The camera failed; the loop has stopped
    CameraError(String),
}
