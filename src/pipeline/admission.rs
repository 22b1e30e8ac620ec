//! Sample admission and request pacing
//!
//! The sink pulls samples from its producer through `RequestSample` events.
//! At most [`MAX_SAMPLE_REQUESTS`] pulls are outstanding at any time, which
//! bounds memory when the producer outpaces the consumer.

use super::types::Timestamp;

/// Depth of the pull window
pub const MAX_SAMPLE_REQUESTS: u8 = 2;

/// Why a sample was not forwarded downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Stamped before the run's clock start
    PredatesClockStart,
    /// Presentation time not after the last accepted sample
    NonMonotonicPresentation,
    /// Decode time not after the last accepted sample
    NonMonotonicDecode,
    /// Normalized time does not fit the timeline
    TimestampOutOfRange,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::PredatesClockStart => write!(f, "predates clock start"),
            DropReason::NonMonotonicPresentation => write!(f, "non-monotonic presentation time"),
            DropReason::NonMonotonicDecode => write!(f, "non-monotonic decode time"),
            DropReason::TimestampOutOfRange => write!(f, "timestamp out of range"),
        }
    }
}

/// Outcome of admitting a normalized sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Drop(DropReason),
}

/// Pull window plus monotonicity guards for one stream
#[derive(Debug, Clone, Default)]
pub struct AdmissionController {
    enabled: bool,
    outstanding: u8,
    last_pts: Option<Timestamp>,
    last_dts: Option<Timestamp>,
}

impl AdmissionController {
    /// Disabled controller with an empty window
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable requests with zero outstanding and forget the previous run's timestamps
    pub fn reset(&mut self) {
        self.enabled = true;
        self.outstanding = 0;
        self.last_pts = None;
        self.last_dts = None;
    }

    /// Stop issuing requests; outstanding ones may still be satisfied
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn outstanding(&self) -> u8 {
        self.outstanding
    }

    /// Reserve a pull slot. Returns `true` when the caller must emit a request.
    pub fn on_request_issued(&mut self) -> bool {
        if self.enabled && self.outstanding < MAX_SAMPLE_REQUESTS {
            self.outstanding += 1;
            true
        } else {
            false
        }
    }

    /// Release the slot of a satisfied pull, if any pull was outstanding.
    ///
    /// Still decrements after [`disable`](Self::disable); it just never leads
    /// to a new request because `on_request_issued` refuses while disabled.
    pub fn on_request_satisfied(&mut self) -> bool {
        if self.outstanding > 0 {
            self.outstanding -= 1;
            true
        } else {
            false
        }
    }

    /// Decide whether a sample with the given normalized timestamps may go downstream.
    ///
    /// Presentation and decode times are guarded independently; each must be
    /// strictly after its counterpart on the last accepted sample.
    pub fn on_sample_arrived(&mut self, pts: Timestamp, dts: Timestamp) -> Admission {
        if self.last_pts.is_some_and(|last| pts <= last) {
            return Admission::Drop(DropReason::NonMonotonicPresentation);
        }
        if self.last_dts.is_some_and(|last| dts <= last) {
            return Admission::Drop(DropReason::NonMonotonicDecode);
        }

        self.last_pts = Some(pts);
        self.last_dts = Some(dts);
        Admission::Accept
    }

    /// Issue requests until the window is full, returning how many were issued
    pub fn fill_window(&mut self) -> u8 {
        let mut issued = 0;
        while self.on_request_issued() {
            issued += 1;
        }
        issued
    }
}
