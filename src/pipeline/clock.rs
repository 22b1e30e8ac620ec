//! Clock offset for timestamp normalization
//!
//! A run's timeline starts at the clock start offset supplied with `Start`.
//! Producers stamp samples on their own clock, so the first eligible sample
//! fixes a start-time offset which is then subtracted from every later sample
//! of the same run.

use super::types::Timestamp;

/// Per-run clock offset
///
/// Lives inside the stream sink's state lock, so derivation is atomic with the
/// state check that precedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockOffset {
    /// Presentation time when the clock started
    clock_start_offset: Timestamp,

    /// System time at which the run was started
    system_time: Timestamp,

    /// Amount to subtract from a raw timestamp, fixed by the first eligible sample
    start_time_offset: Option<Timestamp>,
}

impl ClockOffset {
    /// Offset for a fresh run, start-time offset unset
    pub fn new(system_time: Timestamp, clock_start_offset: Timestamp) -> Self {
        Self {
            clock_start_offset,
            system_time,
            start_time_offset: None,
        }
    }

    pub fn clock_start_offset(&self) -> Timestamp {
        self.clock_start_offset
    }

    pub fn system_time(&self) -> Timestamp {
        self.system_time
    }

    pub fn start_time_offset(&self) -> Option<Timestamp> {
        self.start_time_offset
    }

    /// Whether a raw timestamp belongs to this run.
    ///
    /// Samples stamped before the clock start offset, or before the system time
    /// the run was started at, predate the run.
    pub fn is_eligible(&self, raw: Timestamp) -> bool {
        raw >= self.clock_start_offset && raw >= self.system_time
    }

    /// Derive the start-time offset from `raw` if it is still unset.
    ///
    /// Returns `false` when `raw` predates the run; the offset is left untouched
    /// in that case. Once set, later calls never overwrite it. An offset that
    /// does not fit the timeline stays unset, so [`normalize`](Self::normalize)
    /// keeps refusing.
    pub fn derive(&mut self, raw: Timestamp) -> bool {
        if !self.is_eligible(raw) {
            return false;
        }

        if self.start_time_offset.is_none() {
            self.start_time_offset = raw.since(self.clock_start_offset);
        }

        true
    }

    /// Map a raw timestamp onto the run's timeline.
    ///
    /// `None` until the start-time offset has been derived, or when the result
    /// overflows; callers must not forward un-normalized timestamps.
    pub fn normalize(&self, raw: Timestamp) -> Option<Timestamp> {
        self.start_time_offset.and_then(|offset| raw.since(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(micros: i64) -> Timestamp {
        Timestamp::from_micros(micros)
    }

    #[test]
    fn test_derives_once() {
        let mut clock = ClockOffset::new(ts(0), ts(900));

        assert!(clock.normalize(ts(1000)).is_none());
        assert!(clock.derive(ts(1000)));
        assert_eq!(clock.start_time_offset(), Some(ts(100)));

        // Later samples never move the offset
        assert!(clock.derive(ts(5000)));
        assert_eq!(clock.start_time_offset(), Some(ts(100)));
        assert_eq!(clock.normalize(ts(1050)), Some(ts(950)));
    }

    #[test]
    fn test_predating_samples_do_not_derive() {
        let mut clock = ClockOffset::new(ts(0), ts(900));

        assert!(!clock.derive(ts(899)));
        assert!(clock.start_time_offset().is_none());

        assert!(clock.derive(ts(900)));
        assert_eq!(clock.start_time_offset(), Some(ts(0)));
    }

    #[test]
    fn test_system_time_gates_eligibility() {
        let mut clock = ClockOffset::new(ts(1000), ts(900));

        assert!(!clock.is_eligible(ts(950)));
        assert!(!clock.derive(ts(950)));
        assert!(clock.start_time_offset().is_none());

        assert!(clock.derive(ts(1000)));
        assert_eq!(clock.start_time_offset(), Some(ts(100)));
    }

    #[test]
    fn test_overflow_is_not_normalized() {
        let mut clock = ClockOffset::new(ts(0), ts(0));
        assert!(clock.derive(ts(1000)));

        assert_eq!(clock.normalize(ts(i64::MIN)), None);
        assert_eq!(clock.normalize(ts(1500)), Some(ts(500)));

        // An offset outside the timeline is never fixed
        let mut clock = ClockOffset::new(ts(i64::MIN), ts(-10));
        assert!(clock.derive(ts(i64::MAX)));
        assert!(clock.start_time_offset().is_none());
        assert_eq!(clock.normalize(ts(i64::MAX)), None);
    }

    #[test]
    fn test_default_is_unset() {
        let clock = ClockOffset::default();
        assert_eq!(clock.clock_start_offset(), Timestamp::ZERO);
        assert!(clock.start_time_offset().is_none());
    }
}
