//! Context-switch trace.
//!
//! The scheduler keeps the most recent switches in a small ring buffer so a
//! debugger or a diagnostic thread can reconstruct the latest dispatch
//! history without any tracing backend.

use heapless::HistoryBuffer;
use rtk_core::Systime;

use crate::thread::ThreadId;

/// Number of switches retained.
pub const TRACE_DEPTH: usize = 16;

/// One dispatch decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchRecord {
    pub time: Systime,
    pub from: ThreadId,
    pub to: ThreadId,
}

#[cfg(feature = "defmt")]
impl defmt::Format for SwitchRecord {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{} {} -> {}", self.time, self.from, self.to);
    }
}

/// Ring buffer of recent switches plus a running total.
pub struct SwitchTrace {
    records: HistoryBuffer<SwitchRecord, TRACE_DEPTH>,
    count: u32,
}

impl SwitchTrace {
    pub const fn new() -> Self {
        Self {
            records: HistoryBuffer::new(),
            count: 0,
        }
    }

    pub(crate) fn record(&mut self, record: SwitchRecord) {
        log::trace!("switch {} -> {} at {}", record.from, record.to, record.time);
        self.records.write(record);
        self.count = self.count.wrapping_add(1);
    }

    /// Total number of switches since start (wrapping)
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Most recent switch
    pub fn last(&self) -> Option<&SwitchRecord> {
        self.records.recent()
    }

    /// Retained switches, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &SwitchRecord> + '_ {
        self.records.oldest_ordered()
    }
}

impl Default for SwitchTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u32) -> SwitchRecord {
        SwitchRecord {
            time: Systime::new(n),
            from: ThreadId::new(0, 0),
            to: ThreadId::new(1, 0),
        }
    }

    #[test]
    fn keeps_most_recent_records() {
        let mut trace = SwitchTrace::new();
        for n in 0..(TRACE_DEPTH as u32 + 4) {
            trace.record(record(n));
        }
        assert_eq!(trace.count(), TRACE_DEPTH as u32 + 4);
        assert_eq!(trace.iter().count(), TRACE_DEPTH);
        assert_eq!(trace.iter().next().map(|r| r.time), Some(Systime::new(4)));
        assert_eq!(trace.last().map(|r| r.time), Some(Systime::new(TRACE_DEPTH as u32 + 3)));
    }
}
