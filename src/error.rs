//! Construction-time error types.
//!
//! Everything on the steady-state `process_packet` path reports errors through
//! [`Encapsulator::last_error`](crate::Encapsulator::last_error) rather than `Result`, per the
//! encapsulator's report-not-throw contract. The one place this crate accepts a genuinely
//! exceptional, throw-style error is [`PidSet::try_from_iter`](crate::PidSet::try_from_iter),
//! where a caller-supplied PID list may contain a value outside the 13-bit PID space.

use std::fmt;

/// A PID value fell outside the 13-bit PID space (`0..=0x1FFF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidRangeError {
    /// The offending value.
    pub pid: u16,
}

impl fmt::Display for PidRangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PID 0x{:04x} ({}) is out of the 13-bit PID range 0..=0x1FFF",
            self.pid, self.pid
        )
    }
}

impl std::error::Error for PidRangeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_offending_value() {
        let err = PidRangeError { pid: 0x2000 };
        assert_eq!(
            err.to_string(),
            "PID 0x2000 (8192) is out of the 13-bit PID range 0..=0x1FFF"
        );
    }
}
