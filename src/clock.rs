//! Integer arithmetic relating packet counts, the 27 MHz system clock, and milliseconds.

/// The MPEG-2 system clock frequency, in Hz.
pub const SYSTEM_CLOCK_FREQ: u64 = 27_000_000;

/// Milliseconds per second, used throughout the bitrate/PCR conversions below.
pub const MS_PER_SEC: u64 = 1_000;

/// Bytes in one TS packet, including the sync byte.
const PACKET_BYTES: u64 = 188;

/// Bits per TS packet.
const PACKET_BITS: u64 = PACKET_BYTES * 8;

/// Bitrate in bits/s implied by `n_packets` TS packets spanning `ms` milliseconds.
///
/// Returns 0 if `ms` is 0 (duration unknown or degenerate).
pub fn packet_bitrate(n_packets: u64, ms: u64) -> u64 {
    if ms == 0 {
        0
    } else {
        (n_packets * PACKET_BITS * MS_PER_SEC) / ms
    }
}

/// Duration in milliseconds that `n_packets` TS packets occupy at `bitrate_bps` bits/s.
///
/// Returns 0 if `bitrate_bps` is 0 (bitrate unknown).
pub fn packet_interval(bitrate_bps: u64, n_packets: u64) -> u64 {
    if bitrate_bps == 0 {
        0
    } else {
        (n_packets * PACKET_BITS * MS_PER_SEC) / bitrate_bps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_of_188_packets_per_second() {
        // 188 packets in exactly 1000ms at 188 bytes each: 188 * 188 * 8 bits/s.
        assert_eq!(packet_bitrate(188, 1000), 188 * 188 * 8);
    }

    #[test]
    fn bitrate_zero_duration_is_zero() {
        assert_eq!(packet_bitrate(100, 0), 0);
    }

    #[test]
    fn interval_is_inverse_of_bitrate() {
        let bitrate = packet_bitrate(188, 1000);
        assert_eq!(packet_interval(bitrate, 188), 1000);
    }

    #[test]
    fn interval_zero_bitrate_is_zero() {
        assert_eq!(packet_interval(0, 100), 0);
    }
}
