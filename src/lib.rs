//! Packet encapsulator and audio-attributes decoder for MPEG-2 transport streams.
//!
//! The encapsulator diverts packets on a configured set of input PIDs into an inner byte stream
//! and re-emits that stream, repacked into new 188-byte TS packets, on a separate output PID —
//! with continuity-counter tracking, optional PCR interpolation, and rate-controlled backpressure
//! against the stream's null (stuffing) packets. The audio-attributes decoder is a smaller,
//! unrelated codec-identification table: it decodes the 4-byte frame header of an MPEG-1/MPEG-2
//! audio elementary stream.
//!
//! # Usage
//! Simply add this crate as a dependency in your `Cargo.toml`.
//!
//! ```toml
//! [dependencies]
//! ts-encap = "~0.1.0"
//! ```

#![deny(missing_docs, unsafe_code, warnings)]

mod audio;
mod clock;
mod encapsulator;
mod error;
mod packet;
mod pid_set;

pub use audio::{AudioAttributes, AudioLayer};
pub use clock::{packet_bitrate, packet_interval, MS_PER_SEC, SYSTEM_CLOCK_FREQ};
pub use encapsulator::Encapsulator;
pub use error::PidRangeError;
pub use packet::{TsPacket, NULL_PID, PACKET_SIZE, PCR_MODULO, SYNC_BYTE};
pub use pid_set::PidSet;
