//! The 188-byte MPEG-TS packet primitive: header and adaptation-field accessors.

use modular_bitfield_msb::prelude::*;

/// Size in bytes of one MPEG-TS packet.
pub const PACKET_SIZE: usize = 188;

/// The mandatory first byte of every TS packet.
pub const SYNC_BYTE: u8 = 0x47;

/// Reserved PID denoting stuffing (null) packets; never carries a payload unit.
pub const NULL_PID: u16 = 0x1fff;

/// TSC information found in the packet's link-layer header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum TransportScramblingControl {
    /// Not scrambled.
    NotScrambled,
    /// Do not use.
    Reserved,
    /// Scrambled with even key.
    ScrambledEvenKey,
    /// Scrambled with odd key.
    ScrambledOddKey,
}

/// Link-layer header found at the start of every 188-byte MPEG-TS packet.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub sync_byte: B8,
    pub tei: bool,
    pub pusi: bool,
    pub priority: bool,
    pub pid: B13,
    pub tsc: TransportScramblingControl,
    pub has_adaptation_field: bool,
    pub has_payload: bool,
    pub continuity_counter: B4,
}

/// Flags describing which fields of an adaptation field are present.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct AdaptationFieldHeader {
    pub length: B8,
    pub discontinuity: bool,
    pub random_access: bool,
    pub priority: bool,
    pub has_pcr: bool,
    pub has_opcr: bool,
    pub has_splice_countdown: bool,
    pub has_transport_private_data: bool,
    pub has_adaptation_field_extension: bool,
}

/// Modulus of the 42-bit composite PCR value (33-bit base times 300, plus the 9-bit extension).
pub const PCR_MODULO: u64 = (1u64 << 33) * 300;

/// An owned, mutable 188-byte MPEG-TS packet.
///
/// Thin wrapper over the raw bytes with accessors for the fields the encapsulator needs to read
/// or overwrite. Raw byte access via [`TsPacket::b`]/[`TsPacket::b_mut`] is available for direct
/// header and adaptation-field synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsPacket {
    b: [u8; PACKET_SIZE],
}

impl Default for TsPacket {
    fn default() -> Self {
        Self::null()
    }
}

impl TsPacket {
    /// Wraps an existing 188-byte buffer.
    pub fn new(b: [u8; PACKET_SIZE]) -> Self {
        Self { b }
    }

    /// A well-formed stuffing packet: sync byte, PID 0x1FFF, payload of 0xFF.
    pub fn null() -> Self {
        let mut b = [0xffu8; PACKET_SIZE];
        b[0] = SYNC_BYTE;
        b[1] = 0x1f;
        b[2] = 0xff;
        b[3] = 0x10;
        Self { b }
    }

    /// Raw packet bytes.
    pub fn b(&self) -> &[u8; PACKET_SIZE] {
        &self.b
    }

    /// Mutable raw packet bytes.
    pub fn b_mut(&mut self) -> &mut [u8; PACKET_SIZE] {
        &mut self.b
    }

    fn header(&self) -> PacketHeader {
        PacketHeader::from_bytes(self.b[0..4].try_into().unwrap())
    }

    fn set_header(&mut self, header: PacketHeader) {
        self.b[0..4].copy_from_slice(&header.into_bytes());
    }

    /// The 13-bit Packet Identifier.
    pub fn pid(&self) -> u16 {
        self.header().pid()
    }

    /// Overwrites the packet's PID, leaving every other header field untouched.
    pub fn set_pid(&mut self, pid: u16) {
        let mut header = self.header();
        header.set_pid(pid);
        self.set_header(header);
    }

    /// The 4-bit continuity counter.
    pub fn cc(&self) -> u8 {
        self.header().continuity_counter()
    }

    /// Overwrites the packet's continuity counter.
    pub fn set_cc(&mut self, cc: u8) {
        let mut header = self.header();
        header.set_continuity_counter(cc);
        self.set_header(header);
    }

    /// Whether the Payload Unit Start Indicator is set.
    pub fn pusi(&self) -> bool {
        self.header().pusi()
    }

    /// Sets the Payload Unit Start Indicator.
    pub fn set_pusi(&mut self) {
        let mut header = self.header();
        header.set_pusi(true);
        self.set_header(header);
    }

    /// Whether the adaptation_field_control bits indicate an adaptation field is present.
    pub fn has_adaptation_field(&self) -> bool {
        self.header().has_adaptation_field()
    }

    fn af_length(&self) -> u8 {
        self.b[4]
    }

    fn af_flags(&self) -> Option<AdaptationFieldHeader> {
        if self.has_adaptation_field() && self.af_length() >= 1 {
            Some(AdaptationFieldHeader::from_bytes([self.b[4], self.b[5]]))
        } else {
            None
        }
    }

    /// Size in bytes of the packet's header plus adaptation field (4 if no adaptation field is
    /// present, otherwise `4 + 1 + af_length`).
    pub fn header_size(&self) -> usize {
        if self.has_adaptation_field() {
            4 + 1 + self.af_length() as usize
        } else {
            4
        }
    }

    /// Whether the adaptation field carries a Program Clock Reference.
    pub fn has_pcr(&self) -> bool {
        matches!(self.af_flags(), Some(flags) if flags.has_pcr())
    }

    /// The 42-bit composite PCR value (33-bit base * 300 + 9-bit extension), if present.
    pub fn pcr(&self) -> Option<u64> {
        if !self.has_pcr() {
            return None;
        }
        let p = &self.b[6..12];
        let base = ((p[0] as u64) << 25)
            | ((p[1] as u64) << 17)
            | ((p[2] as u64) << 9)
            | ((p[3] as u64) << 1)
            | ((p[4] as u64) >> 7);
        let extension = (((p[4] & 0x1) as u64) << 8) | (p[5] as u64);
        Some(base * 300 + extension)
    }

    /// Writes a 42-bit composite PCR value into the adaptation field's PCR slot.
    ///
    /// The caller must already have laid out a 7-byte adaptation field with the PCR flag set
    /// (adaptation field length byte = 7, flags byte's PCR bit set) before calling this.
    pub fn set_pcr(&mut self, pcr: u64) {
        let pcr = pcr % PCR_MODULO;
        let base = pcr / 300;
        let extension = (pcr % 300) as u16;
        self.b[6] = (base >> 25) as u8;
        self.b[7] = (base >> 17) as u8;
        self.b[8] = (base >> 9) as u8;
        self.b[9] = (base >> 1) as u8;
        self.b[10] = (((base & 1) as u8) << 7) | 0x7e | (((extension >> 8) & 1) as u8);
        self.b[11] = (extension & 0xff) as u8;
    }
}
