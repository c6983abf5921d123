//! Decoder for the 4-byte frame header of an MPEG-1/MPEG-2 audio elementary stream.
//!
//! Ported from the bit layout described in ISO/IEC 11172-3 §2.4.1.3, with the lower-sampling-
//! frequency extension of ISO/IEC 13818-3.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Fields we actually interpret; used to decide whether a new header changed anything observable.
const HEADER_MASK: u32 = 0xfffe_fcf0;

/// Audio layer, as found in bits 18..17 of the header. Layer 0 denotes the reserved value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum AudioLayer {
    /// Reserved layer value.
    Reserved = 0,
    /// Layer I.
    I = 1,
    /// Layer II.
    II = 2,
    /// Layer III.
    III = 3,
}

/// Decoded attributes of an MPEG-1/MPEG-2 audio frame header.
///
/// Built incrementally via [`AudioAttributes::more_binary_data`] as frame headers are observed in
/// a stream; a freshly constructed instance is invalid until the first well-formed header is fed
/// to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioAttributes {
    header: u32,
    is_valid: bool,
    layer: u8,
    bitrate: u16,
    sampling_freq: u32,
    mode: u8,
    mode_extension: u8,
}

impl AudioAttributes {
    /// A fresh, invalid attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a new candidate header to the decoder.
    ///
    /// `data` must contain at least 4 bytes; only the first 4 are interpreted. Returns `true` if
    /// a new, distinct (under [`HEADER_MASK`]) header was decoded and the attributes were updated;
    /// returns `false` if the data was not a valid MPEG audio header, or if it is valid but
    /// unchanged from the currently cached header.
    pub fn more_binary_data(&mut self, data: &[u8]) -> bool {
        if data.len() < 4 {
            return false;
        }
        let header = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        if header & 0xfff0_0000 != 0xfff0_0000 {
            return false;
        }

        if self.is_valid && (self.header & HEADER_MASK) == (header & HEADER_MASK) {
            return false;
        }

        let id = ((header >> 19) & 0x01) as u8;
        let layer_raw = ((header >> 17) & 0x03) as u8;
        let bitrate_index = ((header >> 12) & 0x0f) as u8;
        let sampling = ((header >> 10) & 0x03) as u8;

        self.mode = ((header >> 6) & 0x03) as u8;
        self.mode_extension = ((header >> 4) & 0x03) as u8;
        self.header = header;
        self.is_valid = true;

        self.layer = match layer_raw {
            3 => 1,
            2 => 2,
            1 => 3,
            _ => 0, // reserved
        };

        self.bitrate = bitrate_table(id, self.layer, bitrate_index);
        self.sampling_freq = sampling_table(id, sampling);

        true
    }

    /// Whether a valid header has ever been consumed.
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Audio layer (1, 2, or 3), or 0 for the reserved value.
    pub fn layer(&self) -> u8 {
        self.layer
    }

    /// Typed view of [`AudioAttributes::layer`].
    pub fn layer_enum(&self) -> AudioLayer {
        AudioLayer::from_u8(self.layer).unwrap_or(AudioLayer::Reserved)
    }

    /// Bitrate in kilobits per second; 0 if reserved or not yet valid.
    pub fn bitrate(&self) -> u16 {
        self.bitrate
    }

    /// Sampling frequency in Hz; 0 if reserved or not yet valid.
    pub fn sampling_frequency(&self) -> u32 {
        self.sampling_freq
    }

    /// Raw 2-bit channel mode field.
    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// Raw 2-bit mode-extension field.
    pub fn mode_extension(&self) -> u8 {
        self.mode_extension
    }

    /// Human-readable layer name, e.g. `"layer III"`. Empty string if not yet valid.
    pub fn layer_name(&self) -> String {
        if !self.is_valid {
            return String::new();
        }
        match self.layer {
            1 => "layer I".to_string(),
            2 => "layer II".to_string(),
            3 => "layer III".to_string(),
            _ => format!("layer {}", self.layer),
        }
    }

    /// Human-readable channel-mode phrase, e.g. `"stereo"`. Empty string if invalid or undecodable.
    pub fn stereo_description(&self) -> String {
        if !self.is_valid {
            return String::new();
        }
        match self.mode {
            0 => "stereo".to_string(),
            1 if self.layer == 1 || self.layer == 2 => match self.mode_extension {
                0 => "subbands 4-31 in intensity stereo".to_string(),
                1 => "subbands 8-31 in intensity stereo".to_string(),
                2 => "subbands 12-31 in intensity stereo".to_string(),
                3 => "subbands 16-31 in intensity stereo".to_string(),
                _ => String::new(),
            },
            1 => match self.mode_extension {
                1 => "intensity stereo".to_string(),
                2 => "ms stereo".to_string(),
                3 => "intensity & ms stereo".to_string(),
                _ => String::new(),
            },
            2 => "dual channel".to_string(),
            3 => "single channel".to_string(),
            _ => String::new(),
        }
    }

    /// Full human-readable description, e.g. `"Audio layer III, 128 kb/s, @44100 Hz, stereo"`.
    /// Empty string if not yet valid.
    pub fn to_string(&self) -> String {
        if !self.is_valid {
            return String::new();
        }
        let mut desc = format!("Audio {}", self.layer_name());
        if self.bitrate != 0 {
            desc.push_str(&format!(", {} kb/s", self.bitrate));
        }
        if self.sampling_freq != 0 {
            desc.push_str(&format!(", @{} Hz", self.sampling_freq));
        }
        let stereo = self.stereo_description();
        if !stereo.is_empty() {
            desc.push_str(", ");
            desc.push_str(&stereo);
        }
        desc
    }
}

/// Bitrate in kb/s for the given (`id`, `layer`, `bitrate_index`) combination.
fn bitrate_table(id: u8, layer: u8, bitrate_index: u8) -> u16 {
    const LSF_LAYER_I: [u16; 15] = [
        0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256,
    ];
    const LSF_LAYER_II_III: [u16; 15] = [
        0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160,
    ];
    const FULL_LAYER_I: [u16; 15] = [
        0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448,
    ];
    const FULL_LAYER_II: [u16; 15] = [
        0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384,
    ];
    const FULL_LAYER_III: [u16; 15] = [
        0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
    ];

    let index = bitrate_index as usize;
    if index >= 15 {
        return 0;
    }

    if id == 0 {
        // ISO 13818-3 "lower sampling frequencies" extension.
        match layer {
            1 => LSF_LAYER_I[index],
            2 | 3 => LSF_LAYER_II_III[index],
            _ => 0, // reserved
        }
    } else {
        match layer {
            1 => FULL_LAYER_I[index],
            2 => FULL_LAYER_II[index],
            3 => FULL_LAYER_III[index],
            _ => 0, // reserved
        }
    }
}

/// Sampling frequency in Hz for the given (`id`, `sampling`) combination.
fn sampling_table(id: u8, sampling: u8) -> u32 {
    if id == 0 {
        match sampling {
            0 => 22050,
            1 => 24000,
            2 => 16000,
            _ => 0, // reserved
        }
    } else {
        match sampling {
            0 => 44100,
            1 => 48000,
            2 => 32000,
            _ => 0, // reserved
        }
    }
}
