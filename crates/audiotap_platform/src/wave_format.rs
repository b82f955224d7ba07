//! Wave format descriptors (WAVEFORMATEX / WAVEFORMATEXTENSIBLE)
//!
//! Mix formats come back from the platform as a little-endian 18-byte
//! header optionally followed by `cbSize` extension bytes. The extensible
//! form adds valid bits, a speaker mask and a sub-format GUID that carries
//! the real sample encoding.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AudioError, Result};

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Size of the fixed WAVEFORMATEX header
pub const WAVEFORMATEX_SIZE: usize = 18;
/// Minimum `cbSize` of a WAVEFORMATEXTENSIBLE
pub const EXTENSIBLE_EXTRA_SIZE: usize = 22;

/// KSDATAFORMAT_SUBTYPE_PCM
pub const SUBTYPE_PCM: Uuid = Uuid::from_u128(0x00000001_0000_0010_8000_00aa00389b71);
/// KSDATAFORMAT_SUBTYPE_IEEE_FLOAT
pub const SUBTYPE_IEEE_FLOAT: Uuid = Uuid::from_u128(0x00000003_0000_0010_8000_00aa00389b71);

/// Sample encoding of one interleaved sample
///
/// `I8` is an output encoding only; 8-bit WAVE PCM is always `U8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    I8,
    I16,
    I24,
    I32,
    F32,
    F64,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::I8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I24 => 3,
            SampleFormat::I32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SampleFormat::F32 | SampleFormat::F64)
    }

    /// Plain (non-extensible) format tag for this encoding
    pub fn format_tag(&self) -> u16 {
        if self.is_float() {
            WAVE_FORMAT_IEEE_FLOAT
        } else {
            WAVE_FORMAT_PCM
        }
    }
}

/// Extension fields present when the tag is `WAVE_FORMAT_EXTENSIBLE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveFormatExtension {
    pub valid_bits_per_sample: u16,
    pub channel_mask: u32,
    pub sub_format: Uuid,
}

/// Parsed wave format descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub extension: Option<WaveFormatExtension>,
}

impl WaveFormat {
    /// Plain interleaved format with no extension
    pub fn new(sample_format: SampleFormat, sample_rate: u32, channels: u16) -> Self {
        let bytes = sample_format.bytes_per_sample() as u16;
        let block_align = bytes * channels;
        Self {
            format_tag: sample_format.format_tag(),
            channels,
            samples_per_sec: sample_rate,
            avg_bytes_per_sec: sample_rate * u32::from(block_align),
            block_align,
            bits_per_sample: bytes * 8,
            extension: None,
        }
    }

    /// Parse a descriptor from its little-endian byte image
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < WAVEFORMATEX_SIZE {
            return Err(AudioError::FormatNegotiationFailed(format!(
                "wave format needs {} bytes, got {}",
                WAVEFORMATEX_SIZE,
                bytes.len()
            )));
        }

        let u16_at = |o: usize| u16::from_le_bytes([bytes[o], bytes[o + 1]]);
        let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);

        let format_tag = u16_at(0);
        let cb_size = u16_at(16) as usize;

        let extension = if format_tag == WAVE_FORMAT_EXTENSIBLE && cb_size >= EXTENSIBLE_EXTRA_SIZE {
            let ext = &bytes[WAVEFORMATEX_SIZE..];
            if ext.len() < EXTENSIBLE_EXTRA_SIZE {
                return Err(AudioError::FormatNegotiationFailed(format!(
                    "extensible format declares {} extra bytes but only {} present",
                    cb_size,
                    ext.len()
                )));
            }
            let mut guid = [0u8; 16];
            guid.copy_from_slice(&ext[6..22]);
            Some(WaveFormatExtension {
                valid_bits_per_sample: u16::from_le_bytes([ext[0], ext[1]]),
                channel_mask: u32::from_le_bytes([ext[2], ext[3], ext[4], ext[5]]),
                sub_format: Uuid::from_bytes_le(guid),
            })
        } else {
            None
        };

        Ok(Self {
            format_tag,
            channels: u16_at(2),
            samples_per_sec: u32_at(4),
            avg_bytes_per_sec: u32_at(8),
            block_align: u16_at(12),
            bits_per_sample: u16_at(14),
            extension,
        })
    }

    /// Parse a descriptor the platform handed back by pointer
    ///
    /// `cbSize` is only honoured for `WAVE_FORMAT_EXTENSIBLE`, and at most
    /// the extensible fields are read. Plain formats may leave it garbage.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a valid WAVEFORMATEX, followed by the extensible
    /// fields when the tag says so.
    pub unsafe fn from_ptr(ptr: *const u8) -> Result<Self> {
        if ptr.is_null() {
            return Err(AudioError::FormatNegotiationFailed("null wave format".into()));
        }
        let header = std::slice::from_raw_parts(ptr, WAVEFORMATEX_SIZE);
        Self::from_bytes(std::slice::from_raw_parts(ptr, WAVEFORMATEX_SIZE + extra_len(header)))
    }

    /// Little-endian WAVEFORMATEX image (extension included when present)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WAVEFORMATEX_SIZE + EXTENSIBLE_EXTRA_SIZE);
        out.extend_from_slice(&self.format_tag.to_le_bytes());
        out.extend_from_slice(&self.channels.to_le_bytes());
        out.extend_from_slice(&self.samples_per_sec.to_le_bytes());
        out.extend_from_slice(&self.avg_bytes_per_sec.to_le_bytes());
        out.extend_from_slice(&self.block_align.to_le_bytes());
        out.extend_from_slice(&self.bits_per_sample.to_le_bytes());
        match &self.extension {
            Some(ext) => {
                out.extend_from_slice(&(EXTENSIBLE_EXTRA_SIZE as u16).to_le_bytes());
                out.extend_from_slice(&ext.valid_bits_per_sample.to_le_bytes());
                out.extend_from_slice(&ext.channel_mask.to_le_bytes());
                out.extend_from_slice(&ext.sub_format.to_bytes_le());
            }
            None => out.extend_from_slice(&0u16.to_le_bytes()),
        }
        out
    }

    /// The tag that actually describes the samples (sub-format for extensible)
    pub fn effective_tag(&self) -> Option<u16> {
        match (&self.extension, self.format_tag) {
            (Some(ext), WAVE_FORMAT_EXTENSIBLE) if ext.sub_format == SUBTYPE_PCM => Some(WAVE_FORMAT_PCM),
            (Some(ext), WAVE_FORMAT_EXTENSIBLE) if ext.sub_format == SUBTYPE_IEEE_FLOAT => {
                Some(WAVE_FORMAT_IEEE_FLOAT)
            }
            (_, WAVE_FORMAT_EXTENSIBLE) => None,
            (_, tag) => Some(tag),
        }
    }

    /// Derive the sample encoding
    pub fn sample_format(&self) -> Result<SampleFormat> {
        let unsupported = || {
            AudioError::FormatNegotiationFailed(format!(
                "unsupported sample encoding: tag 0x{:04X}, {} bits",
                self.format_tag, self.bits_per_sample
            ))
        };

        match (self.effective_tag().ok_or_else(unsupported)?, self.bits_per_sample) {
            (WAVE_FORMAT_PCM, 8) => Ok(SampleFormat::U8),
            (WAVE_FORMAT_PCM, 16) => Ok(SampleFormat::I16),
            (WAVE_FORMAT_PCM, 24) => Ok(SampleFormat::I24),
            (WAVE_FORMAT_PCM, 32) => Ok(SampleFormat::I32),
            (WAVE_FORMAT_IEEE_FLOAT, 32) => Ok(SampleFormat::F32),
            (WAVE_FORMAT_IEEE_FLOAT, 64) => Ok(SampleFormat::F64),
            _ => Err(unsupported()),
        }
    }

    pub fn is_float(&self) -> bool {
        self.effective_tag() == Some(WAVE_FORMAT_IEEE_FLOAT)
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    /// Frames in `duration` at this rate, rounded down
    pub fn frames_in(&self, duration: std::time::Duration) -> u32 {
        (duration.as_secs_f64() * f64::from(self.samples_per_sec)) as u32
    }
}

/// Extension bytes worth reading after a WAVEFORMATEX header
fn extra_len(header: &[u8]) -> usize {
    let format_tag = u16::from_le_bytes([header[0], header[1]]);
    if format_tag != WAVE_FORMAT_EXTENSIBLE {
        return 0;
    }
    let cb_size = u16::from_le_bytes([header[16], header[17]]) as usize;
    cb_size.min(EXTENSIBLE_EXTRA_SIZE)
}
