//! PCM blocks and sample conversion

use chrono::{DateTime, Utc};

use crate::wave_format::SampleFormat;

/// Convert one float sample to s16: clip to [-1, 1], scale by 32767, round
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Convert a float slice to s16 into `out` (cleared first)
pub fn convert_f32_to_i16(samples: &[f32], out: &mut Vec<i16>) {
    out.clear();
    out.extend(samples.iter().map(|&s| f32_to_i16(s)));
}

/// Timestamped chunk of interleaved samples copied out of a platform buffer
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBlock {
    data: Vec<u8>,
    format: SampleFormat,
    sample_rate: u32,
    channels: u16,
    frames: u32,
    timestamp: DateTime<Utc>,
    silent: bool,
}

impl PcmBlock {
    pub fn new(
        data: Vec<u8>,
        format: SampleFormat,
        sample_rate: u32,
        channels: u16,
        frames: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            data,
            format,
            sample_rate,
            channels,
            frames,
            timestamp,
            silent: false,
        }
    }

    /// Mark the block as platform-reported silence
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(f64::from(self.frames) / f64::from(self.sample_rate))
    }

    fn samples(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.format.bytes_per_sample())
    }

    /// Samples as normalized f32
    pub fn to_f32(&self) -> Vec<f32> {
        match self.format {
            SampleFormat::F32 => self
                .samples()
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            _ => self.to_f64().into_iter().map(|s| s as f32).collect(),
        }
    }

    /// Samples as normalized f64
    pub fn to_f64(&self) -> Vec<f64> {
        match self.format {
            SampleFormat::F32 => self
                .samples()
                .map(|b| f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
                .collect(),
            SampleFormat::F64 => self
                .samples()
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
            SampleFormat::U8 => self.data.iter().map(|&b| (f64::from(b) - 128.0) / 128.0).collect(),
            SampleFormat::I8 => self.data.iter().map(|&b| f64::from(b as i8) / 128.0).collect(),
            SampleFormat::I16 => self
                .samples()
                .map(|b| f64::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0)
                .collect(),
            SampleFormat::I24 => self
                .samples()
                .map(|b| f64::from(i24_from_le(b)) / 8_388_608.0)
                .collect(),
            SampleFormat::I32 => self
                .samples()
                .map(|b| f64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])) / 2_147_483_648.0)
                .collect(),
        }
    }

    /// Samples as s16; float formats are clipped before scaling
    pub fn to_i16(&self) -> Vec<i16> {
        match self.format {
            SampleFormat::I16 => self.samples().map(|b| i16::from_le_bytes([b[0], b[1]])).collect(),
            SampleFormat::U8 => self.data.iter().map(|&b| (i16::from(b) - 128) << 8).collect(),
            SampleFormat::I8 => self.data.iter().map(|&b| i16::from(b as i8) << 8).collect(),
            SampleFormat::I24 => self.samples().map(|b| (i24_from_le(b) >> 8) as i16).collect(),
            SampleFormat::I32 => self
                .samples()
                .map(|b| (i32::from_le_bytes([b[0], b[1], b[2], b[3]]) >> 16) as i16)
                .collect(),
            SampleFormat::F32 | SampleFormat::F64 => {
                let mut out = Vec::with_capacity(self.data.len() / self.format.bytes_per_sample());
                convert_f32_to_i16(&self.to_f32(), &mut out);
                out
            }
        }
    }

    /// Same block re-encoded as s16
    pub fn to_i16_block(&self) -> PcmBlock {
        if self.format == SampleFormat::I16 {
            return self.clone();
        }
        self.with_data(
            self.to_i16().iter().flat_map(|s| s.to_le_bytes()).collect(),
            SampleFormat::I16,
        )
    }

    /// Same block re-encoded as `target`
    ///
    /// Integer targets clip to [-1, 1] and scale by the format's positive
    /// full scale with rounding, the rule s16 uses. Float targets carry the
    /// normalized value unclipped.
    pub fn encode(&self, target: SampleFormat) -> PcmBlock {
        if target == self.format {
            return self.clone();
        }
        if target == SampleFormat::I16 {
            return self.to_i16_block();
        }

        let samples = self.to_f64();
        let mut data = Vec::with_capacity(samples.len() * target.bytes_per_sample());
        for sample in samples {
            match target {
                SampleFormat::F32 => data.extend_from_slice(&(sample as f32).to_le_bytes()),
                SampleFormat::F64 => data.extend_from_slice(&sample.to_le_bytes()),
                SampleFormat::U8 => data.push((scale(sample, 127.0) + 128) as u8),
                SampleFormat::I8 => data.push(scale(sample, 127.0) as i8 as u8),
                SampleFormat::I16 => {
                    data.extend_from_slice(&(scale(sample, 32_767.0) as i16).to_le_bytes())
                }
                SampleFormat::I24 => {
                    data.extend_from_slice(&(scale(sample, 8_388_607.0) as i32).to_le_bytes()[..3])
                }
                SampleFormat::I32 => {
                    data.extend_from_slice(&(scale(sample, 2_147_483_647.0) as i32).to_le_bytes())
                }
            }
        }
        self.with_data(data, target)
    }

    fn with_data(&self, data: Vec<u8>, format: SampleFormat) -> PcmBlock {
        PcmBlock {
            data,
            format,
            sample_rate: self.sample_rate,
            channels: self.channels,
            frames: self.frames,
            timestamp: self.timestamp,
            silent: self.silent,
        }
    }
}

/// Clip a normalized sample and scale it to an integer full scale
fn scale(sample: f64, full_scale: f64) -> i64 {
    (sample.clamp(-1.0, 1.0) * full_scale).round() as i64
}

fn i24_from_le(b: &[u8]) -> i32 {
    // Sign-extend by placing the 24 bits in the top of an i32
    i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8
}
