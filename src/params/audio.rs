//! Audio device configuration.

use std::fmt;

/// Sample encoding of the PCM handed to the post-mix hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Signed 16-bit, native endian
    S16,
    /// 32-bit float, native endian
    F32,
}

impl SampleEncoding {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::F32 => 4,
        }
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S16 => "s16",
            Self::F32 => "f32",
        };
        f.write_str(name)
    }
}

/// Parameters used to open the audio device.
#[derive(Debug, Clone)]
pub struct AudioSpec {
    /// Requested output sample rate (Hz). The device default is used when
    /// the device cannot run at this rate.
    pub frequency_hz: u32,

    /// Encoding of the mixed stream delivered to the post-mix hook
    pub format: SampleEncoding,

    /// Output channel count (2 = stereo)
    pub channels: u16,

    /// Frames mixed per callback chunk; sets the hook cadence
    /// (512 frames ≈ 23 ms @ 22.05 kHz)
    pub chunk_size: u32,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            frequency_hz: 22_050,
            format: SampleEncoding::S16,
            channels: 2,
            chunk_size: 512,
        }
    }
}

impl AudioSpec {
    /// Bytes in one interleaved frame of the mixed stream
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * usize::from(self.channels)
    }

    /// Number of waveform slots the sample tap holds
    pub fn tap_capacity(&self) -> usize {
        self.chunk_size as usize * usize::from(self.channels)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.frequency_hz == 0 {
            return Err("Frequency must be > 0".to_string());
        }
        if self.channels == 0 {
            return Err("Channel count must be > 0".to_string());
        }
        if self.chunk_size == 0 {
            return Err("Chunk size must be > 0".to_string());
        }
        Ok(())
    }
}
