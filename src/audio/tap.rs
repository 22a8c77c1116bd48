//! Bounded waveform window filled from the audio post-mix hook.
//!
//! The audio callback appends, the render thread copies out once per frame.
//! Both sides hold the same lock for the duration of a single copy, so the
//! producer never waits on anything but a memcpy-sized critical section.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::PostMixHook;
use crate::params::SampleEncoding;

/// Byte layout of the PCM the tap receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapFormat {
    pub encoding: SampleEncoding,
    pub channels: u16,
    /// Channel kept when collapsing interleaved input to one waveform (0 = left)
    pub channel: u16,
}

impl TapFormat {
    /// Signed 16-bit stereo, keeping the left channel
    pub const fn s16_stereo() -> Self {
        Self {
            encoding: SampleEncoding::S16,
            channels: 2,
            channel: 0,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.encoding.bytes_per_sample() * usize::from(self.channels)
    }

    /// Only signed 16-bit input is converted.
    pub fn is_supported(&self) -> bool {
        self.encoding == SampleEncoding::S16 && self.channel < self.channels
    }
}

struct TapState {
    buffer: Box<[f32]>,
    cursor: usize,
}

/// Fixed-capacity, mutex-guarded window of normalized samples.
pub struct SampleTap {
    format: TapFormat,
    capacity: usize,
    state: Mutex<TapState>,
    warned_unsupported: AtomicBool,
}

impl SampleTap {
    /// Allocate the window once; it is never resized.
    pub fn new(capacity: usize, format: TapFormat) -> Self {
        let capacity = capacity.max(1);
        Self {
            format,
            capacity,
            state: Mutex::new(TapState {
                buffer: vec![0.0; capacity].into_boxed_slice(),
                cursor: 0,
            }),
            warned_unsupported: AtomicBool::new(false),
        }
    }

    /// Wrap a shared tap as a post-mix hook.
    pub fn hook(tap: &Arc<Self>) -> PostMixHook {
        let tap = Arc::clone(tap);
        Box::new(move |bytes: &[u8]| tap.on_mixed_audio(bytes))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn format(&self) -> TapFormat {
        self.format
    }

    /// Append a chunk of interleaved PCM.
    ///
    /// Runs on the audio thread: no allocation, no blocking beyond the tap's
    /// own lock. If the chunk does not fit behind the samples already held,
    /// the window restarts from slot 0. A chunk longer than the whole window
    /// keeps only its final partial window.
    pub fn on_mixed_audio(&self, bytes: &[u8]) {
        let bytes_per_frame = self.format.bytes_per_frame();
        let mut state = self.state.lock();

        if !self.format.is_supported() || bytes_per_frame == 0 {
            drop(state);
            if !self.warned_unsupported.swap(true, Ordering::Relaxed) {
                warn!(
                    "Sample tap: unsupported format {} x{} (channel {}), samples dropped",
                    self.format.encoding, self.format.channels, self.format.channel
                );
            }
            return;
        }

        let frames = bytes.len() / bytes_per_frame;
        if frames == 0 {
            return;
        }

        if state.cursor + frames > self.capacity {
            state.cursor = 0;
        }

        // Whole windows at the front of an oversized chunk would be
        // overwritten anyway.
        let skip = if frames > self.capacity {
            ((frames - 1) / self.capacity) * self.capacity
        } else {
            0
        };

        let offset = usize::from(self.format.channel) * 2;
        let start = state.cursor;
        for (i, frame) in bytes.chunks_exact(bytes_per_frame).skip(skip).enumerate() {
            let sample = i16::from_ne_bytes([frame[offset], frame[offset + 1]]);
            state.buffer[start + i] = normalize_s16(sample);
        }
        state.cursor = start + (frames - skip);
    }

    /// Copy the valid window into `out` (replacing its contents) and return
    /// the sample count. Never waits for new data.
    pub fn snapshot_into(&self, out: &mut Vec<f32>) -> usize {
        let state = self.state.lock();
        out.clear();
        out.extend_from_slice(&state.buffer[..state.cursor]);
        state.cursor
    }

    pub fn snapshot(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.capacity);
        self.snapshot_into(&mut out);
        out
    }

    /// Number of valid samples currently held
    pub fn len(&self) -> usize {
        self.state.lock().cursor
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logically clear the window (cursor back to 0).
    pub fn clear(&self) {
        self.state.lock().cursor = 0;
    }
}

fn normalize_s16(sample: i16) -> f32 {
    (f32::from(sample) / f32::from(i16::MAX)).clamp(-1.0, 1.0)
}
