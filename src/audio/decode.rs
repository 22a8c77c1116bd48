//! Whole-file decoding with symphonia and rate conversion with rubato.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::DecodeError;

/// Frames fed to the resampler per call
const RESAMPLE_CHUNK: usize = 1024;

/// Decoded PCM, interleaved f32.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / usize::from(self.channels)
        }
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate.max(1))
    }

    /// Convert to two channels: mono is duplicated, extra channels dropped.
    pub fn into_stereo(self) -> Self {
        let channels = usize::from(self.channels);
        if channels == 2 || channels == 0 {
            return self;
        }

        let mut samples = Vec::with_capacity(self.frames() * 2);
        for frame in self.samples.chunks_exact(channels) {
            let left = frame[0];
            let right = if channels == 1 { frame[0] } else { frame[1] };
            samples.push(left);
            samples.push(right);
        }

        Self {
            samples,
            sample_rate: self.sample_rate,
            channels: 2,
        }
    }
}

/// Decode the first audio track of `path` completely.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            DecodeError::NotFound(path.to_path_buf())
        } else {
            DecodeError::Open {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let unsupported = |reason: String| DecodeError::Unsupported {
        path: path.to_path_buf(),
        reason,
    };
    let corrupt = |reason: String| DecodeError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| unsupported(format!("failed to probe format: {e}")))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| unsupported("no audio tracks found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let channels = track.codec_params.channels.map_or(2, |c| c.count() as u16);

    debug!(
        "Audio track: id={}, sample_rate={}, channels={}",
        track_id, sample_rate, channels
    );

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| unsupported(format!("failed to create decoder: {e}")))?;

    let mut samples = Vec::new();
    let mut channels = channels;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(corrupt(format!("failed to read packet: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Decode error in {} (skipping packet): {e}", path.display());
                continue;
            }
            Err(e) => return Err(corrupt(format!("decode failed: {e}"))),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count() as u16;
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() || channels == 0 {
        return Err(corrupt("no audio frames decoded".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Convert `audio` to `target_rate`. A no-op when the rates already match.
pub fn resample(audio: DecodedAudio, target_rate: u32) -> Result<DecodedAudio, DecodeError> {
    if audio.sample_rate == target_rate || audio.frames() == 0 {
        return Ok(audio);
    }

    let channels = usize::from(audio.channels);
    let frames = audio.frames();
    let mut resampler = FftFixedIn::<f32>::new(
        audio.sample_rate as usize,
        target_rate as usize,
        RESAMPLE_CHUNK,
        2,
        channels,
    )
    .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let planes = deinterleave(&audio.samples, channels);
    let delay = resampler.output_delay();
    let expected = (frames as u64 * u64::from(target_rate) / u64::from(audio.sample_rate)) as usize;
    let chunk = resampler.input_frames_next();

    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay + chunk); channels];
    let mut block: Vec<Vec<f32>> = vec![vec![0.0; chunk]; channels];
    let mut position = 0;

    // Input past the end is zero-padded until the delayed tail has come out.
    while output[0].len() < expected + delay {
        for (plane, dst) in planes.iter().zip(block.iter_mut()) {
            for (i, sample) in dst.iter_mut().enumerate() {
                *sample = plane.get(position + i).copied().unwrap_or(0.0);
            }
        }
        position += chunk;

        let resampled = resampler
            .process(&block, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        for (dst, data) in output.iter_mut().zip(resampled) {
            dst.extend_from_slice(&data);
        }
    }

    let mut samples = Vec::with_capacity(expected * channels);
    for frame in delay..delay + expected {
        for plane in &output {
            samples.push(plane[frame]);
        }
    }

    debug!(
        "Resampled {} frames {}Hz -> {} frames {}Hz",
        frames, audio.sample_rate, expected, target_rate
    );

    Ok(DecodedAudio {
        samples,
        sample_rate: target_rate,
        channels: audio.channels,
    })
}

/// Quantize normalized floats to signed 16-bit.
pub fn to_s16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16)
        .collect()
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (plane, &sample) in planes.iter_mut().zip(frame) {
            plane.push(sample);
        }
    }
    planes
}
