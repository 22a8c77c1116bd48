//! Single-track mixer on a cpal output stream.
//!
//! Tracks are decoded up front into signed 16-bit stereo at the device rate.
//! The device callback copies them out chunk by chunk, converts to the
//! device's sample format, and passes each mixed chunk to the post-mix hook.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedBufferSize, SupportedStreamConfig,
};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::decode::{decode_file, resample, to_s16};
use super::{AudioBackend, Loops, PostMixHook, TapFormat};
use crate::error::{AudioError, DecodeError};
use crate::params::{AudioSpec, SampleEncoding};

/// Interleaved signed 16-bit stereo PCM at the device rate.
#[derive(Debug)]
pub struct TrackPcm {
    samples: Vec<i16>,
}

impl TrackPcm {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }
}

/// A decoded track owned by the playback session.
#[derive(Debug)]
pub struct Track {
    pcm: Arc<TrackPcm>,
    path: PathBuf,
    sample_rate: u32,
}

impl Track {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> usize {
        self.pcm.frames()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate.max(1))
    }
}

/// Mixer state shared with the device callback.
#[derive(Debug)]
struct MixerState {
    track: Option<Arc<TrackPcm>>,
    /// Next frame to play
    position: usize,
    paused: bool,
    loops: Loops,
}

impl MixerState {
    fn idle() -> Self {
        Self {
            track: None,
            position: 0,
            paused: false,
            loops: Loops::Infinite,
        }
    }
}

pub struct CpalMixer {
    state: Arc<Mutex<MixerState>>,
    hook: Arc<Mutex<Option<PostMixHook>>>,
    format: TapFormat,
    sample_rate: u32,

    /// Audio output stream (kept alive)
    _stream: Stream,
}

impl CpalMixer {
    /// Open the default output device, as close to `spec` as it allows.
    pub fn open(spec: &AudioSpec) -> Result<Self, AudioError> {
        spec.validate().map_err(AudioError::Config)?;
        let format = mixed_format(spec)?;

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = choose_config(&device, spec)?;
        let sample_format = supported.sample_format();
        let mut config: StreamConfig = supported.config();
        if let SupportedBufferSize::Range { min, max } = supported.buffer_size() {
            if (*min..=*max).contains(&spec.chunk_size) {
                config.buffer_size = BufferSize::Fixed(spec.chunk_size);
            }
        }

        info!(
            "Audio: {} @ {}Hz, {} channels, {:?}, chunk {} frames",
            device_name, config.sample_rate.0, config.channels, sample_format, spec.chunk_size
        );

        let state = Arc::new(Mutex::new(MixerState::idle()));
        let hook: Arc<Mutex<Option<PostMixHook>>> = Arc::new(Mutex::new(None));
        let chunk_frames = spec.chunk_size as usize;

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, &state, &hook, chunk_frames)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, &state, &hook, chunk_frames)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, &state, &hook, chunk_frames)?,
            other => {
                return Err(AudioError::Config(format!(
                    "unsupported device sample format {other:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::Stream(format!("failed to start stream: {e}")))?;

        Ok(Self {
            state,
            hook,
            format,
            sample_rate: config.sample_rate.0,
            _stream: stream,
        })
    }

    /// Rate the device actually runs at (Hz)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioBackend for CpalMixer {
    type Track = Track;

    fn format(&self) -> TapFormat {
        self.format
    }

    fn load_track(&mut self, path: &Path) -> Result<Track, DecodeError> {
        let started = Instant::now();
        let decoded = decode_file(path)?.into_stereo();
        let decoded = resample(decoded, self.sample_rate)?;
        let pcm = TrackPcm::new(to_s16(&decoded.samples));
        debug!(
            "Decoded {} in {:.1}ms",
            path.display(),
            started.elapsed().as_secs_f64() * 1000.0
        );

        let track = Track {
            pcm: Arc::new(pcm),
            path: path.to_path_buf(),
            sample_rate: self.sample_rate,
        };
        info!(
            "Loaded {} ({:.1}s, {} frames)",
            path.display(),
            track.duration_secs(),
            track.frames()
        );
        Ok(track)
    }

    fn play(&mut self, track: &Track, loops: Loops) {
        let mut state = self.state.lock();
        state.track = Some(Arc::clone(&track.pcm));
        state.position = 0;
        state.paused = false;
        state.loops = loops;
    }

    fn pause(&mut self) {
        self.state.lock().paused = true;
    }

    fn resume(&mut self) {
        self.state.lock().paused = false;
    }

    fn halt(&mut self) {
        let previous = self.state.lock().track.take();
        drop(previous);
    }

    fn release(&mut self, track: Track) {
        debug!("Released {}", track.path.display());
    }

    fn set_post_mix(&mut self, hook: Option<PostMixHook>) {
        let previous = std::mem::replace(&mut *self.hook.lock(), hook);
        drop(previous);
    }
}

/// Layout of the stream handed to the post-mix hook. The mixer produces
/// signed 16-bit stereo only.
fn mixed_format(spec: &AudioSpec) -> Result<TapFormat, AudioError> {
    if spec.format != SampleEncoding::S16 {
        return Err(AudioError::Config(format!(
            "mixer produces s16 only, {} was requested",
            spec.format
        )));
    }
    Ok(TapFormat::s16_stereo())
}

/// Prefer a config matching the requested channels and rate; otherwise take
/// the device default.
fn choose_config(device: &Device, spec: &AudioSpec) -> Result<SupportedStreamConfig, AudioError> {
    let wanted = SampleRate(spec.frequency_hz);

    if let Ok(ranges) = device.supported_output_configs() {
        let mut matching: Vec<_> = ranges
            .filter(|r| {
                r.channels() == spec.channels
                    && r.min_sample_rate() <= wanted
                    && wanted <= r.max_sample_rate()
            })
            .collect();
        matching.sort_by_key(|r| format_rank(r.sample_format()));

        if let Some(range) = matching.into_iter().next() {
            return Ok(range.with_sample_rate(wanted));
        }
    }

    debug!(
        "Device cannot run {}Hz x{}, using its default config",
        spec.frequency_hz, spec.channels
    );
    device
        .default_output_config()
        .map_err(|e| AudioError::Config(format!("failed to get output config: {e}")))
}

fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        SampleFormat::U16 => 2,
        _ => 3,
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    state: &Arc<Mutex<MixerState>>,
    hook: &Arc<Mutex<Option<PostMixHook>>>,
    chunk_frames: usize,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    let state = Arc::clone(state);
    let hook = Arc::clone(hook);
    let device_channels = usize::from(config.channels).max(1);
    let chunk_frames = chunk_frames.max(1);
    let mut scratch = vec![0i16; chunk_frames * 2];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                fill_device_buffer(data, device_channels, &state, &hook, &mut scratch);
            },
            |err| error!("Audio stream error: {err}"),
            None,
        )
        .map_err(|e| AudioError::Stream(format!("failed to build stream: {e}")))
}

/// Mix `data` in chunks of at most `scratch.len() / 2` frames. Every chunk,
/// silent or not, reaches the hook as native-endian S16 stereo.
fn fill_device_buffer<T: SizedSample + FromSample<i16>>(
    data: &mut [T],
    device_channels: usize,
    state: &Mutex<MixerState>,
    hook: &Mutex<Option<PostMixHook>>,
    scratch: &mut [i16],
) {
    let chunk_frames = scratch.len() / 2;
    if chunk_frames == 0 || device_channels == 0 {
        return;
    }
    let frames = data.len() / device_channels;
    let mut done = 0;

    while done < frames {
        let n = (frames - done).min(chunk_frames);
        mix_chunk(&mut state.lock(), &mut scratch[..n * 2]);

        let out = &mut data[done * device_channels..(done + n) * device_channels];
        for (frame, pair) in out
            .chunks_exact_mut(device_channels)
            .zip(scratch[..n * 2].chunks_exact(2))
        {
            write_frame(frame, pair[0], pair[1]);
        }

        if let Some(hook) = hook.lock().as_mut() {
            hook(bytemuck::cast_slice::<i16, u8>(&scratch[..n * 2]));
        }

        done += n;
    }
}

/// Write one stereo frame into a device frame of any width.
fn write_frame<T: SizedSample + FromSample<i16>>(frame: &mut [T], left: i16, right: i16) {
    if frame.len() == 1 {
        let mono = ((i32::from(left) + i32::from(right)) / 2) as i16;
        frame[0] = T::from_sample(mono);
        return;
    }
    for (channel, sample) in frame.iter_mut().enumerate() {
        *sample = match channel {
            0 => T::from_sample(left),
            1 => T::from_sample(right),
            _ => T::from_sample(0i16),
        };
    }
}

/// Fill `out` (interleaved stereo) from the current track, honouring pause
/// and looping. Silence when idle.
fn mix_chunk(state: &mut MixerState, out: &mut [i16]) {
    out.fill(0);
    if state.paused {
        return;
    }

    let MixerState {
        track: slot,
        position,
        loops,
        ..
    } = state;
    let Some(track) = slot.clone() else {
        return;
    };

    let total = track.frames();
    if total == 0 {
        *slot = None;
        return;
    }

    let frames_out = out.len() / 2;
    let mut written = 0;
    while written < frames_out {
        if *position >= total {
            match loops {
                Loops::Infinite => *position = 0,
                Loops::Count(0) => {
                    *slot = None;
                    return;
                }
                Loops::Count(n) => {
                    *n -= 1;
                    *position = 0;
                }
            }
        }

        let n = (frames_out - written).min(total - *position);
        out[written * 2..(written + n) * 2]
            .copy_from_slice(&track.samples[*position * 2..(*position + n) * 2]);
        written += n;
        *position += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleTap;

    fn state_with(samples: Vec<i16>, loops: Loops) -> MixerState {
        MixerState {
            track: Some(Arc::new(TrackPcm::new(samples))),
            position: 0,
            paused: false,
            loops,
        }
    }

    #[test]
    fn test_idle_mixes_silence() {
        let mut state = MixerState::idle();
        let mut out = [7i16; 8];
        mix_chunk(&mut state, &mut out);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_infinite_loop_wraps() {
        let mut state = state_with(vec![1, -1, 2, -2, 3, -3], Loops::Infinite);
        let mut out = [0i16; 10];
        mix_chunk(&mut state, &mut out);

        assert_eq!(out, [1, -1, 2, -2, 3, -3, 1, -1, 2, -2]);
        assert_eq!(state.position, 2);
    }

    #[test]
    fn test_count_loop_stops_after_last_pass() {
        let mut state = state_with(vec![5, 5], Loops::Count(1));
        let mut out = [0i16; 8];
        mix_chunk(&mut state, &mut out);

        // Two passes, then silence
        assert_eq!(out, [5, 5, 5, 5, 0, 0, 0, 0]);
        assert!(state.track.is_none());
    }

    #[test]
    fn test_paused_is_silent_and_holds_position() {
        let mut state = state_with(vec![9, 9, 9, 9], Loops::Infinite);
        state.paused = true;
        let mut out = [1i16; 4];
        mix_chunk(&mut state, &mut out);

        assert_eq!(out, [0; 4]);
        assert_eq!(state.position, 0);
    }

    #[test]
    fn test_write_frame_downmixes_to_mono() {
        let mut frame = [0i16; 1];
        write_frame(&mut frame, 100, 300);
        assert_eq!(frame, [200]);
    }

    #[test]
    fn test_write_frame_silences_extra_channels() {
        let mut frame = [1.0f32; 4];
        write_frame(&mut frame, i16::MAX, 0);
        assert!((frame[0] - 1.0).abs() < 1e-3);
        assert_eq!(&frame[1..], &[0.0, 0.0, 0.0]);
    }

    /// Hook that records the size and contents of every chunk it sees.
    fn capturing_hook() -> (Arc<Mutex<Vec<Vec<u8>>>>, Mutex<Option<PostMixHook>>) {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&chunks);
        let hook: PostMixHook = Box::new(move |bytes: &[u8]| sink.lock().push(bytes.to_vec()));
        (chunks, Mutex::new(Some(hook)))
    }

    fn ramp_track(frames: usize) -> Vec<i16> {
        (0..frames)
            .flat_map(|i| {
                let value = (i % 1000) as i16 * 10;
                [value, -value]
            })
            .collect()
    }

    #[test]
    fn test_device_buffer_split_into_hook_chunks() {
        let state = Mutex::new(state_with(ramp_track(2000), Loops::Infinite));
        let (chunks, hook) = capturing_hook();
        let mut scratch = vec![0i16; 512 * 2];
        let mut data = vec![0i16; 1300 * 2];

        fill_device_buffer(&mut data, 2, &state, &hook, &mut scratch);

        let sizes: Vec<usize> = chunks.lock().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2048, 2048, 1104]);
        assert_eq!(state.lock().position, 1300);

        // Device output carries the same frames the hook saw
        let hooked: Vec<u8> = chunks.lock().concat();
        assert_eq!(bytemuck::cast_slice::<i16, u8>(&data), hooked.as_slice());
    }

    #[test]
    fn test_hook_bytes_decode_to_left_channel() {
        let state = Mutex::new(state_with(ramp_track(600), Loops::Infinite));
        let (chunks, hook) = capturing_hook();
        let mut scratch = vec![0i16; 256 * 2];
        let mut data = vec![0.0f32; 300 * 2];

        fill_device_buffer(&mut data, 2, &state, &hook, &mut scratch);

        let tap = SampleTap::new(1024, TapFormat::s16_stereo());
        for chunk in chunks.lock().iter() {
            tap.on_mixed_audio(chunk);
        }
        let window = tap.snapshot();

        assert_eq!(window.len(), 300);
        for (i, &sample) in window.iter().enumerate() {
            let expected = f32::from((i % 1000) as i16 * 10) / f32::from(i16::MAX);
            assert!((sample - expected).abs() < 1e-6, "sample {i}: {sample} != {expected}");
        }
    }

    #[test]
    fn test_paused_chunks_still_reach_hook() {
        let mut paused = state_with(ramp_track(100), Loops::Infinite);
        paused.paused = true;
        let state = Mutex::new(paused);
        let (chunks, hook) = capturing_hook();
        let mut scratch = vec![0i16; 64 * 2];
        let mut data = vec![1i16; 100 * 2];

        fill_device_buffer(&mut data, 2, &state, &hook, &mut scratch);

        let chunks = chunks.lock();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().flatten().all(|&b| b == 0));
        assert!(data.iter().all(|&s| s == 0));
        assert_eq!(state.lock().position, 0);
    }

    #[test]
    fn test_mixed_format_requires_s16() {
        assert_eq!(
            mixed_format(&AudioSpec::default()).unwrap(),
            TapFormat::s16_stereo()
        );

        let spec = AudioSpec {
            format: SampleEncoding::F32,
            ..AudioSpec::default()
        };
        assert!(matches!(mixed_format(&spec), Err(AudioError::Config(_))));
    }
}
