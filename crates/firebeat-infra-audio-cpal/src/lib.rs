use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig, SupportedStreamConfig,
    SupportedStreamConfigRange,
};
use firebeat_ports::audio::{
    AudioError, AudioPlaybackPort, PlaybackClock, PlaybackHandle, SongFile,
};
use firebeat_ports::types::Seconds;
use std::io::{Cursor, ErrorKind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, error, info, warn};

/// Song decoded to deinterleaved stereo at a known rate.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedSong {
    pub sample_rate_hz: u32,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl DecodedSong {
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    pub fn duration_s(&self) -> Seconds {
        self.frames() as f64 / self.sample_rate_hz as f64
    }

    /// Mono is copied to both sides; channels past the second are dropped.
    fn push_interleaved(&mut self, samples: &[f32], channels: usize) {
        if channels == 0 {
            return;
        }
        self.left.reserve(samples.len() / channels);
        self.right.reserve(samples.len() / channels);
        for frame in samples.chunks_exact(channels) {
            self.left.push(frame[0]);
            self.right.push(frame.get(1).copied().unwrap_or(frame[0]));
        }
    }

    /// Linear interpolation; good enough to keep the clock honest when the device
    /// refuses the song's rate.
    pub fn resampled(&self, sample_rate_hz: u32) -> DecodedSong {
        if sample_rate_hz == self.sample_rate_hz || self.frames() == 0 {
            return DecodedSong {
                sample_rate_hz,
                ..self.clone()
            };
        }
        let ratio = self.sample_rate_hz as f64 / sample_rate_hz as f64;
        let frames = (self.frames() as f64 / ratio).round() as usize;
        let sample = |channel: &[f32], pos: f64| {
            let index = pos.floor() as usize;
            let frac = (pos - index as f64) as f32;
            let a = channel.get(index).copied().unwrap_or(0.0);
            let b = channel.get(index + 1).copied().unwrap_or(a);
            a + (b - a) * frac
        };
        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for frame in 0..frames {
            let pos = frame as f64 * ratio;
            left.push(sample(&self.left, pos));
            right.push(sample(&self.right, pos));
        }
        DecodedSong {
            sample_rate_hz,
            left,
            right,
        }
    }
}

const OGG_MAGIC: &[u8] = b"OggS";
const RIFF_MAGIC: &[u8] = b"RIFF";

/// Decodes WAV (hound) or Ogg Vorbis (symphonia), chosen by the leading magic bytes.
/// Beatmap songs are usually Ogg Vorbis named `.egg`, so the extension is not trusted.
pub fn decode_song(song: &SongFile) -> Result<DecodedSong, AudioError> {
    let decoded = if song.bytes.starts_with(OGG_MAGIC) {
        decode_ogg(song)?
    } else if song.bytes.starts_with(RIFF_MAGIC) {
        decode_wav(song)?
    } else {
        return Err(AudioError::UnsupportedFormat(format!(
            "{}: expected an ogg vorbis or wav song",
            song.filename
        )));
    };
    debug!(
        song = %song.filename,
        sample_rate_hz = decoded.sample_rate_hz,
        frames = decoded.frames(),
        "decoded song"
    );
    Ok(decoded)
}

fn decode_wav(song: &SongFile) -> Result<DecodedSong, AudioError> {
    let reader = hound::WavReader::new(Cursor::new(song.bytes.as_slice()))
        .map_err(|e| AudioError::Decode(format!("{}: {e}", song.filename)))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(AudioError::Decode(format!("{}: no channels", song.filename)));
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| AudioError::Decode(e.to_string()))?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()
                .map_err(|e| AudioError::Decode(e.to_string()))?
        }
    };

    let mut decoded = DecodedSong {
        sample_rate_hz: spec.sample_rate,
        left: Vec::new(),
        right: Vec::new(),
    };
    decoded.push_interleaved(&samples, spec.channels as usize);
    Ok(decoded)
}

fn decode_ogg(song: &SongFile) -> Result<DecodedSong, AudioError> {
    let decode_err = |e: SymphoniaError| AudioError::Decode(format!("{}: {e}", song.filename));

    let source = MediaSourceStream::new(
        Box::new(Cursor::new(Vec::clone(&song.bytes))),
        Default::default(),
    );
    let mut hint = Hint::new();
    hint.with_extension("ogg");
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_err)?;
    let mut format = probed.format;

    let (track_id, mut decoder, rate_hint) = {
        let track = format
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioError::Decode(format!("{}: no audio track", song.filename)))?;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => {
                    AudioError::UnsupportedFormat(format!("{}: {what}", song.filename))
                }
                other => decode_err(other),
            })?;
        (track.id, decoder, track.codec_params.sample_rate)
    };

    let mut decoded = DecodedSong {
        sample_rate_hz: rate_hint.unwrap_or(0),
        left: Vec::new(),
        right: Vec::new(),
    };
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_err(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let buffer = match decoder.decode(&packet) {
            Ok(buffer) => buffer,
            Err(SymphoniaError::DecodeError(reason)) => {
                warn!(song = %song.filename, reason, "skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(decode_err(e)),
        };
        let spec = *buffer.spec();
        if decoded.sample_rate_hz == 0 {
            decoded.sample_rate_hz = spec.rate;
        }
        let mut samples = SampleBuffer::<f32>::new(buffer.capacity() as u64, spec);
        samples.copy_interleaved_ref(buffer);
        decoded.push_interleaved(samples.samples(), spec.channels.count());
    }

    if decoded.sample_rate_hz == 0 {
        return Err(AudioError::Decode(format!(
            "{}: unknown sample rate",
            song.filename
        )));
    }
    Ok(decoded)
}

/// Counts frames handed to the device. Zero until the first callback, then keeps
/// advancing (with silence) after the song runs out, until the stream is stopped.
#[derive(Debug)]
pub struct FrameClock {
    frames: AtomicU64,
    sample_rate_hz: u32,
}

impl FrameClock {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate_hz: sample_rate_hz.max(1),
        }
    }

    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Release);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

impl PlaybackClock for FrameClock {
    fn now(&self) -> Seconds {
        self.frames() as f64 / self.sample_rate_hz as f64
    }
}

pub struct CpalPlayback {
    device_name: Option<String>,
}

impl CpalPlayback {
    /// Plays on the host's default output device.
    pub fn new() -> Self {
        Self { device_name: None }
    }

    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    pub fn list_devices() -> Result<Vec<String>, AudioError> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| AudioError::Backend(e.to_string()))?;
        Ok(devices
            .map(|device| {
                device
                    .name()
                    .unwrap_or_else(|_| "Unknown Output".to_string())
            })
            .collect())
    }

    fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, AudioError> {
        match name {
            None => host
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceNotFound("default output".to_string())),
            Some(wanted) => host
                .output_devices()
                .map_err(|e| AudioError::Backend(e.to_string()))?
                .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceNotFound(wanted.to_string())),
        }
    }
}

impl Default for CpalPlayback {
    fn default() -> Self {
        Self::new()
    }
}

struct SelectedStreamConfig {
    config: StreamConfig,
    sample_format: SampleFormat,
}

fn select_stream_config(
    device: &cpal::Device,
    sample_rate_hz: u32,
) -> Result<SelectedStreamConfig, AudioError> {
    let default = device
        .default_output_config()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;
    let mut supported = device
        .supported_output_configs()
        .map_err(|e| AudioError::Backend(e.to_string()))?;
    let chosen = select_supported_config(&mut supported, sample_rate_hz, default.channels())
        .unwrap_or(default);
    Ok(SelectedStreamConfig {
        sample_format: chosen.sample_format(),
        config: chosen.config(),
    })
}

fn select_supported_config(
    supported: &mut dyn Iterator<Item = SupportedStreamConfigRange>,
    sample_rate_hz: u32,
    channels: u16,
) -> Option<SupportedStreamConfig> {
    let mut best: Option<SupportedStreamConfig> = None;
    let mut best_score: i32 = -1;

    for config_range in supported {
        if config_range.channels() != channels {
            continue;
        }
        let min = config_range.min_sample_rate().0;
        let max = config_range.max_sample_rate().0;
        if sample_rate_hz < min || sample_rate_hz > max {
            continue;
        }

        let score = match config_range.sample_format() {
            SampleFormat::F32 => 3,
            SampleFormat::I16 => 2,
            SampleFormat::U16 => 1,
            _ => 0,
        };

        if score > best_score {
            best = Some(config_range.with_sample_rate(SampleRate(sample_rate_hz)));
            best_score = score;
        }
    }
    best
}

struct SongCursor {
    song: DecodedSong,
    position: usize,
    clock: Arc<FrameClock>,
    finished: Arc<AtomicBool>,
}

impl SongCursor {
    fn fill<T: SizedSample + FromSample<f32>>(&mut self, data: &mut [T], channels: usize) {
        let frames = data.len() / channels;
        for frame in data.chunks_exact_mut(channels) {
            let l = self.song.left.get(self.position).copied().unwrap_or(0.0);
            let r = self.song.right.get(self.position).copied().unwrap_or(0.0);
            match channels {
                1 => frame[0] = T::from_sample((l + r) * 0.5),
                _ => {
                    frame[0] = T::from_sample(l);
                    frame[1] = T::from_sample(r);
                    for sample in &mut frame[2..] {
                        *sample = T::from_sample(0.0f32);
                    }
                }
            }
            self.position += 1;
        }
        if self.position >= self.song.frames() {
            self.finished.store(true, Ordering::Relaxed);
        }
        self.clock.advance(frames as u64);
    }
}

fn build_stream<T: SizedSample + FromSample<f32>>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut cursor: SongCursor,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let channels = config.channels as usize;
    device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| cursor.fill(data, channels),
        |err| error!(error = %err, "cpal stream error"),
        None,
    )
}

pub struct CpalPlaybackHandle {
    clock: Arc<FrameClock>,
    finished: Arc<AtomicBool>,
    stop_tx: mpsc::Sender<()>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl PlaybackHandle for CpalPlaybackHandle {
    fn clock(&self) -> Arc<dyn PlaybackClock> {
        self.clock.clone()
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    fn stop(mut self: Box<Self>) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
        debug!("playback stopped");
    }
}

impl AudioPlaybackPort for CpalPlayback {
    fn start(&self, song: &SongFile) -> Result<Box<dyn PlaybackHandle>, AudioError> {
        let decoded = decode_song(song)?;
        let device_name = self.device_name.clone();
        let filename = song.filename.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        // cpal streams are not Send; the stream lives and dies on this thread.
        let join_handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let host = cpal::default_host();
                let device = match CpalPlayback::find_device(&host, device_name.as_deref()) {
                    Ok(device) => device,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let selected = match select_stream_config(&device, decoded.sample_rate_hz) {
                    Ok(selected) => selected,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                let rate = selected.config.sample_rate.0;
                if rate != decoded.sample_rate_hz {
                    warn!(
                        song_rate = decoded.sample_rate_hz,
                        device_rate = rate,
                        "device rejected song rate; resampling"
                    );
                }
                let clock = Arc::new(FrameClock::new(rate));
                let finished = Arc::new(AtomicBool::new(false));
                let cursor = SongCursor {
                    song: decoded.resampled(rate),
                    position: 0,
                    clock: clock.clone(),
                    finished: finished.clone(),
                };

                let stream = match selected.sample_format {
                    SampleFormat::F32 => build_stream::<f32>(&device, &selected.config, cursor),
                    SampleFormat::I16 => build_stream::<i16>(&device, &selected.config, cursor),
                    SampleFormat::U16 => build_stream::<u16>(&device, &selected.config, cursor),
                    _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
                };
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(AudioError::Backend(err.to_string())));
                        return;
                    }
                };
                if let Err(err) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::Backend(err.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok((clock, finished)));
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::Backend(e.to_string()))?;

        let (clock, finished) = ready_rx
            .recv()
            .map_err(|e| AudioError::Backend(e.to_string()))??;
        info!(song = %filename, "playback started");
        Ok(Box::new(CpalPlaybackHandle {
            clock,
            finished,
            stop_tx,
            join_handle: Some(join_handle),
        }))
    }
}
