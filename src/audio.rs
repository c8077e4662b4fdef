// Audio Module - Stereo capture, 256-point spectrum analysis and volume-controlled passthrough
use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::controller::SpectrumSource;
use crate::spectrum::{Spectrum, SPECTRUM_BINS};
use crate::volume::SharedVolume;

/// Transform length; yields `SPECTRUM_BINS` usable magnitude bins
pub const FFT_SIZE: usize = SPECTRUM_BINS * 2;
/// New samples per channel between analysis frames (50% overlap)
pub const HOP_SIZE: usize = FFT_SIZE / 2;

/// List all available audio devices (both input and output)
/// Returns a vector of (device_name, is_output) tuples
pub fn list_audio_devices() -> Result<Vec<(String, bool)>> {
    let host = cpal::default_host();
    let mut device_list = Vec::new();
    let mut seen_devices = HashSet::new();

    // Default devices first; enumerating everything can hang on some macOS systems
    if let Some(name) = host.default_input_device().and_then(|d| d.name().ok()) {
        device_list.push((format!("{} [INPUT] (default)", name), false));
        seen_devices.insert(name);
    }
    if let Some(name) = host.default_output_device().and_then(|d| d.name().ok()) {
        device_list.push((format!("{} [OUTPUT] (default)", name), true));
        seen_devices.insert(name);
    }

    if let Ok(devices) = host.input_devices() {
        for name in devices.filter_map(|d| d.name().ok()) {
            if seen_devices.insert(name.clone()) {
                device_list.push((format!("{} [INPUT]", name), false));
            }
        }
    }
    if let Ok(devices) = host.output_devices() {
        for name in devices.filter_map(|d| d.name().ok()) {
            if seen_devices.insert(name.clone()) {
                device_list.push((format!("{} [OUTPUT/LOOPBACK]", name), true));
            }
        }
    }

    if device_list.is_empty() {
        return Err(anyhow!("No audio devices found"));
    }

    Ok(device_list)
}

/// Strip the tags `list_audio_devices` adds to names
fn clean_device_name(device_name: &str) -> String {
    device_name
        .replace(" (default)", "")
        .replace(" [INPUT]", "")
        .replace(" [OUTPUT/LOOPBACK]", "")
        .replace(" [OUTPUT]", "")
        .trim()
        .to_lowercase()
}

/// Find an audio device by case-insensitive substring match.
/// An empty name selects the default device of the requested direction.
pub fn find_audio_device(device_name: &str, output: bool) -> Result<Device> {
    let host = cpal::default_host();
    let default = if output {
        host.default_output_device()
    } else {
        host.default_input_device()
    };

    let wanted = clean_device_name(device_name);
    if wanted.is_empty() || wanted == "default" {
        return default.ok_or_else(|| anyhow!("No default audio device available"));
    }

    if let Some(device) = default {
        if device.name().map(|n| n.to_lowercase().contains(&wanted)).unwrap_or(false) {
            return Ok(device);
        }
    }

    let candidates = if output {
        host.output_devices()?.collect::<Vec<_>>()
    } else {
        // Output devices can serve as loopback capture sources on some hosts
        host.input_devices()?.chain(host.output_devices()?).collect::<Vec<_>>()
    };

    candidates
        .into_iter()
        .find(|d| d.name().map(|n| n.to_lowercase().contains(&wanted)).unwrap_or(false))
        .ok_or_else(|| anyhow!("Audio device '{}' not found", device_name))
}

/// Hann-windowed magnitude spectrum of one channel
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    gain: f32,
}

impl SpectrumAnalyzer {
    /// `gain` scales raw FFT magnitudes (samples in -1.0..1.0) into integer bins
    pub fn new(gain: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let window = (0..FFT_SIZE)
            .map(|i| {
                let phase = i as f32 / (FFT_SIZE - 1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * phase).cos())
            })
            .collect();

        SpectrumAnalyzer {
            fft,
            window,
            buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            gain,
        }
    }

    pub fn analyze(&mut self, samples: &[f32]) -> Spectrum {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let mut spectrum = [0u16; SPECTRUM_BINS];
        for (bin, out) in spectrum.iter_mut().enumerate() {
            let magnitude = self.buffer[bin].norm() * self.gain;
            *out = magnitude.round().clamp(0.0, u16::MAX as f32) as u16;
        }
        spectrum
    }
}

/// Most recent `FFT_SIZE` samples of each channel plus a count of unseen samples
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    left: VecDeque<f32>,
    right: VecDeque<f32>,
    fresh: usize,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        CaptureBuffer::default()
    }

    /// Append interleaved samples. Mono input feeds both channels; channels past
    /// the second are ignored.
    pub fn push_interleaved(&mut self, data: &[f32], channels: usize) {
        if channels == 0 {
            return;
        }
        for frame in data.chunks_exact(channels) {
            let left = frame[0];
            let right = if channels > 1 { frame[1] } else { frame[0] };
            self.left.push_back(left);
            self.right.push_back(right);
        }
        self.fresh += data.len() / channels;

        while self.left.len() > FFT_SIZE {
            self.left.pop_front();
            self.right.pop_front();
        }
    }

    /// Copy out the newest window once a full hop of new samples has arrived.
    /// Any backlog beyond one hop is dropped.
    pub fn take_window(&mut self) -> Option<(Vec<f32>, Vec<f32>)> {
        if self.fresh < HOP_SIZE || self.left.len() < FFT_SIZE {
            return None;
        }
        self.fresh = 0;
        Some((self.left.iter().copied().collect(), self.right.iter().copied().collect()))
    }
}

/// Stereo frames waiting to be played back
#[derive(Debug)]
pub struct PlaybackQueue {
    frames: VecDeque<[f32; 2]>,
    capacity: usize,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        PlaybackQueue {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push_interleaved(&mut self, data: &[f32], channels: usize) {
        if channels == 0 {
            return;
        }
        for frame in data.chunks_exact(channels) {
            let right = if channels > 1 { frame[1] } else { frame[0] };
            self.frames.push_back([frame[0], right]);
        }
        // Drop the oldest audio rather than let latency grow
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    /// Fill an interleaved output buffer, scaling by `volume`. Underruns play silence.
    pub fn fill(&mut self, out: &mut [f32], channels: usize, volume: f32) {
        if channels == 0 {
            return;
        }
        for frame in out.chunks_exact_mut(channels) {
            let [left, right] = self.frames.pop_front().unwrap_or([0.0, 0.0]);
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = match (channels, ch) {
                    (1, _) => (left + right) * 0.5 * volume,
                    (_, 0) => left * volume,
                    (_, 1) => right * volume,
                    _ => 0.0,
                };
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.frames.len()
    }
}

/// Live capture from a cpal device, analysed into left/right spectra
pub struct CaptureSource {
    buffer: Arc<Mutex<CaptureBuffer>>,
    left: SpectrumAnalyzer,
    right: SpectrumAnalyzer,
    closed: Arc<AtomicBool>,
    _input: Stream,
    _output: Option<Stream>,
}

impl CaptureSource {
    /// Open `input_name` for capture. With `passthrough`, the captured audio is
    /// also played on `output_name` at the level held in `volume`.
    pub fn open(
        input_name: &str,
        fft_gain: f32,
        passthrough: Option<(&str, SharedVolume)>,
    ) -> Result<Self> {
        let device = find_audio_device(input_name, false)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let supported = device
            .default_input_config()
            .with_context(|| format!("Device '{}' does not support input capture", device_name))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();

        println!(
            "Capturing from {}: {} Hz, {} channel(s), {:?}",
            device_name, config.sample_rate.0, config.channels, sample_format
        );

        let buffer = Arc::new(Mutex::new(CaptureBuffer::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let (playback, output) = match passthrough {
            Some((output_name, volume)) => {
                // Quarter of a second of slack between capture and playback
                let queue = Arc::new(Mutex::new(PlaybackQueue::new(config.sample_rate.0 as usize / 4)));
                let stream = open_playback(output_name, config.sample_rate, queue.clone(), volume)?;
                (Some(queue), Some(stream))
            }
            None => (None, None),
        };

        let input = match sample_format {
            SampleFormat::F32 => build_capture_stream::<f32>(&device, &config, buffer.clone(), playback, closed.clone())?,
            SampleFormat::I16 => build_capture_stream::<i16>(&device, &config, buffer.clone(), playback, closed.clone())?,
            SampleFormat::U16 => build_capture_stream::<u16>(&device, &config, buffer.clone(), playback, closed.clone())?,
            other => bail!("Unsupported sample format: {:?}", other),
        };
        input.play()?;

        Ok(CaptureSource {
            buffer,
            left: SpectrumAnalyzer::new(fft_gain),
            right: SpectrumAnalyzer::new(fft_gain),
            closed,
            _input: input,
            _output: output,
        })
    }
}

impl SpectrumSource for CaptureSource {
    fn poll_frame(&mut self) -> Result<Option<(Spectrum, Spectrum)>> {
        let window = self
            .buffer
            .lock()
            .map_err(|_| anyhow!("Capture buffer lock poisoned"))?
            .take_window();

        Ok(window.map(|(left, right)| (self.left.analyze(&left), self.right.analyze(&right))))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

fn build_capture_stream<T>(
    device: &Device,
    config: &StreamConfig,
    buffer: Arc<Mutex<CaptureBuffer>>,
    playback: Option<Arc<Mutex<PlaybackQueue>>>,
    closed: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
            if let Ok(mut buffer) = buffer.lock() {
                buffer.push_interleaved(&samples, channels);
            }
            if let Some(queue) = &playback {
                if let Ok(mut queue) = queue.lock() {
                    queue.push_interleaved(&samples, channels);
                }
            }
        },
        move |err| {
            log::error!("Audio capture error: {}", err);
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                closed.store(true, Ordering::Relaxed);
            }
        },
        None,
    )?;
    Ok(stream)
}

fn open_playback(
    output_name: &str,
    sample_rate: cpal::SampleRate,
    queue: Arc<Mutex<PlaybackQueue>>,
    volume: SharedVolume,
) -> Result<Stream> {
    let device = find_audio_device(output_name, true)?;
    let supported = device.default_output_config()?;
    let sample_format = supported.sample_format();
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    println!(
        "Passthrough to {}: {} Hz, {} channel(s)",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        config.sample_rate.0,
        config.channels
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_playback_stream::<f32>(&device, &config, queue, volume)?,
        SampleFormat::I16 => build_playback_stream::<i16>(&device, &config, queue, volume)?,
        SampleFormat::U16 => build_playback_stream::<u16>(&device, &config, queue, volume)?,
        other => bail!("Unsupported output sample format: {:?}", other),
    };
    stream.play()?;
    Ok(stream)
}

fn build_playback_stream<T>(
    device: &Device,
    config: &StreamConfig,
    queue: Arc<Mutex<PlaybackQueue>>,
    volume: SharedVolume,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device
        .build_output_stream(
            config,
            move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(out.len(), 0.0);
                match queue.lock() {
                    Ok(mut queue) => queue.fill(&mut scratch, channels, volume.get()),
                    Err(_) => scratch.fill(0.0),
                }
                for (dst, &src) in out.iter_mut().zip(scratch.iter()) {
                    *dst = T::from_sample(src);
                }
            },
            |err| log::error!("Audio playback error: {}", err),
            None,
        )
        .with_context(|| format!("Output device rejected {} Hz", config.sample_rate.0))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(bin: usize, amplitude: f32) -> Vec<f32> {
        (0..FFT_SIZE)
            .map(|n| amplitude * (2.0 * std::f32::consts::PI * bin as f32 * n as f32 / FFT_SIZE as f32).sin())
            .collect()
    }

    #[test]
    fn test_silence_has_empty_spectrum() {
        let mut analyzer = SpectrumAnalyzer::new(512.0);
        let spectrum = analyzer.analyze(&[0.0; FFT_SIZE]);
        assert!(spectrum.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let mut analyzer = SpectrumAnalyzer::new(512.0);
        let spectrum = analyzer.analyze(&sine(40, 0.5));
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by_key(|(_, &v)| v)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 40);
        // Hann-windowed full-scale sine lands near N/4 * gain
        assert!(spectrum[40] > 10_000);
    }

    #[test]
    fn test_capture_buffer_waits_for_a_hop() {
        let mut buffer = CaptureBuffer::new();
        let stereo: Vec<f32> = (0..FFT_SIZE).flat_map(|i| [i as f32, -(i as f32)]).collect();
        buffer.push_interleaved(&stereo, 2);

        let (left, right) = buffer.take_window().unwrap();
        assert_eq!(left.len(), FFT_SIZE);
        assert_eq!(left[5], 5.0);
        assert_eq!(right[5], -5.0);
        assert!(buffer.take_window().is_none());

        let more = vec![1.0; (HOP_SIZE - 1) * 2];
        buffer.push_interleaved(&more, 2);
        assert!(buffer.take_window().is_none());
        buffer.push_interleaved(&[1.0, 1.0], 2);
        assert!(buffer.take_window().is_some());
    }

    #[test]
    fn test_capture_buffer_duplicates_mono() {
        let mut buffer = CaptureBuffer::new();
        buffer.push_interleaved(&vec![0.25; FFT_SIZE], 1);
        let (left, right) = buffer.take_window().unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn test_playback_applies_volume_and_underruns_silently() {
        let mut queue = PlaybackQueue::new(16);
        queue.push_interleaved(&[1.0, -1.0], 2);
        let mut out = [9.0f32; 4];
        queue.fill(&mut out, 2, 0.5);
        assert_eq!(out, [0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_playback_queue_is_bounded() {
        let mut queue = PlaybackQueue::new(4);
        queue.push_interleaved(&vec![0.1; 20], 2);
        assert_eq!(queue.len(), 4);
    }
}
