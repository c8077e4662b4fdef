// Controller Module - Per-frame control step tying spectrum, LEDs and volume together
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::thread;
use std::time::{Duration, Instant};

use crate::activity::ActivityDetector;
use crate::color::render_bands;
use crate::sink::{LedSink, STRIP_COUNT};
use crate::spectrum::{average_channels, map_bands, Bands, Spectrum};
use crate::types::{ColorChannel, ModeExitReason};
use crate::volume::{ButtonState, VolumeController, VolumeSink};

/// Produces left/right magnitude spectra when a new analysis frame is ready
pub trait SpectrumSource {
    /// `None` means no fresh frame yet; the caller must not re-render.
    fn poll_frame(&mut self) -> Result<Option<(Spectrum, Spectrum)>>;

    /// True once no further frames will ever arrive
    fn is_closed(&self) -> bool {
        false
    }
}

/// Raw volume button levels, polled once per loop iteration
pub trait ButtonInput {
    fn read(&mut self) -> ButtonState;
}

/// What happened during one rendered frame
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub bands: Bands,
    pub total: u32,
    pub color: ColorChannel,
    pub rotated: bool,
}

/// All state owned by the control loop, from startup to shutdown
pub struct ControllerState<R: Rng = StdRng> {
    pub color: ColorChannel,
    pub activity: ActivityDetector,
    pub volume: VolumeController,
    rng: R,
}

impl ControllerState<StdRng> {
    pub fn new(color: ColorChannel, volume: VolumeController) -> Self {
        Self::with_rng(color, volume, StdRng::from_entropy())
    }
}

impl<R: Rng> ControllerState<R> {
    pub fn with_rng(color: ColorChannel, volume: VolumeController, rng: R) -> Self {
        ControllerState {
            color,
            activity: ActivityDetector::new(),
            volume,
            rng,
        }
    }

    /// One control-loop iteration.
    ///
    /// The volume is updated and written out every call. Bands are only mapped,
    /// rendered and flushed when the source has a fresh frame. A rotation picked
    /// here takes effect on the next rendered frame.
    pub fn step<S, B, V, L>(
        &mut self,
        source: &mut S,
        buttons: &mut B,
        volume_out: &mut V,
        leds: &mut L,
    ) -> Result<Option<FrameReport>>
    where
        S: SpectrumSource + ?Sized,
        B: ButtonInput + ?Sized,
        V: VolumeSink + ?Sized,
        L: LedSink + ?Sized,
    {
        let previous = self.volume.volume();
        let volume = self.volume.update(buttons.read());
        if volume != previous {
            log::debug!("Volume {:.2} -> {:.2}", previous, volume);
        }
        volume_out.set_volume(volume);

        let (left, right) = match source.poll_frame()? {
            Some(frame) => frame,
            None => return Ok(None),
        };

        let avg = average_channels(&left, &right);
        let bands = map_bands(&avg);
        let rendered_color = self.color;
        render_bands(&bands, rendered_color, leds);

        let total = bands.low_total();
        let rotated = match self.activity.observe(total, self.color, &mut self.rng) {
            Some(next) => {
                log::info!("Silence detected, switching color {} -> {}", self.color.name(), next.name());
                self.color = next;
                true
            }
            None => false,
        };

        for strip in 0..STRIP_COUNT {
            leds.show(strip)?;
        }

        Ok(Some(FrameReport {
            bands,
            total,
            color: rendered_color,
            rotated,
        }))
    }

    /// Run `step` until the source closes or `after_step` returns an exit reason.
    ///
    /// Iterations are paced to at most `fps_limit` per second; a limit of zero
    /// polls as fast as possible. `after_step` sees the button input so it can
    /// poll event sources that feed it.
    pub fn run<S, B, V, L, F>(
        &mut self,
        source: &mut S,
        buttons: &mut B,
        volume_out: &mut V,
        leds: &mut L,
        fps_limit: f64,
        mut after_step: F,
    ) -> Result<ModeExitReason>
    where
        S: SpectrumSource + ?Sized,
        B: ButtonInput + ?Sized,
        V: VolumeSink + ?Sized,
        L: LedSink + ?Sized,
        F: FnMut(&mut B, &Self, Option<&FrameReport>) -> Result<Option<ModeExitReason>>,
    {
        let frame_duration = if fps_limit > 0.0 {
            Some(Duration::from_secs_f64(1.0 / fps_limit))
        } else {
            None
        };

        loop {
            let loop_start = Instant::now();

            let report = self.step(source, buttons, volume_out, leds)?;
            if let Some(reason) = after_step(buttons, self, report.as_ref())? {
                return Ok(reason);
            }
            if report.is_none() && source.is_closed() {
                return Ok(ModeExitReason::SourceClosed);
            }

            if let Some(frame_duration) = frame_duration {
                let elapsed = loop_start.elapsed();
                if elapsed < frame_duration {
                    thread::sleep(frame_duration - elapsed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::HIGH_STRIPS;
    use crate::sink::StripBuffers;
    use crate::spectrum::{HIGH_BAND_START, HIGH_BAND_WIDTH, SPECTRUM_BINS};
    use crate::types::Pixel;
    use std::collections::VecDeque;

    struct ScriptedSource {
        frames: VecDeque<Option<(Spectrum, Spectrum)>>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Option<Spectrum>>) -> Self {
            ScriptedSource {
                frames: frames.into_iter().map(|f| f.map(|s| (s, s))).collect(),
            }
        }
    }

    impl SpectrumSource for ScriptedSource {
        fn poll_frame(&mut self) -> Result<Option<(Spectrum, Spectrum)>> {
            Ok(self.frames.pop_front().flatten())
        }

        fn is_closed(&self) -> bool {
            self.frames.is_empty()
        }
    }

    struct ScriptedButtons(VecDeque<ButtonState>);

    impl ButtonInput for ScriptedButtons {
        fn read(&mut self) -> ButtonState {
            self.0.pop_front().unwrap_or_default()
        }
    }

    #[derive(Default)]
    struct RecordedVolume(Vec<f32>);

    impl VolumeSink for RecordedVolume {
        fn set_volume(&mut self, volume: f32) {
            self.0.push(volume);
        }
    }

    fn state(color: ColorChannel) -> ControllerState<StdRng> {
        ControllerState::with_rng(color, VolumeController::new(0.60, 0.01, false), StdRng::seed_from_u64(3))
    }

    fn loud() -> Spectrum {
        [1600u16; SPECTRUM_BINS]
    }

    #[test]
    fn test_silence_after_sound_rotates_once() {
        let mut state = state(ColorChannel::Red);
        let mut source = ScriptedSource::new(vec![Some(loud()), Some([0; SPECTRUM_BINS]), Some([0; SPECTRUM_BINS])]);
        let mut buttons = ScriptedButtons(VecDeque::new());
        let mut volume = RecordedVolume::default();
        let mut leds = StripBuffers::new();

        let first = state.step(&mut source, &mut buttons, &mut volume, &mut leds).unwrap().unwrap();
        assert!(!first.rotated);
        assert_eq!(state.color, ColorChannel::Red);

        let second = state.step(&mut source, &mut buttons, &mut volume, &mut leds).unwrap().unwrap();
        assert_eq!(second.total, 0);
        assert!(second.bands.high.iter().all(|&v| v == 0));
        assert!(second.rotated);
        assert_ne!(state.color, ColorChannel::Red);

        let color_after = state.color;
        let third = state.step(&mut source, &mut buttons, &mut volume, &mut leds).unwrap().unwrap();
        assert!(!third.rotated);
        assert_eq!(state.color, color_after);
    }

    #[test]
    fn test_rotation_applies_to_next_frame() {
        let mut state = state(ColorChannel::Red);
        let mut source = ScriptedSource::new(vec![Some([0; SPECTRUM_BINS]), Some(loud())]);
        let mut buttons = ScriptedButtons(VecDeque::new());
        let mut volume = RecordedVolume::default();
        let mut leds = StripBuffers::new();

        let silent = state.step(&mut source, &mut buttons, &mut volume, &mut leds).unwrap().unwrap();
        assert_eq!(silent.color, ColorChannel::Red);
        let new_color = state.color;

        let next = state.step(&mut source, &mut buttons, &mut volume, &mut leds).unwrap().unwrap();
        assert_eq!(next.color, new_color);
        assert_eq!(leds.pixels(0)[0], new_color.pixel(next.bands.low[0]));
    }

    #[test]
    fn test_high_strips_get_unclamped_values() {
        let mut avg = [0u16; SPECTRUM_BINS];
        for v in &mut avg[HIGH_BAND_START..HIGH_BAND_START + HIGH_BAND_WIDTH] {
            *v = 4096;
        }
        let mut state = state(ColorChannel::Red);
        let mut source = ScriptedSource::new(vec![Some(avg)]);
        let mut buttons = ScriptedButtons(VecDeque::new());
        let mut volume = RecordedVolume::default();
        let mut leds = StripBuffers::new();

        let report = state.step(&mut source, &mut buttons, &mut volume, &mut leds).unwrap().unwrap();
        assert_eq!(report.bands.high, [256u16; HIGH_BAND_WIDTH]);
        for &strip in HIGH_STRIPS.iter() {
            assert!(leds.pixels(strip).iter().all(|&p| p == Pixel::new(256, 0, 0)));
        }
    }

    #[test]
    fn test_no_fresh_frame_skips_render_but_updates_volume() {
        let mut state = state(ColorChannel::Red);
        let mut source = ScriptedSource::new(vec![None, None, Some(loud())]);
        let mut buttons = ScriptedButtons(VecDeque::from(vec![
            ButtonState { increase: true, decrease: false },
            ButtonState { increase: true, decrease: false },
            ButtonState { increase: true, decrease: false },
        ]));
        let mut volume = RecordedVolume::default();
        let mut leds = StripBuffers::new();

        assert!(state.step(&mut source, &mut buttons, &mut volume, &mut leds).unwrap().is_none());
        assert!(state.step(&mut source, &mut buttons, &mut volume, &mut leds).unwrap().is_none());
        assert_eq!(leds.show_count(0), 0);

        assert!(state.step(&mut source, &mut buttons, &mut volume, &mut leds).unwrap().is_some());
        for strip in 0..STRIP_COUNT {
            assert_eq!(leds.show_count(strip), 1);
        }

        assert_eq!(volume.0.len(), 3);
        for v in volume.0 {
            assert!((v - 0.61).abs() < 1e-6);
        }
    }

    #[test]
    fn test_run_stops_when_source_closes() {
        let mut state = state(ColorChannel::Red);
        let mut source = ScriptedSource::new(vec![Some(loud()), None, Some([0; SPECTRUM_BINS])]);
        let mut buttons = ScriptedButtons(VecDeque::new());
        let mut volume = RecordedVolume::default();
        let mut leds = StripBuffers::new();
        let mut rendered = 0;

        let reason = state
            .run(&mut source, &mut buttons, &mut volume, &mut leds, 0.0, |_, _, report| {
                if report.is_some() {
                    rendered += 1;
                }
                Ok(None)
            })
            .unwrap();

        assert_eq!(reason, ModeExitReason::SourceClosed);
        assert_eq!(rendered, 2);
        assert_eq!(volume.0.len(), 4);
        assert_ne!(state.color, ColorChannel::Red);
    }

    #[test]
    fn test_run_stops_on_hook_request() {
        let mut state = state(ColorChannel::Blue);
        let mut source = ScriptedSource::new(vec![Some(loud()); 10]);
        let mut buttons = ScriptedButtons(VecDeque::new());
        let mut volume = RecordedVolume::default();
        let mut leds = StripBuffers::new();

        let reason = state
            .run(&mut source, &mut buttons, &mut volume, &mut leds, 0.0, |_, _, _| {
                Ok(Some(ModeExitReason::UserQuit))
            })
            .unwrap();

        assert_eq!(reason, ModeExitReason::UserQuit);
        assert_eq!(leds.show_count(0), 1);
    }
}
