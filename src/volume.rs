// Volume Module - Discrete volume buttons with a release latch
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Raw button levels for one control-loop iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonState {
    pub increase: bool,
    pub decrease: bool,
}

impl ButtonState {
    pub fn released() -> Self {
        ButtonState::default()
    }
}

/// Output stage that receives the volume scalar every frame
pub trait VolumeSink {
    fn set_volume(&mut self, volume: f32);
}

/// Volume shared with the audio playback callback as f32 bits
#[derive(Clone, Debug)]
pub struct SharedVolume {
    bits: Arc<AtomicU32>,
}

impl SharedVolume {
    pub fn new(volume: f32) -> Self {
        SharedVolume {
            bits: Arc::new(AtomicU32::new(volume.to_bits())),
        }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl VolumeSink for SharedVolume {
    fn set_volume(&mut self, volume: f32) {
        self.bits.store(volume.to_bits(), Ordering::Relaxed);
    }
}

pub struct VolumeController {
    volume: f32,
    step: f32,
    clamp: bool,
    /// Ignore presses until both buttons read released
    latched: bool,
}

impl VolumeController {
    pub fn new(initial: f32, step: f32, clamp: bool) -> Self {
        let volume = if clamp { initial.clamp(0.0, 1.0) } else { initial };
        VolumeController {
            volume,
            step,
            clamp,
            latched: false,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Apply one frame of button input and return the resulting volume.
    ///
    /// Increase and decrease are checked one after the other, so pressing both
    /// on the same unlatched frame applies both steps.
    pub fn update(&mut self, buttons: ButtonState) -> f32 {
        if !buttons.increase && !buttons.decrease {
            self.latched = false;
        }

        if !self.latched {
            if buttons.increase {
                self.volume += self.step;
                self.latched = true;
            }
            if buttons.decrease {
                self.volume -= self.step;
                self.latched = true;
            }
            if self.clamp {
                self.volume = self.volume.clamp(0.0, 1.0);
            }
        }

        self.volume
    }
}
