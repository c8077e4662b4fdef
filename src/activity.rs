// Activity Module - "Music stopped" detection and idle color rotation
use rand::Rng;

use crate::types::ColorChannel;

/// Pick the color that follows `current` after a random draw.
///
/// `draw` indexes the three-color enumeration. When it lands on the current
/// color the next enumeration value is taken instead, so the two alternatives
/// are not equally likely.
pub fn pick_new_color(current: ColorChannel, draw: usize) -> ColorChannel {
    let drawn = ColorChannel::from_index(draw);
    if drawn == current {
        current.next()
    } else {
        drawn
    }
}

/// Draw a new color different from `current`
pub fn rotate_color<R: Rng + ?Sized>(current: ColorChannel, rng: &mut R) -> ColorChannel {
    pick_new_color(current, rng.gen_range(0..ColorChannel::ALL.len()))
}

/// Edge-triggered silence detector. Rotates the color once per silence episode.
#[derive(Debug, Clone, Default)]
pub struct ActivityDetector {
    /// Set once the color has been rotated for the current silence episode
    rotated: bool,
}

impl ActivityDetector {
    pub fn new() -> Self {
        ActivityDetector { rotated: false }
    }

    pub fn rotated_this_episode(&self) -> bool {
        self.rotated
    }

    /// Feed one frame's low-band total. Returns the new color when a rotation happens.
    pub fn observe<R: Rng + ?Sized>(
        &mut self,
        total: u32,
        current: ColorChannel,
        rng: &mut R,
    ) -> Option<ColorChannel> {
        if total == 0 {
            if self.rotated {
                return None;
            }
            self.rotated = true;
            Some(rotate_color(current, rng))
        } else {
            self.rotated = false;
            None
        }
    }
}
