// Shared types module - Common types used across multiple modules

use anyhow::Result;

// Mode exit reason - used to tell main whether the user quit or the source ran dry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeExitReason {
    UserQuit,      // User pressed 'q' or Ctrl+C
    SourceClosed,  // Audio stream ended or failed
}

/// The single color channel every LED is currently rendered in.
/// Declaration order is the rotation order: Red -> Blue -> Green -> Red.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChannel {
    Red,
    Blue,
    Green,
}

impl ColorChannel {
    pub const ALL: [ColorChannel; 3] = [ColorChannel::Red, ColorChannel::Blue, ColorChannel::Green];

    /// Next value in declaration order, wrapping around
    pub fn next(self) -> Self {
        match self {
            ColorChannel::Red => ColorChannel::Blue,
            ColorChannel::Blue => ColorChannel::Green,
            ColorChannel::Green => ColorChannel::Red,
        }
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % Self::ALL.len()]
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "red" | "r" => Ok(ColorChannel::Red),
            "blue" | "b" => Ok(ColorChannel::Blue),
            "green" | "g" => Ok(ColorChannel::Green),
            other => anyhow::bail!("Invalid color channel: {} (expected red, blue or green)", other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColorChannel::Red => "red",
            ColorChannel::Blue => "blue",
            ColorChannel::Green => "green",
        }
    }

    /// Pixel with `intensity` on this channel and the other two at zero
    pub fn pixel(self, intensity: u16) -> Pixel {
        match self {
            ColorChannel::Red => Pixel::new(intensity, 0, 0),
            ColorChannel::Green => Pixel::new(0, intensity, 0),
            ColorChannel::Blue => Pixel::new(0, 0, intensity),
        }
    }
}

// RGB pixel as written by the renderer. Channels are wider than a byte because
// band values are not clamped before they reach the sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pixel {
    pub r: u16,
    pub g: u16,
    pub b: u16,
}

impl Pixel {
    pub const OFF: Pixel = Pixel { r: 0, g: 0, b: 0 };

    pub fn new(r: u16, g: u16, b: u16) -> Self {
        Pixel { r, g, b }
    }

    /// Wire bytes. Without clamping, values wrap like an 8-bit setPixel argument.
    pub fn to_bytes(self, clamp: bool) -> [u8; 3] {
        if clamp {
            [self.r.min(255) as u8, self.g.min(255) as u8, self.b.min(255) as u8]
        } else {
            [self.r as u8, self.g as u8, self.b as u8]
        }
    }
}
