// Config Module - Configuration management and command-line argument parsing
use anyhow::{anyhow, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::multi_device::{MultiDeviceConfig, WledDevice};
use crate::sink::{check_strip_layout, LEDS_PER_STRIP, STRIP_COUNT};
use crate::types::ColorChannel;

const CONFIG_DIR: &str = "discolight";

#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Audio-reactive LED strips driven over DDP",
    long_about = "Captures stereo audio, maps its spectrum onto five 25-LED strips on WLED devices,\n\
                  and rotates the strip color whenever the music stops.\n\
                  Strips 3 and 4 show a direct slice of the upper spectrum; strips 1, 2 and 5 show\n\
                  the whole spectrum folded 4:1. Volume buttons come from the keyboard (+/-) or MIDI notes."
)]
pub struct Args {
    /// Audio capture device (substring match; empty = default input)
    #[arg(short, long)]
    pub audio_device: Option<String>,

    /// WLED device address (replaces the first configured device)
    #[arg(short, long)]
    pub wled_ip: Option<String>,

    /// Play the captured audio back through the output device
    #[arg(short, long)]
    pub passthrough: Option<bool>,

    /// Starting volume
    #[arg(short, long)]
    pub volume: Option<f32>,

    /// Starting color (red, blue, green)
    #[arg(short, long)]
    pub color: Option<String>,

    /// Volume button source (keyboard, midi, none)
    #[arg(short, long)]
    pub buttons: Option<String>,

    /// MIDI device name for volume buttons
    #[arg(long)]
    pub midi_device: Option<String>,

    /// Upper bound on control-loop iterations per second
    #[arg(long)]
    pub fps: Option<f64>,

    /// Disable the terminal status view
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// List audio devices and MIDI ports, then exit
    #[arg(long)]
    pub list_devices: bool,

    /// Cycle every strip through each color, then exit
    #[arg(long)]
    pub led_test: bool,

    /// Config file path or name (e.g., --cfg /full/path or --cfg party for ~/.config/discolight/party.conf)
    #[arg(long)]
    pub cfg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WledDeviceConfig {
    pub ip: String,
    pub led_offset: usize,
    pub led_count: usize,
    pub enabled: bool,
}

/// Where the volume buttons are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonSource {
    Keyboard,
    Midi,
    None,
}

impl ButtonSource {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "keyboard" | "keys" => Ok(ButtonSource::Keyboard),
            "midi" => Ok(ButtonSource::Midi),
            "none" | "" => Ok(ButtonSource::None),
            other => Err(anyhow!("Invalid button source: {} (expected keyboard, midi or none)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    pub audio_device: String,  // Capture device (empty = default input)
    pub passthrough: bool,  // Play captured audio on the output device
    pub output_device: String,  // Playback device (empty = default output)
    pub fft_gain: f32,  // Scales FFT magnitudes of -1.0..1.0 samples into integer bins
    pub initial_volume: f32,
    pub volume_step: f32,  // Change per button press
    pub clamp_volume: bool,  // Keep volume in 0.0-1.0 (off = unbounded)
    pub clamp_intensity: bool,  // Saturate LED bytes at 255 (off = wrap like an 8-bit write)
    pub initial_color: String,  // red, blue or green
    pub button_source: String,  // keyboard, midi or none
    pub midi_device: String,
    pub midi_volume_up_note: u8,
    pub midi_volume_down_note: u8,
    pub fps_limit: f64,  // Max loop iterations per second (0 = spin)
    pub global_brightness: f64,  // Multiplier applied on the wire (0.0 to 1.0)
    pub wled_devices: Vec<WledDeviceConfig>,
    pub strip_offsets: [usize; STRIP_COUNT],  // First LED of each strip in the composite frame
    pub multi_device_send_parallel: bool,
    pub multi_device_fail_fast: bool,
    pub tui: bool,
}

impl Default for LightConfig {
    fn default() -> Self {
        LightConfig {
            config_path: None,
            audio_device: "".to_string(),
            passthrough: false,
            output_device: "".to_string(),
            fft_gain: 512.0,
            initial_volume: 0.60,
            volume_step: 0.01,
            clamp_volume: false,
            clamp_intensity: false,
            initial_color: "red".to_string(),
            button_source: "keyboard".to_string(),
            midi_device: "".to_string(),
            midi_volume_up_note: 62,  // D4
            midi_volume_down_note: 60,  // C4
            fps_limit: 200.0,
            global_brightness: 1.0,
            wled_devices: vec![WledDeviceConfig {
                ip: "led.local".to_string(),
                led_offset: 0,
                led_count: STRIP_COUNT * LEDS_PER_STRIP,
                enabled: true,
            }],
            strip_offsets: [0, 25, 50, 75, 100],
            multi_device_send_parallel: true,
            multi_device_fail_fast: false,
            tui: true,
        }
    }
}

impl LightConfig {
    /// Apply command-line overrides. Returns true if any were given.
    pub fn merge_with_args(&mut self, args: &Args) -> bool {
        let mut args_provided = false;

        if let Some(ref device) = args.audio_device {
            self.audio_device = device.clone();
            args_provided = true;
        }

        if let Some(ref ip) = args.wled_ip {
            match self.wled_devices.first_mut() {
                Some(first) => first.ip = ip.clone(),
                None => self.wled_devices.push(WledDeviceConfig {
                    ip: ip.clone(),
                    led_offset: 0,
                    led_count: STRIP_COUNT * LEDS_PER_STRIP,
                    enabled: true,
                }),
            }
            args_provided = true;
        }

        if let Some(passthrough) = args.passthrough {
            self.passthrough = passthrough;
            args_provided = true;
        }

        if let Some(volume) = args.volume {
            self.initial_volume = volume;
            args_provided = true;
        }

        if let Some(ref color) = args.color {
            self.initial_color = color.clone();
            args_provided = true;
        }

        if let Some(ref buttons) = args.buttons {
            self.button_source = buttons.clone();
            args_provided = true;
        }

        if let Some(ref midi_device) = args.midi_device {
            self.midi_device = midi_device.clone();
            args_provided = true;
        }

        if let Some(fps) = args.fps {
            self.fps_limit = fps;
            args_provided = true;
        }

        args_provided
    }

    pub fn config_path(cfg_arg: Option<&str>) -> Result<PathBuf> {
        if let Some(cfg) = cfg_arg {
            let path = PathBuf::from(cfg);
            if path.is_absolute() || cfg.contains('/') || cfg.contains('\\') {
                return Ok(path);
            }

            let config_dir = Self::config_dir()?;
            let filename = if cfg.ends_with(".conf") {
                cfg.to_string()
            } else {
                format!("{}.conf", cfg)
            };
            Ok(config_dir.join(filename))
        } else {
            Ok(Self::config_dir()?.join("config.conf"))
        }
    }

    fn config_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")?;
        let config_dir = PathBuf::from(home).join(".config").join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn load_with_path(cfg_arg: Option<&str>) -> Result<Self> {
        let path = Self::config_path(cfg_arg)?;
        let contents = std::fs::read_to_string(&path)?;
        let mut parsed = Self::from_toml(&contents)?;
        parsed.config_path = Some(path);
        Ok(parsed)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut parsed: Self = toml::from_str(contents)?;
        parsed.sanitize();
        Ok(parsed)
    }

    /// Trim strings and clamp numeric values to workable ranges
    pub fn sanitize(&mut self) {
        self.audio_device = self.audio_device.trim().to_string();
        self.output_device = self.output_device.trim().to_string();
        self.midi_device = self.midi_device.trim().to_string();
        self.initial_color = self.initial_color.trim().to_lowercase();
        self.button_source = self.button_source.trim().to_lowercase();
        for device in self.wled_devices.iter_mut() {
            device.ip = device.ip.trim().to_string();
        }

        self.fft_gain = self.fft_gain.clamp(0.0, 1_000_000.0);
        self.volume_step = self.volume_step.clamp(0.0, 1.0);
        self.midi_volume_up_note = self.midi_volume_up_note.min(127);
        self.midi_volume_down_note = self.midi_volume_down_note.min(127);
        self.fps_limit = self.fps_limit.clamp(0.0, 10_000.0);
        self.global_brightness = self.global_brightness.clamp(0.0, 1.0);
        if self.clamp_volume {
            self.initial_volume = self.initial_volume.clamp(0.0, 1.0);
        }
    }

    /// Check the values that cannot be fixed up by `sanitize`
    pub fn validate(&self) -> Result<()> {
        ColorChannel::parse(&self.initial_color)?;
        ButtonSource::parse(&self.button_source)?;
        if !self.initial_volume.is_finite() {
            return Err(anyhow!("initial_volume must be a finite number"));
        }
        check_strip_layout(&self.strip_offsets, self.multi_device_config().total_leds())
    }

    pub fn color(&self) -> Result<ColorChannel> {
        ColorChannel::parse(&self.initial_color)
    }

    pub fn buttons(&self) -> Result<ButtonSource> {
        ButtonSource::parse(&self.button_source)
    }

    pub fn multi_device_config(&self) -> MultiDeviceConfig {
        MultiDeviceConfig {
            devices: self
                .wled_devices
                .iter()
                .map(|d| WledDevice {
                    ip: d.ip.clone(),
                    led_offset: d.led_offset,
                    led_count: d.led_count,
                    enabled: d.enabled,
                })
                .collect(),
            send_parallel: self.multi_device_send_parallel,
            fail_fast: self.multi_device_fail_fast,
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn save(&self) -> Result<()> {
        let path = match &self.config_path {
            Some(path) => path.clone(),
            None => Self::config_path(None)?,
        };

        let mut sanitized = self.clone();
        sanitized.sanitize();

        let contents = format!(
            "# discolight configuration\n\
             # Strips 3/4 show bins 29-53; strips 1/2/5 show all 128 bins folded 4:1.\n\
             # strip_offsets place each 25-LED strip inside the frame covered by wled_devices.\n\n{}",
            toml::to_string_pretty(&sanitized)?
        );
        std::fs::write(&path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_survive_toml_round_trip() {
        let config = LightConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = LightConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let parsed = LightConfig::from_toml("initial_volume = 0.4\npassthrough = true\n").unwrap();
        assert_eq!(parsed.initial_volume, 0.4);
        assert!(parsed.passthrough);
        assert_eq!(parsed.volume_step, 0.01);
        assert_eq!(parsed.strip_offsets, [0, 25, 50, 75, 100]);
    }

    #[test]
    fn test_sanitize_clamps_and_trims() {
        let parsed = LightConfig::from_toml(
            "initial_color = \"  GREEN \"\nglobal_brightness = 4.0\nvolume_step = -1.0\n",
        )
        .unwrap();
        assert_eq!(parsed.initial_color, "green");
        assert_eq!(parsed.global_brightness, 1.0);
        assert_eq!(parsed.volume_step, 0.0);
        assert_eq!(parsed.color().unwrap(), ColorChannel::Green);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = LightConfig::default();
        config.initial_color = "purple".to_string();
        assert!(config.validate().is_err());

        let mut config = LightConfig::default();
        config.button_source = "pedal".to_string();
        assert!(config.validate().is_err());

        let mut config = LightConfig::default();
        config.strip_offsets[4] = 110;
        assert!(config.validate().is_err());

        let mut config = LightConfig::default();
        config.strip_offsets = [0; STRIP_COUNT];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_with_args() {
        let mut config = LightConfig::default();
        assert!(!config.merge_with_args(&Args::default()));

        let args = Args {
            wled_ip: Some("10.0.0.7".to_string()),
            volume: Some(0.3),
            color: Some("blue".to_string()),
            ..Args::default()
        };
        assert!(config.merge_with_args(&args));
        assert_eq!(config.wled_devices[0].ip, "10.0.0.7");
        assert_eq!(config.initial_volume, 0.3);
        assert_eq!(config.color().unwrap(), ColorChannel::Blue);
        assert!(config.tui);
    }

    #[test]
    fn test_button_source_parse() {
        assert_eq!(ButtonSource::parse("MIDI").unwrap(), ButtonSource::Midi);
        assert_eq!(ButtonSource::parse("").unwrap(), ButtonSource::None);
        assert!(ButtonSource::parse("foot").is_err());
    }
}
