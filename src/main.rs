// discolight - Audio-reactive LED strips for WLED devices
// Captures stereo audio, maps its spectrum onto five strips and drives them over DDP
use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod activity;
mod audio;
mod color;
mod config;
mod controller;
mod midi;
mod multi_device;
mod sink;
mod spectrum;
mod tui;
mod types;
mod volume;

use audio::CaptureSource;
use config::{Args, ButtonSource, LightConfig};
use controller::{ButtonInput, ControllerState};
use midi::MidiButtons;
use multi_device::MultiDeviceManager;
use sink::{DdpSink, LedSink, LEDS_PER_STRIP, STRIP_COUNT};
use tui::{KeyboardButtons, RawMode, StatusSnapshot, StatusView};
use types::{ColorChannel, ModeExitReason, Pixel};
use volume::{ButtonState, SharedVolume, VolumeController};

const STATUS_REDRAW_INTERVAL: Duration = Duration::from_millis(50);
const LED_TEST_HOLD: Duration = Duration::from_millis(400);

/// Volume buttons from whichever source is configured, plus quit keys when
/// the terminal is in raw mode
struct Controls {
    source: ButtonSource,
    keys: Option<KeyboardButtons>,
    midi: Option<MidiButtons>,
}

impl Controls {
    /// Poll the keyboard. Returns true if the user asked to quit.
    fn poll(&mut self) -> Result<bool> {
        match self.keys.as_mut() {
            Some(keys) => {
                keys.poll()?;
                Ok(keys.quit_requested())
            }
            None => Ok(false),
        }
    }
}

impl ButtonInput for Controls {
    fn read(&mut self) -> ButtonState {
        let keys = self.keys.as_mut().map(|k| k.read()).unwrap_or_default();
        match self.source {
            ButtonSource::Keyboard => keys,
            ButtonSource::Midi => self.midi.as_mut().map(|m| m.read()).unwrap_or_default(),
            ButtonSource::None => ButtonState::released(),
        }
    }
}

fn build_sink(config: &LightConfig) -> Result<DdpSink> {
    let md_config = config.multi_device_config();
    for (idx, device) in md_config.devices.iter().enumerate() {
        println!(
            "  Device {}: {} (LEDs {}-{}, {})",
            idx,
            device.ip,
            device.led_offset,
            (device.led_offset + device.led_count).saturating_sub(1),
            if device.enabled { "enabled" } else { "disabled" }
        );
    }
    let total_leds = md_config.total_leds();
    let manager = MultiDeviceManager::new(md_config)?;
    println!("Multi-device manager initialized with {} device(s)", manager.device_count());

    DdpSink::new(
        manager,
        config.strip_offsets,
        total_leds,
        config.clamp_intensity,
        config.global_brightness,
    )
}

/// Turn every LED off and transmit
fn blank_strips<L: LedSink + ?Sized>(leds: &mut L) -> Result<()> {
    for strip in 0..STRIP_COUNT {
        for index in 0..LEDS_PER_STRIP {
            leds.set_pixel(strip, index, Pixel::OFF);
        }
    }
    for strip in 0..STRIP_COUNT {
        leds.show(strip)?;
    }
    Ok(())
}

/// Light one strip at a time in each color so the wiring can be checked
fn run_led_test(config: &LightConfig, running: Arc<AtomicBool>) -> Result<()> {
    let mut sink = build_sink(config)?;
    println!("LED test: each strip lights red, blue, then green. Press Ctrl+C to stop.");

    for strip in 0..STRIP_COUNT {
        for color in ColorChannel::ALL {
            if !running.load(Ordering::SeqCst) {
                println!("LED test stopped.");
                return blank_strips(&mut sink);
            }
            println!("  Strip {} -> {}", strip + 1, color.name());
            for target in 0..STRIP_COUNT {
                let pixel = if target == strip { color.pixel(255) } else { Pixel::OFF };
                for index in 0..LEDS_PER_STRIP {
                    sink.set_pixel(target, index, pixel);
                }
            }
            for target in 0..STRIP_COUNT {
                sink.show(target)?;
            }
            thread::sleep(LED_TEST_HOLD);
        }
    }

    blank_strips(&mut sink)?;
    println!("LED test complete.");
    Ok(())
}

fn run_list_devices() -> Result<()> {
    println!("Audio devices:");
    match audio::list_audio_devices() {
        Ok(devices) => {
            for (name, _) in devices {
                println!("  {}", name);
            }
        }
        Err(e) => println!("  ({})", e),
    }

    println!("\nMIDI input ports:");
    match midi::list_midi_ports() {
        Ok(ports) if ports.is_empty() => println!("  (none)"),
        Ok(ports) => {
            for (idx, port) in ports.iter().enumerate() {
                println!("  {}: {}", idx, port);
            }
        }
        Err(e) => println!("  ({})", e),
    }
    Ok(())
}

fn run_live_mode(config: &LightConfig, running: Arc<AtomicBool>) -> Result<ModeExitReason> {
    let color = config.color()?;
    let button_source = config.buttons()?;

    let mut sink = build_sink(config)?;
    blank_strips(&mut sink)?;

    let mut volume_out = SharedVolume::new(config.initial_volume);
    let passthrough = if config.passthrough {
        Some((config.output_device.as_str(), volume_out.clone()))
    } else {
        None
    };
    let mut capture = CaptureSource::open(&config.audio_device, config.fft_gain, passthrough)?;

    let midi = match button_source {
        ButtonSource::Midi => Some(MidiButtons::connect(
            &config.midi_device,
            config.midi_volume_up_note,
            config.midi_volume_down_note,
        )?),
        _ => None,
    };

    // Key presses only arrive in raw mode, which also swallows Ctrl+C as a key
    let raw_mode = if config.tui || button_source == ButtonSource::Keyboard {
        Some(RawMode::enable()?)
    } else {
        None
    };
    let mut controls = Controls {
        source: button_source,
        keys: raw_mode.as_ref().map(|_| KeyboardButtons::new()),
        midi,
    };

    let mut view = if config.tui { Some(StatusView::open()?) } else { None };

    let mut state = ControllerState::new(
        color,
        VolumeController::new(config.initial_volume, config.volume_step, config.clamp_volume),
    );

    let mut status = StatusSnapshot {
        bands: None,
        color,
        volume: state.volume.volume(),
        volume_held: false,
        rotated_this_silence: false,
        frames: 0,
        rotations: 0,
        frame_rate: 0.0,
        source_label: if config.audio_device.is_empty() {
            "default input".to_string()
        } else {
            config.audio_device.clone()
        },
        sink_label: format!("{} device(s)", config.wled_devices.iter().filter(|d| d.enabled).count()),
    };
    let mut last_redraw = Instant::now();
    let mut rate_window = (Instant::now(), 0u64);

    if view.is_none() {
        log::info!("Running; starting color {}, volume {:.2}", color.name(), status.volume);
    }

    let result = state.run(
        &mut capture,
        &mut controls,
        &mut volume_out,
        &mut sink,
        config.fps_limit,
        |controls, state, report| {
            if !running.load(Ordering::SeqCst) || controls.poll()? {
                return Ok(Some(ModeExitReason::UserQuit));
            }

            if let Some(report) = report {
                status.frames += 1;
                if report.rotated {
                    status.rotations += 1;
                }
                status.bands = Some(report.bands.clone());
            }
            status.color = state.color;
            status.volume = state.volume.volume();
            status.volume_held = state.volume.is_latched();
            status.rotated_this_silence = state.activity.rotated_this_episode();

            let window_elapsed = rate_window.0.elapsed();
            if window_elapsed >= Duration::from_secs(1) {
                status.frame_rate = (status.frames - rate_window.1) as f64 / window_elapsed.as_secs_f64();
                rate_window = (Instant::now(), status.frames);
            }

            if let Some(view) = view.as_mut() {
                if last_redraw.elapsed() >= STATUS_REDRAW_INTERVAL {
                    view.draw(&status)?;
                    last_redraw = Instant::now();
                }
            }
            Ok(None)
        },
    );

    if let Some(view) = view.take() {
        view.close()?;
    }
    drop(raw_mode);

    blank_strips(&mut sink)?;
    result
}

/// Merge CLI overrides and check the result before anything is persisted.
/// Returns true if any override was given.
fn apply_overrides(config: &mut LightConfig, args: &Args) -> Result<bool> {
    let args_provided = config.merge_with_args(args);
    config.sanitize();
    config.validate()?;
    Ok(args_provided)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let cfg_arg = args.cfg.as_deref();
    let config_path = LightConfig::config_path(cfg_arg)?;
    let config_file_exists = config_path.exists();

    let mut config = if config_file_exists {
        match LightConfig::load_with_path(cfg_arg) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("\nFailed to load config file: {}", e);
                eprintln!("Config file: {}", config_path.display());
                eprintln!("\nPlease fix the config file or delete it to regenerate with defaults.");
                return Err(e);
            }
        }
    } else {
        let mut default_config = LightConfig::default();
        default_config.config_path = Some(config_path.clone());
        default_config
    };

    let args_provided = apply_overrides(&mut config, &args)?;

    // Create the file on first run, and persist CLI choices
    if !config_file_exists || args_provided {
        config.save()?;
    }

    // -q only affects this run
    if args.quiet {
        config.tui = false;
    }

    let live = !args.list_devices && !args.led_test;
    let default_filter = if live && config.tui { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if args.list_devices {
        return run_list_devices();
    }

    println!("Using config file: {}", config_path.display());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    if args.led_test {
        return run_led_test(&config, running);
    }

    match run_live_mode(&config, running)? {
        ModeExitReason::UserQuit => println!("\nStopped."),
        ModeExitReason::SourceClosed => println!("\nAudio source closed."),
    }
    Ok(())
}
