// Multi-device Module - Splits one composite LED frame across WLED devices over DDP
use anyhow::{anyhow, Result};
use ddp_rs::connection::DDPConnection;
use ddp_rs::protocol::{PixelConfig, ID};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Mutex;
use std::time::{Duration, Instant};

// WLED drops out of realtime mode after ~1s without DDP, so resend black frames at least this often
const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(500);

const DDP_PORT: u16 = 4048;

#[derive(Debug, Clone)]
pub struct WledDevice {
    pub ip: String,
    pub led_offset: usize,
    pub led_count: usize,
    pub enabled: bool,
}

impl WledDevice {
    fn byte_range(&self) -> std::ops::Range<usize> {
        self.led_offset * 3..(self.led_offset + self.led_count) * 3
    }
}

pub struct MultiDeviceConfig {
    pub devices: Vec<WledDevice>,
    pub send_parallel: bool,
    pub fail_fast: bool,
}

impl MultiDeviceConfig {
    pub fn validate(&self) -> Result<()> {
        let enabled: Vec<&WledDevice> = self.devices.iter().filter(|d| d.enabled).collect();
        if enabled.is_empty() {
            return Err(anyhow!("No devices configured"));
        }

        for (i, a) in enabled.iter().enumerate() {
            if a.led_count == 0 {
                return Err(anyhow!("Device {} has no LEDs", a.ip));
            }
            for b in enabled.iter().skip(i + 1) {
                let (a_start, a_end) = (a.led_offset, a.led_offset + a.led_count);
                let (b_start, b_end) = (b.led_offset, b.led_offset + b.led_count);
                if a_start < b_end && a_end > b_start {
                    return Err(anyhow!(
                        "Overlapping LED ranges: Device {} ({}-{}) overlaps with Device {} ({}-{})",
                        a.ip,
                        a_start,
                        a_end - 1,
                        b.ip,
                        b_start,
                        b_end - 1
                    ));
                }
            }
        }

        Ok(())
    }

    /// Number of LEDs in the composite frame covered by the enabled devices
    pub fn total_leds(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.led_offset + d.led_count)
            .max()
            .unwrap_or(0)
    }
}

struct DeviceConnection {
    device: WledDevice,
    ddp: Mutex<DDPConnection>,
    last_send: Mutex<Instant>,
}

impl DeviceConnection {
    fn new(device: WledDevice) -> Result<Self> {
        // A full "host:port" address overrides the DDP port
        let dest_addr = if device.ip.parse::<SocketAddr>().is_ok() {
            device.ip.clone()
        } else {
            format!("{}:{}", device.ip, DDP_PORT)
        };
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let ddp = DDPConnection::try_new(&dest_addr, PixelConfig::default(), ID::Default, socket)?;

        Ok(DeviceConnection {
            device,
            ddp: Mutex::new(ddp),
            // Force the first frame out even if it is black
            last_send: Mutex::new(
                Instant::now()
                    .checked_sub(KEEPALIVE_INTERVAL)
                    .unwrap_or_else(Instant::now),
            ),
        })
    }

    /// Send this device's slice of the frame. Returns an error message on failure.
    fn send(&self, frame: &[u8]) -> Option<String> {
        let range = self.device.byte_range();
        if range.end > frame.len() {
            return Some(format!(
                "Device {} range exceeds frame size (device wants LEDs {}-{}, frame has {} LEDs)",
                self.device.ip,
                self.device.led_offset,
                self.device.led_offset + self.device.led_count - 1,
                frame.len() / 3
            ));
        }
        let slice = &frame[range];

        let needs_keepalive = self
            .last_send
            .lock()
            .map(|t| t.elapsed() >= KEEPALIVE_INTERVAL)
            .unwrap_or(false);
        if slice.iter().all(|&b| b == 0) && !needs_keepalive {
            return None;
        }

        let mut conn = match self.ddp.lock() {
            Ok(conn) => conn,
            Err(_) => return Some(format!("Failed to acquire lock for device {}", self.device.ip)),
        };
        match conn.write(slice) {
            Ok(_) => {
                if let Ok(mut last_send) = self.last_send.lock() {
                    *last_send = Instant::now();
                }
                None
            }
            Err(e) => Some(format!("Failed to send to {}: {:?}", self.device.ip, e)),
        }
    }
}

fn scale_brightness(frame: &[u8], brightness: f64) -> Vec<u8> {
    let brightness = brightness.clamp(0.0, 1.0);
    frame.iter().map(|&v| (v as f64 * brightness).round() as u8).collect()
}

pub struct MultiDeviceManager {
    devices: Vec<DeviceConnection>,
    send_parallel: bool,
    fail_fast: bool,
}

impl MultiDeviceManager {
    pub fn new(config: MultiDeviceConfig) -> Result<Self> {
        config.validate()?;

        let mut devices = Vec::new();
        for device in config.devices.iter().filter(|d| d.enabled) {
            match DeviceConnection::new(device.clone()) {
                Ok(conn) => devices.push(conn),
                Err(e) => log::warn!("Failed to connect to {}: {}", device.ip, e),
            }
        }

        if devices.is_empty() {
            return Err(anyhow!("No devices connected successfully"));
        }

        Ok(MultiDeviceManager {
            devices,
            send_parallel: config.send_parallel,
            fail_fast: config.fail_fast,
        })
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Send a composite RGB frame, optionally scaled by a brightness in 0.0-1.0.
    /// Per-device failures are returned as messages unless fail-fast is set.
    pub fn send_frame_with_brightness(&mut self, frame: &[u8], brightness: Option<f64>) -> Result<Vec<String>> {
        if frame.len() % 3 != 0 {
            return Err(anyhow!(
                "Frame size must be divisible by 3 (RGB), got {} bytes",
                frame.len()
            ));
        }

        let scaled: Vec<u8>;
        let frame = match brightness {
            Some(b) if b < 1.0 => {
                scaled = scale_brightness(frame, b);
                &scaled[..]
            }
            _ => frame,
        };

        let errors = if self.send_parallel {
            self.send_parallel(frame)
        } else {
            self.send_sequential(frame)?
        };

        if self.fail_fast && !errors.is_empty() {
            return Err(anyhow!(errors.join("; ")));
        }
        Ok(errors)
    }

    fn send_parallel(&self, frame: &[u8]) -> Vec<String> {
        std::thread::scope(|s| {
            let handles: Vec<_> = self
                .devices
                .iter()
                .map(|device| s.spawn(move || device.send(frame)))
                .collect();

            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap_or_else(|_| Some("Send thread panicked".to_string())))
                .collect()
        })
    }

    fn send_sequential(&self, frame: &[u8]) -> Result<Vec<String>> {
        let mut errors = Vec::new();
        for device in &self.devices {
            if let Some(err) = device.send(frame) {
                if self.fail_fast {
                    return Err(anyhow!(err));
                }
                errors.push(err);
            }
        }
        Ok(errors)
    }
}
