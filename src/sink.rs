// Sink Module - Pixel buffers for the five physical strips and their DDP output
use anyhow::{anyhow, Result};

use crate::multi_device::MultiDeviceManager;
use crate::types::Pixel;

/// Number of physical strips
pub const STRIP_COUNT: usize = 5;
/// Pixels on each physical strip
pub const LEDS_PER_STRIP: usize = 25;

/// Anything that can accept per-strip pixel writes and transmit a strip.
pub trait LedSink {
    /// Set one pixel. Writes past the end of the strip are ignored.
    fn set_pixel(&mut self, strip: usize, index: usize, pixel: Pixel);

    /// Transmit the strip's current contents.
    fn show(&mut self, strip: usize) -> Result<()>;
}

/// Check that every strip fits inside a `total_leds` frame and that no two
/// strips share an LED
pub fn check_strip_layout(strip_offsets: &[usize; STRIP_COUNT], total_leds: usize) -> Result<()> {
    for (strip, &offset) in strip_offsets.iter().enumerate() {
        if offset + LEDS_PER_STRIP > total_leds {
            return Err(anyhow!(
                "Strip {} (LEDs {}-{}) does not fit in a {}-LED frame",
                strip + 1,
                offset,
                offset + LEDS_PER_STRIP - 1,
                total_leds
            ));
        }
        for (other, &other_offset) in strip_offsets.iter().enumerate().skip(strip + 1) {
            if offset < other_offset + LEDS_PER_STRIP && other_offset < offset + LEDS_PER_STRIP {
                return Err(anyhow!(
                    "Overlapping strips: Strip {} (LEDs {}-{}) overlaps with Strip {} (LEDs {}-{})",
                    strip + 1,
                    offset,
                    offset + LEDS_PER_STRIP - 1,
                    other + 1,
                    other_offset,
                    other_offset + LEDS_PER_STRIP - 1
                ));
            }
        }
    }
    Ok(())
}

/// In-memory pixel buffers, one per strip
#[derive(Debug, Clone)]
pub struct StripBuffers {
    strips: [[Pixel; LEDS_PER_STRIP]; STRIP_COUNT],
    show_counts: [u64; STRIP_COUNT],
}

impl StripBuffers {
    pub fn new() -> Self {
        StripBuffers {
            strips: [[Pixel::OFF; LEDS_PER_STRIP]; STRIP_COUNT],
            show_counts: [0; STRIP_COUNT],
        }
    }

    pub fn pixels(&self, strip: usize) -> &[Pixel] {
        &self.strips[strip]
    }

    /// How many times `show` has been called for a strip
    #[cfg(test)]
    pub fn show_count(&self, strip: usize) -> u64 {
        self.show_counts[strip]
    }
}

impl Default for StripBuffers {
    fn default() -> Self {
        Self::new()
    }
}

impl LedSink for StripBuffers {
    fn set_pixel(&mut self, strip: usize, index: usize, pixel: Pixel) {
        if let Some(slot) = self.strips.get_mut(strip).and_then(|s| s.get_mut(index)) {
            *slot = pixel;
        }
    }

    fn show(&mut self, strip: usize) -> Result<()> {
        let count = self
            .show_counts
            .get_mut(strip)
            .ok_or_else(|| anyhow!("No such strip: {}", strip))?;
        *count += 1;
        Ok(())
    }
}

/// Strips placed into one composite LED frame and sent to WLED over DDP.
///
/// Each strip occupies `LEDS_PER_STRIP` LEDs starting at its offset in the
/// composite frame. The frame is transmitted once every strip has been shown
/// since the previous transmission.
pub struct DdpSink {
    buffers: StripBuffers,
    strip_offsets: [usize; STRIP_COUNT],
    frame: Vec<u8>,
    shown: [bool; STRIP_COUNT],
    manager: MultiDeviceManager,
    clamp_intensity: bool,
    brightness: f64,
}

impl DdpSink {
    pub fn new(
        manager: MultiDeviceManager,
        strip_offsets: [usize; STRIP_COUNT],
        total_leds: usize,
        clamp_intensity: bool,
        brightness: f64,
    ) -> Result<Self> {
        check_strip_layout(&strip_offsets, total_leds)?;

        Ok(DdpSink {
            buffers: StripBuffers::new(),
            strip_offsets,
            frame: vec![0; total_leds * 3],
            shown: [false; STRIP_COUNT],
            manager,
            clamp_intensity,
            brightness,
        })
    }

    fn encode_strip(&mut self, strip: usize) {
        let start = self.strip_offsets[strip] * 3;
        for (i, pixel) in self.buffers.pixels(strip).iter().enumerate() {
            let bytes = pixel.to_bytes(self.clamp_intensity);
            self.frame[start + i * 3..start + i * 3 + 3].copy_from_slice(&bytes);
        }
    }
}

impl LedSink for DdpSink {
    fn set_pixel(&mut self, strip: usize, index: usize, pixel: Pixel) {
        self.buffers.set_pixel(strip, index, pixel);
    }

    fn show(&mut self, strip: usize) -> Result<()> {
        self.buffers.show(strip)?;
        self.encode_strip(strip);
        self.shown[strip] = true;

        if self.shown.iter().all(|&s| s) {
            self.shown = [false; STRIP_COUNT];
            let brightness = if self.brightness < 1.0 { Some(self.brightness) } else { None };
            let errors = self.manager.send_frame_with_brightness(&self.frame, brightness)?;
            for err in errors {
                log::warn!("{}", err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multi_device::{MultiDeviceConfig, WledDevice};
    use std::net::UdpSocket;
    use std::time::Duration;

    const TOTAL_LEDS: usize = STRIP_COUNT * LEDS_PER_STRIP;

    /// Local UDP socket standing in for a WLED device
    fn fake_wled() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(150))).unwrap();
        socket
    }

    fn ddp_sink(wled: &UdpSocket, strip_offsets: [usize; STRIP_COUNT], clamp_intensity: bool) -> DdpSink {
        let manager = MultiDeviceManager::new(MultiDeviceConfig {
            devices: vec![WledDevice {
                ip: wled.local_addr().unwrap().to_string(),
                led_offset: 0,
                led_count: TOTAL_LEDS,
                enabled: true,
            }],
            send_parallel: false,
            fail_fast: true,
        })
        .unwrap();
        DdpSink::new(manager, strip_offsets, TOTAL_LEDS, clamp_intensity, 1.0).unwrap()
    }

    fn received(wled: &UdpSocket) -> Option<Vec<u8>> {
        let mut buf = [0u8; 2048];
        wled.recv(&mut buf).ok().map(|n| buf[..n].to_vec())
    }

    #[test]
    fn test_out_of_range_writes_are_ignored() {
        let mut strips = StripBuffers::new();
        strips.set_pixel(0, LEDS_PER_STRIP, Pixel::new(1, 2, 3));
        strips.set_pixel(0, 31, Pixel::new(1, 2, 3));
        strips.set_pixel(STRIP_COUNT, 0, Pixel::new(1, 2, 3));
        for strip in 0..STRIP_COUNT {
            assert!(strips.pixels(strip).iter().all(|&p| p == Pixel::OFF));
        }
    }

    #[test]
    fn test_show_counts_per_strip() {
        let mut strips = StripBuffers::new();
        strips.show(1).unwrap();
        strips.show(1).unwrap();
        strips.show(4).unwrap();
        assert_eq!(strips.show_count(0), 0);
        assert_eq!(strips.show_count(1), 2);
        assert_eq!(strips.show_count(4), 1);
        assert!(strips.show(STRIP_COUNT).is_err());
    }

    #[test]
    fn test_strip_layout_rejects_overlap() {
        assert!(check_strip_layout(&[0, 25, 50, 75, 100], TOTAL_LEDS).is_ok());
        assert!(check_strip_layout(&[100, 0, 50, 25, 75], TOTAL_LEDS).is_ok());
        assert!(check_strip_layout(&[0, 0, 0, 0, 0], TOTAL_LEDS).is_err());
        assert!(check_strip_layout(&[0, 24, 50, 75, 100], TOTAL_LEDS).is_err());
        assert!(check_strip_layout(&[0, 25, 50, 75, 101], TOTAL_LEDS).is_err());
    }

    #[test]
    fn test_ddp_sink_places_strips_at_offsets() {
        let wled = fake_wled();
        let mut sink = ddp_sink(&wled, [100, 75, 50, 25, 0], false);

        sink.set_pixel(0, 0, Pixel::new(256, 1, 300));
        sink.set_pixel(4, 24, Pixel::new(0, 0, 7));
        for strip in 0..STRIP_COUNT {
            sink.show(strip).unwrap();
        }

        // Strip 1 starts at LED 100, strip 5 at LED 0; values wrap to a byte
        assert_eq!(&sink.frame[300..303], &[0, 1, 44]);
        assert_eq!(&sink.frame[72..75], &[0, 0, 7]);
        assert!(sink.frame[75..300].iter().all(|&b| b == 0));

        let packet = received(&wled).expect("frame should be sent after all strips are shown");
        assert!(packet.ends_with(&sink.frame));
    }

    #[test]
    fn test_ddp_sink_saturates_when_clamped() {
        let wled = fake_wled();
        let mut sink = ddp_sink(&wled, [0, 25, 50, 75, 100], true);

        sink.set_pixel(2, 3, Pixel::new(256, 1, 300));
        for strip in 0..STRIP_COUNT {
            sink.show(strip).unwrap();
        }

        let start = (50 + 3) * 3;
        assert_eq!(&sink.frame[start..start + 3], &[255, 1, 255]);
    }

    #[test]
    fn test_ddp_sink_waits_for_every_strip() {
        let wled = fake_wled();
        let mut sink = ddp_sink(&wled, [0, 25, 50, 75, 100], false);

        sink.set_pixel(0, 0, Pixel::new(9, 0, 0));
        for strip in 0..STRIP_COUNT - 1 {
            sink.show(strip).unwrap();
        }
        // Showing a strip twice still leaves the last one outstanding
        sink.show(0).unwrap();
        assert_eq!(sink.shown, [true, true, true, true, false]);
        assert!(received(&wled).is_none());

        sink.show(STRIP_COUNT - 1).unwrap();
        assert_eq!(sink.shown, [false; STRIP_COUNT]);
        assert!(received(&wled).is_some());
    }

    #[test]
    fn test_ddp_sink_rejects_overlapping_strips() {
        let wled = fake_wled();
        let manager = MultiDeviceManager::new(MultiDeviceConfig {
            devices: vec![WledDevice {
                ip: wled.local_addr().unwrap().to_string(),
                led_offset: 0,
                led_count: TOTAL_LEDS,
                enabled: true,
            }],
            send_parallel: true,
            fail_fast: false,
        })
        .unwrap();
        assert!(DdpSink::new(manager, [0; STRIP_COUNT], TOTAL_LEDS, false, 1.0).is_err());
    }
}
