// Color Module - Renders band intensities into single-channel pixels
use crate::sink::LedSink;
use crate::spectrum::Bands;
use crate::types::ColorChannel;

/// Strips driven by the high band (physical strips #3 and #4)
pub const HIGH_STRIPS: [usize; 2] = [2, 3];
/// Strips driven by the low band (physical strips #1, #2 and #5)
pub const LOW_STRIPS: [usize; 3] = [0, 1, 4];

/// Write both bands onto their strip tiers in the active color.
///
/// Every strip in a tier receives identical values. The low band has 32 entries
/// while a strip has 25 pixels; indices past the end are handed to the sink,
/// which is responsible for ignoring them.
pub fn render_bands<S: LedSink + ?Sized>(bands: &Bands, color: ColorChannel, sink: &mut S) {
    for (index, &intensity) in bands.high.iter().enumerate() {
        let pixel = color.pixel(intensity);
        for &strip in HIGH_STRIPS.iter() {
            sink.set_pixel(strip, index, pixel);
        }
    }

    for (index, &intensity) in bands.low.iter().enumerate() {
        let pixel = color.pixel(intensity);
        for &strip in LOW_STRIPS.iter() {
            sink.set_pixel(strip, index, pixel);
        }
    }
}
