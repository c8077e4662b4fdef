// Spectrum Module - Channel averaging and LED band mapping
//
// Every frame the two channel spectra are averaged and split into two
// LED-facing bands:
//   * the high band, a direct 25-bin slice starting at bin 29
//   * the low band, all 128 bins folded 4:1 into 32 saturating sums

/// Number of magnitude bins produced per channel by the 256-point transform
pub const SPECTRUM_BINS: usize = 128;

/// First averaged bin shown on the high-frequency strips
pub const HIGH_BAND_START: usize = 29;
/// Number of bins in the high band (one per high-strip pixel)
pub const HIGH_BAND_WIDTH: usize = 25;
/// Consecutive bins folded into one low-band value
pub const GROUP_SIZE: usize = 4;
/// Number of low-band values
pub const LOW_BAND_WIDTH: usize = SPECTRUM_BINS / GROUP_SIZE;

/// Right shift applied to every averaged bin before it reaches a band
pub const INTENSITY_SHIFT: u32 = 4;
/// Saturation ceiling of each low-band accumulator
pub const LOW_BAND_CAP: u16 = 255;

/// Per-channel magnitude array, indexed low to high frequency
pub type Spectrum = [u16; SPECTRUM_BINS];

/// Average the left and right spectra bin by bin, truncating.
pub fn average_channels(left: &Spectrum, right: &Spectrum) -> Spectrum {
    let mut avg = [0u16; SPECTRUM_BINS];
    for (i, out) in avg.iter_mut().enumerate() {
        *out = ((left[i] as u32 + right[i] as u32) / 2) as u16;
    }
    avg
}

/// LED-facing intensities derived from one averaged spectrum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bands {
    /// `avg[29..54] >> 4`, unclamped (values above 255 pass through)
    pub high: [u16; HIGH_BAND_WIDTH],
    /// Four-bin saturating sums of `avg[i] >> 4`, capped at 255
    pub low: [u16; LOW_BAND_WIDTH],
}

impl Bands {
    /// Total energy across the low band, used to detect silence
    pub fn low_total(&self) -> u32 {
        self.low.iter().map(|&v| v as u32).sum()
    }
}

/// Build both bands from scratch in a single pass over the averaged spectrum.
pub fn map_bands(avg: &Spectrum) -> Bands {
    let mut high = [0u16; HIGH_BAND_WIDTH];
    let mut low = [0u16; LOW_BAND_WIDTH];

    for (i, &magnitude) in avg.iter().enumerate() {
        let scaled = magnitude >> INTENSITY_SHIFT;

        if (HIGH_BAND_START..HIGH_BAND_START + HIGH_BAND_WIDTH).contains(&i) {
            high[i - HIGH_BAND_START] = scaled;
        }

        // Accumulators start at zero for each group; fold in index order
        let group = &mut low[i / GROUP_SIZE];
        *group = (*group + scaled).min(LOW_BAND_CAP);
    }

    Bands { high, low }
}
