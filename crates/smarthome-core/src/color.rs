// ── Color and white-temperature math ──
//
// Pure conversions shared by every normalizer: Kelvin <-> RGB, HSV <-> RGB
// and the Hue wide-gamut CIE xy transform. Vendors report color in their
// native space; the canonical model always stores RGB triples.

use serde::{Deserialize, Serialize};

/// An sRGB color, one byte per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const BLACK: Self = Self::new(0, 0, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// `#rrggbb`.
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }

    /// Parse `#rrggbb`, `rrggbb` or `r,g,b`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Some((r, rest)) = input.split_once(',') {
            let (g, b) = rest.split_once(',')?;
            return Some(Self::new(
                r.trim().parse().ok()?,
                g.trim().parse().ok()?,
                b.trim().parse().ok()?,
            ));
        }
        let hex = input.strip_prefix('#').unwrap_or(input);
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        Some(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// HSV with `h` in degrees (0-360) and `s`, `v` in percent (0-100).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

// ── Kelvin ───────────────────────────────────────────────────────────

pub const KELVIN_MIN: u32 = 1000;
pub const KELVIN_MAX: u32 = 40000;
const TABLE_MIN: u32 = 2200;
const TABLE_MAX: u32 = 6500;

/// Black-body reference colors, 2200 K to 6500 K.
const KELVIN_TABLE: [(u32, Rgb); 31] = [
    (2200, Rgb::new(255, 146, 39)),
    (2300, Rgb::new(255, 151, 50)),
    (2400, Rgb::new(255, 155, 61)),
    (2500, Rgb::new(255, 159, 70)),
    (2600, Rgb::new(255, 163, 79)),
    (2700, Rgb::new(255, 167, 87)),
    (2800, Rgb::new(255, 170, 95)),
    (2900, Rgb::new(255, 174, 103)),
    (3000, Rgb::new(255, 177, 110)),
    (3100, Rgb::new(255, 180, 117)),
    (3200, Rgb::new(255, 184, 123)),
    (3300, Rgb::new(255, 187, 129)),
    (3400, Rgb::new(255, 190, 135)),
    (3500, Rgb::new(255, 193, 141)),
    (3600, Rgb::new(255, 195, 146)),
    (3700, Rgb::new(255, 198, 151)),
    (3800, Rgb::new(255, 201, 157)),
    (3900, Rgb::new(255, 203, 161)),
    (4000, Rgb::new(255, 206, 166)),
    (4100, Rgb::new(255, 208, 171)),
    (4200, Rgb::new(255, 211, 175)),
    (4300, Rgb::new(255, 213, 179)),
    (4400, Rgb::new(255, 215, 183)),
    (4500, Rgb::new(255, 218, 187)),
    (4700, Rgb::new(255, 222, 195)),
    (5000, Rgb::new(255, 228, 206)),
    (5300, Rgb::new(255, 234, 216)),
    (5600, Rgb::new(255, 239, 225)),
    (5900, Rgb::new(255, 244, 234)),
    (6200, Rgb::new(255, 249, 242)),
    (6500, Rgb::new(255, 254, 250)),
];

fn channel(value: f64) -> u8 {
    value.clamp(0.0, 255.0).round() as u8
}

/// Tanner Helland's black-body approximation.
pub fn kelvin_to_rgb(kelvin: u32) -> Rgb {
    let temp = f64::from(kelvin.clamp(KELVIN_MIN, KELVIN_MAX)) / 100.0;

    let red = if temp <= 66.0 {
        255.0
    } else {
        329.698_727_446 * (temp - 60.0).powf(-0.133_204_759_2)
    };

    let green = if temp <= 66.0 {
        99.470_802_586_1 * temp.ln() - 161.119_568_166_1
    } else {
        288.122_169_528_3 * (temp - 60.0).powf(-0.075_514_849_2)
    };

    let blue = if temp >= 66.0 {
        255.0
    } else if temp <= 19.0 {
        0.0
    } else {
        138.517_731_223_1 * (temp - 10.0).ln() - 305.044_792_730_7
    };

    Rgb::new(channel(red), channel(green), channel(blue))
}

/// Closest reference temperature, matching red first, then green among
/// the red winners, then blue. Optionally rescaled linearly into a
/// device's `(min, max)` Kelvin range.
pub fn rgb_to_kelvin(rgb: Rgb, range: Option<(u32, u32)>) -> u32 {
    let picks: [fn(Rgb) -> u8; 3] = [|c| c.red, |c| c.green, |c| c.blue];
    let mut candidates: Vec<&(u32, Rgb)> = KELVIN_TABLE.iter().collect();
    for pick in picks {
        let target = pick(rgb);
        let best = candidates
            .iter()
            .map(|(_, c)| pick(*c).abs_diff(target))
            .min()
            .unwrap_or(0);
        candidates.retain(|(_, c)| pick(*c).abs_diff(target) == best);
    }
    let kelvin = candidates.first().map_or(TABLE_MIN, |(k, _)| *k);

    match range {
        Some((min, max)) if max > min => {
            let span = f64::from(max - min);
            let offset = f64::from(kelvin - TABLE_MIN) / f64::from(TABLE_MAX - TABLE_MIN);
            (f64::from(min) + offset * span).round() as u32
        }
        _ => kelvin,
    }
}

/// Inverse of the rescale in [`rgb_to_kelvin`]: a device Kelvin value
/// mapped back onto the reference range.
pub fn kelvin_from_range(kelvin: u32, (min, max): (u32, u32)) -> u32 {
    if max <= min {
        return kelvin;
    }
    let offset = f64::from(kelvin.clamp(min, max) - min) / f64::from(max - min);
    (f64::from(TABLE_MIN) + offset * f64::from(TABLE_MAX - TABLE_MIN)).round() as u32
}

pub fn mirek_to_kelvin(mirek: u32) -> u32 {
    1_000_000 / mirek.max(1)
}

pub fn kelvin_to_mirek(kelvin: u32) -> u32 {
    1_000_000 / kelvin.max(1)
}

// ── HSV ──────────────────────────────────────────────────────────────

pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> Rgb {
    let s = (s / 100.0).clamp(0.0, 1.0);
    let v = (v / 100.0).clamp(0.0, 1.0);
    let h = h.rem_euclid(360.0) / 60.0;

    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    let (r, g, b) = match sector as u8 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Rgb::new(channel(r * 255.0), channel(g * 255.0), channel(b * 255.0))
}

pub fn rgb_to_hsv(rgb: Rgb) -> Hsv {
    let r = f64::from(rgb.red) / 255.0;
    let g = f64::from(rgb.green) / 255.0;
    let b = f64::from(rgb.blue) / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };

    Hsv {
        h,
        s: s * 100.0,
        v: max * 100.0,
    }
}

// ── Hue CIE xy ───────────────────────────────────────────────────────

fn gamma_expand(c: f64) -> f64 {
    if c > 0.040_45 {
        ((c + 0.055) / 1.055).powf(2.4)
    } else {
        c / 12.92
    }
}

fn gamma_compress(c: f64) -> f64 {
    if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// RGB to CIE xy through the Philips wide-gamut matrix.
pub fn color_to_hue_xy(rgb: Rgb) -> (f64, f64) {
    let r = gamma_expand(f64::from(rgb.red) / 255.0);
    let g = gamma_expand(f64::from(rgb.green) / 255.0);
    let b = gamma_expand(f64::from(rgb.blue) / 255.0);

    let x = r * 0.664_511 + g * 0.154_324 + b * 0.162_028;
    let y = r * 0.283_881 + g * 0.668_433 + b * 0.047_685;
    let z = r * 0.000_088 + g * 0.072_310 + b * 0.986_039;

    let sum = x + y + z;
    if sum == 0.0 {
        return (0.0, 0.0);
    }
    (x / sum, y / sum)
}

/// CIE xy plus brightness (0-1) back to RGB.
///
/// Negative channels are mirrored to positive rather than clamped to
/// zero; bridge-reported colors depend on it.
pub fn xy_bri_to_color(x: f64, y: f64, bri: f64) -> Rgb {
    if y == 0.0 {
        return Rgb::BLACK;
    }
    let z = 1.0 - x - y;
    let big_y = bri.clamp(0.0, 1.0);
    let big_x = (big_y / y) * x;
    let big_z = (big_y / y) * z;

    let r = big_x * 1.656_492 - big_y * 0.354_851 - big_z * 0.255_038;
    let g = -big_x * 0.707_196 + big_y * 1.655_397 + big_z * 0.036_152;
    let b = big_x * 0.051_713 - big_y * 0.121_364 + big_z * 1.011_530;

    let finish = |c: f64| {
        let mut c = gamma_compress(c) * 255.0;
        if c < 0.0 {
            c *= -1.0;
        }
        channel(c)
    };
    Rgb::new(finish(r), finish(g), finish(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kelvin_table_round_trips_exactly() {
        for (kelvin, rgb) in KELVIN_TABLE {
            assert_eq!(rgb_to_kelvin(rgb, None), kelvin, "entry {kelvin}");
        }
    }

    #[test]
    fn kelvin_table_agrees_with_the_formula() {
        for (kelvin, rgb) in KELVIN_TABLE {
            assert_eq!(kelvin_to_rgb(kelvin), rgb, "entry {kelvin}");
        }
    }

    #[test]
    fn kelvin_input_is_clamped() {
        assert_eq!(kelvin_to_rgb(10), kelvin_to_rgb(KELVIN_MIN));
        assert_eq!(kelvin_to_rgb(90_000), kelvin_to_rgb(KELVIN_MAX));
        assert_eq!(kelvin_to_rgb(6600).red, 255);
        assert_eq!(kelvin_to_rgb(1500).blue, 0);
    }

    #[test]
    fn kelvin_rescales_into_device_range() {
        let warmest = KELVIN_TABLE[0].1;
        let coolest = KELVIN_TABLE[30].1;
        assert_eq!(rgb_to_kelvin(warmest, Some((1800, 4000))), 1800);
        assert_eq!(rgb_to_kelvin(coolest, Some((1800, 4000))), 4000);
        assert_eq!(kelvin_from_range(4000, (1800, 4000)), TABLE_MAX);
    }

    #[test]
    fn hsv_round_trip_within_one() {
        for r in (0..=255u8).step_by(5) {
            for g in (0..=255u8).step_by(15) {
                for b in (0..=255u8).step_by(17) {
                    let rgb = Rgb::new(r, g, b);
                    let hsv = rgb_to_hsv(rgb);
                    let back = hsv_to_rgb(hsv.h, hsv.s, hsv.v);
                    assert!(back.red.abs_diff(r) <= 1, "{rgb:?} -> {back:?}");
                    assert!(back.green.abs_diff(g) <= 1, "{rgb:?} -> {back:?}");
                    assert!(back.blue.abs_diff(b) <= 1, "{rgb:?} -> {back:?}");
                }
            }
        }
    }

    #[test]
    fn hsv_primaries() {
        assert_eq!(hsv_to_rgb(0.0, 100.0, 100.0), Rgb::new(255, 0, 0));
        assert_eq!(hsv_to_rgb(120.0, 100.0, 100.0), Rgb::new(0, 255, 0));
        assert_eq!(hsv_to_rgb(240.0, 100.0, 100.0), Rgb::new(0, 0, 255));
        assert_eq!(hsv_to_rgb(360.0, 100.0, 100.0), Rgb::new(255, 0, 0));
        let hsv = rgb_to_hsv(Rgb::new(0, 0, 255));
        assert!((hsv.h - 240.0).abs() < f64::EPSILON);
    }

    #[test]
    fn white_maps_near_d65_and_back() {
        let (x, y) = color_to_hue_xy(Rgb::WHITE);
        assert!((x - 0.3227).abs() < 0.001, "x = {x}");
        assert!((y - 0.329).abs() < 0.001, "y = {y}");
        let back = xy_bri_to_color(x, y, 1.0);
        assert!(back.red >= 250 && back.green >= 250 && back.blue >= 250, "{back:?}");
    }

    #[test]
    fn out_of_gamut_negative_channel_is_mirrored() {
        // Saturated green outside sRGB: red comes out negative.
        let rgb = xy_bri_to_color(0.15, 0.7, 1.0);
        assert_eq!(rgb.red, 180);
        assert_eq!(rgb.green, 255);
        assert!(rgb.blue.abs_diff(92) <= 1, "{rgb:?}");
    }

    #[test]
    fn zero_y_is_black() {
        assert_eq!(xy_bri_to_color(0.3, 0.0, 1.0), Rgb::BLACK);
        assert_eq!(color_to_hue_xy(Rgb::BLACK), (0.0, 0.0));
    }

    #[test]
    fn rgb_parses_hex_and_triples() {
        assert_eq!(Rgb::parse("#ff8000"), Some(Rgb::new(255, 128, 0)));
        assert_eq!(Rgb::parse("10, 20,30"), Some(Rgb::new(10, 20, 30)));
        assert_eq!(Rgb::parse("zz"), None);
        assert_eq!(Rgb::new(1, 2, 3).to_hex(), "#010203");
    }
}
