use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use palette::{Hsl, IntoColor, Srgb};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigurationError;

/// Entries in the fixed contour palette.
pub const PALETTE_SIZE: usize = 10;

// ---------------------------------------------------------------------------
// ContourColor
// ---------------------------------------------------------------------------

/// Display colour of one dataset's contour, written as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContourColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ContourColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        ContourColor { r, g, b }
    }
}

impl fmt::Display for ContourColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for ContourColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("'{s}' is not a #rrggbb colour"));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| format!("'{s}' is not a #rrggbb colour"))
        };
        Ok(ContourColor::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl Serialize for ContourColor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContourColor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<ContourColor> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.45);
            let rgb: Srgb = hsl.into_color();
            ContourColor::new(
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            )
        })
        .collect()
}

/// The fixed palette contour colours are drawn from.
pub fn contour_palette() -> Vec<ContourColor> {
    generate_palette(PALETTE_SIZE)
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// Assign one colour per dataset.
///
/// `preset` colours go to the first datasets in order and must be distinct.
/// The rest take the first palette entries not yet in use; once the palette
/// is exhausted, colours cycle by dataset position.
pub fn assign_colors(
    count: usize,
    preset: Option<&[ContourColor]>,
) -> Result<Vec<ContourColor>, ConfigurationError> {
    let preset = preset.unwrap_or(&[]);
    let mut used: BTreeSet<ContourColor> = BTreeSet::new();
    let mut out = Vec::with_capacity(count);

    for color in preset.iter().take(count) {
        if !used.insert(*color) {
            return Err(ConfigurationError::DuplicateColor(color.to_string()));
        }
        out.push(*color);
    }

    let palette = contour_palette();
    let mut free = palette
        .iter()
        .filter(|c| !used.contains(*c))
        .copied()
        .collect::<Vec<_>>()
        .into_iter();
    for index in out.len()..count {
        let color = free.next().unwrap_or(palette[index % palette.len()]);
        out.push(color);
    }
    Ok(out)
}
