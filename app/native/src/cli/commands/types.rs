//! Shared argument types for CLI commands.

use std::str::FromStr;

use crate::modules::fleet::types::{DisplayMode, MoveDirection, PhysicalSize, PixelSize};

/// Parses `WIDTHxHEIGHT` into two non-zero numbers.
fn parse_extent(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Invalid size '{s}'. Expected WIDTHxHEIGHT."))?;
    let width = w.trim().parse::<u32>().map_err(|_| format!("Invalid width in '{s}'."))?;
    let height = h.trim().parse::<u32>().map_err(|_| format!("Invalid height in '{s}'."))?;
    if width == 0 || height == 0 {
        return Err(format!("Size '{s}' must be non-zero."));
    }
    Ok((width, height))
}

/// A display mode written as `WIDTHxHEIGHT[@RATE][:hidpi]`.
///
/// The refresh rate defaults to 60 Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeArg(pub DisplayMode);

impl FromStr for ModeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, hi_dpi) = match s.rsplit_once(':') {
            Some((rest, flag)) if flag.eq_ignore_ascii_case("hidpi") => (rest, true),
            Some(_) => return Err(format!("Invalid mode flag in '{s}'. Only ':hidpi' is supported.")),
            None => (s, false),
        };
        let (extent, rate) = match rest.split_once('@') {
            Some((extent, rate)) => {
                let rate = rate.parse::<f64>().map_err(|_| format!("Invalid refresh rate in '{s}'."))?;
                (extent, rate)
            }
            None => (rest, 60.0),
        };
        let (width, height) = parse_extent(extent)?;
        let mode = DisplayMode::new(width, height, rate, hi_dpi);
        if !mode.is_valid() {
            return Err(format!("Invalid mode '{s}'."));
        }
        Ok(Self(mode))
    }
}

/// Physical size in millimetres, written as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeArg(pub PhysicalSize);

impl FromStr for SizeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_extent(s).map(|(w, h)| Self(PhysicalSize::new(w, h)))
    }
}

/// Pixel extent, written as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelArg(pub PixelSize);

impl FromStr for PixelArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_extent(s).map(|(w, h)| Self(PixelSize::new(w, h)))
    }
}

/// Direction argument of `mirage move`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliDirection {
    Up,
    Down,
}

impl From<CliDirection> for MoveDirection {
    fn from(direction: CliDirection) -> Self {
        match direction {
            CliDirection::Up => Self::Up,
            CliDirection::Down => Self::Down,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults_to_sixty_hertz() {
        let ModeArg(mode) = "2560x1440".parse().unwrap();
        assert_eq!(mode, DisplayMode::new(2560, 1440, 60.0, false));
    }

    #[test]
    fn test_mode_with_rate_and_hidpi() {
        let ModeArg(mode) = "1920x1080@120:hidpi".parse().unwrap();
        assert_eq!(mode, DisplayMode::new(1920, 1080, 120.0, true));
    }

    #[test]
    fn test_mode_rejects_unknown_flag() {
        assert!("1920x1080:retina".parse::<ModeArg>().is_err());
    }

    #[test]
    fn test_mode_rejects_zero_rate() {
        assert!("1920x1080@0".parse::<ModeArg>().is_err());
    }

    #[test]
    fn test_size_parses_uppercase_separator() {
        let SizeArg(size) = "600X340".parse().unwrap();
        assert_eq!(size, PhysicalSize::new(600, 340));
    }

    #[test]
    fn test_extent_rejects_zero() {
        assert!("0x1080".parse::<PixelArg>().is_err());
        assert!("1920".parse::<PixelArg>().is_err());
    }
}
