//! Weight units and normalization to grams.

use crate::protocol::RawReading;
use std::fmt;

/// Readings whose canonical weight exceeds this magnitude are clamped and flagged.
pub const MAX_WEIGHT_GRAMS: f64 = 5000.0;

/// Native unit reported by a scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Gram,
    Kilogram,
    Pound,
    Ounce,
}

impl Unit {
    /// Grams per one of this unit.
    pub fn grams_per_unit(self) -> f64 {
        match self {
            Unit::Gram => 1.0,
            Unit::Kilogram => 1000.0,
            Unit::Pound => 453.592_37,
            Unit::Ounce => 28.349_523_125,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Gram => "g",
            Unit::Kilogram => "kg",
            Unit::Pound => "lb",
            Unit::Ounce => "oz",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Unit used when presenting canonical weight, selectable by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DisplayUnit {
    #[default]
    Grams,
    Ounces,
}

impl DisplayUnit {
    /// Convert a canonical gram value into this display unit.
    pub fn convert(self, grams: f64) -> f64 {
        match self {
            DisplayUnit::Grams => grams,
            DisplayUnit::Ounces => grams / Unit::Ounce.grams_per_unit(),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            DisplayUnit::Grams => Unit::Gram.symbol(),
            DisplayUnit::Ounces => Unit::Ounce.symbol(),
        }
    }
}

/// Canonical weight derived from a raw reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized {
    pub grams: f64,
    /// Set when the converted value exceeded [`MAX_WEIGHT_GRAMS`] and was clamped.
    pub clamped: bool,
}

/// Convert a reading from its native unit to grams.
pub fn normalize(reading: &RawReading) -> Normalized {
    let grams = reading.value() * reading.unit.grams_per_unit();
    if grams.abs() > MAX_WEIGHT_GRAMS {
        Normalized {
            grams: grams.clamp(-MAX_WEIGHT_GRAMS, MAX_WEIGHT_GRAMS),
            clamped: true,
        }
    } else {
        Normalized {
            grams,
            clamped: false,
        }
    }
}
