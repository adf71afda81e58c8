//! Electrical unit conversion between equipment-native and base units.
//!
//! The merged table is always in volts, milliamps and milliamp-hours. PNE
//! writes micro-units, Toyo already writes base units.

use serde::{Deserialize, Serialize};

/// Units of the electrical values in cycler raw files and in the merged
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    MicroVolt,
    Volt,
    MicroAmp,
    MilliAmp,
    MicroAmpHour,
    MilliAmpHour,
}

/// Physical quantity of a [`Unit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Current,
    Charge,
}

impl Unit {
    pub fn quantity(&self) -> Quantity {
        match self {
            Self::MicroVolt | Self::Volt => Quantity::Voltage,
            Self::MicroAmp | Self::MilliAmp => Quantity::Current,
            Self::MicroAmpHour | Self::MilliAmpHour => Quantity::Charge,
        }
    }

    /// Power-of-ten exponent relative to the SI base unit.
    fn exponent(&self) -> i32 {
        match self {
            Self::MicroVolt | Self::MicroAmp | Self::MicroAmpHour => -6,
            Self::MilliAmp | Self::MilliAmpHour => -3,
            Self::Volt => 0,
        }
    }

    /// The unit used in the merged table for this quantity.
    pub fn canonical(quantity: Quantity) -> Unit {
        match quantity {
            Quantity::Voltage => Self::Volt,
            Quantity::Current => Self::MilliAmp,
            Quantity::Charge => Self::MilliAmpHour,
        }
    }

    /// Short suffix used in column names, e.g. `"uv"`.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::MicroVolt => "uv",
            Self::Volt => "v",
            Self::MicroAmp => "ua",
            Self::MilliAmp => "ma",
            Self::MicroAmpHour => "uah",
            Self::MilliAmpHour => "mah",
        }
    }
}

/// Convert `value` from `from` to `to`; `None` across quantities.
///
/// Division is used for down-scaling so that e.g. µV → V is exactly
/// `value / 1e6`, not `value * 1e-6`.
pub fn convert(value: f64, from: Unit, to: Unit) -> Option<f64> {
    if from.quantity() != to.quantity() {
        return None;
    }
    let shift = from.exponent() - to.exponent();
    Some(match shift {
        0 => value,
        s if s > 0 => value * 10f64.powi(s),
        s => value / 10f64.powi(-s),
    })
}

/// Convert `value` into the canonical unit for its quantity.
pub fn to_canonical(value: f64, from: Unit) -> f64 {
    let to = Unit::canonical(from.quantity());
    convert(value, from, to).unwrap_or(value)
}

/// Rename a column carrying a unit suffix to its canonical suffix, e.g.
/// `avg_voltage_uv` → `avg_voltage_v`.
pub fn canonical_column_name(name: &str, from: Unit) -> String {
    let to = Unit::canonical(from.quantity());
    let suffix = format!("_{}", from.suffix());
    match name.strip_suffix(&suffix) {
        Some(stem) => format!("{}_{}", stem, to.suffix()),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_micro_volt_to_volt_is_exact_division() {
        let raw = 4_199_850.0;
        assert_eq!(convert(raw, Unit::MicroVolt, Unit::Volt), Some(raw / 1e6));
        assert_eq!(to_canonical(raw, Unit::MicroVolt), raw / 1_000_000.0);
    }

    #[test]
    fn test_micro_amp_to_milli_amp() {
        assert_eq!(to_canonical(-1_730_000.0, Unit::MicroAmp), -1730.0);
        assert_eq!(to_canonical(2_500.0, Unit::MicroAmpHour), 2.5);
    }

    #[test]
    fn test_up_scaling() {
        assert_eq!(convert(1.5, Unit::MilliAmp, Unit::MicroAmp), Some(1500.0));
        assert_eq!(convert(3.2, Unit::MilliAmpHour, Unit::MicroAmpHour), Some(3200.0));
    }

    #[test]
    fn test_identity_and_cross_quantity() {
        assert_eq!(convert(4.2, Unit::Volt, Unit::Volt), Some(4.2));
        assert_eq!(convert(4.2, Unit::Volt, Unit::MilliAmp), None);
    }

    #[test]
    fn test_canonical_column_name() {
        assert_eq!(
            canonical_column_name("avg_voltage_uv", Unit::MicroVolt),
            "avg_voltage_v"
        );
        assert_eq!(
            canonical_column_name("chg_capacity_uah", Unit::MicroAmpHour),
            "chg_capacity_mah"
        );
        assert_eq!(
            canonical_column_name("avg_current_ua", Unit::MicroAmp),
            "avg_current_ma"
        );
        assert_eq!(canonical_column_name("impedance", Unit::MicroVolt), "impedance");
    }
}
