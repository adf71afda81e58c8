//! Battery metadata grammar for test directory names.
//!
//! Cyclers write each test into a directory named after the cell under test,
//! e.g. `LGES_G3_MP1_4352mAh_상온수명`. The name is read as underscore
//! separated tokens in a fixed order:
//!
//! ```text
//! name     := manufacturer "_" model* "_" capacity ("_" condition)*
//! capacity := number unit      number = digits ["." digits], unit = mAh | Ah
//! ```
//!
//! The manufacturer is the first token, the capacity is the first token that
//! starts with a digit and ends in a capacity unit, the model is everything in
//! between, and the test condition is everything after. Model and condition
//! are optional and default to [`UNKNOWN`]; manufacturer and capacity are not.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::error::{CyclerError, Result};
use crate::models::{BatteryInfo, UNKNOWN};

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("regex is valid"))
}

/// Parse [`BatteryInfo`] from the last component of `path`.
///
/// Both `/` and `\` are accepted as separators so Windows paths copied from
/// the cycler PC parse the same on any host.
pub fn parse_battery_info(path: &str) -> Result<BatteryInfo> {
    let fail = |reason: &str| CyclerError::MetadataParse {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let base_name = path
        .split(['/', '\\'])
        .rev()
        .map(|s| s.trim().trim_start_matches('\u{feff}'))
        .find(|s| !s.is_empty())
        .ok_or_else(|| fail("empty path"))?;

    let tokens: Vec<&str> = base_name.split('_').collect();
    if tokens.len() < 2 || tokens.iter().any(|t| t.is_empty()) {
        return Err(fail("expected underscore-separated tokens"));
    }

    let capacity_pos = tokens
        .iter()
        .position(|t| split_capacity_unit(t).is_some())
        .ok_or_else(|| fail("no capacity token (e.g. 4352mAh)"))?;
    if capacity_pos == 0 {
        return Err(fail("missing manufacturer before capacity"));
    }

    let (number, unit_scale) =
        split_capacity_unit(tokens[capacity_pos]).ok_or_else(|| fail("bad capacity token"))?;
    if !number_pattern().is_match(number) {
        return Err(fail(&format!(
            "malformed capacity value {:?}",
            tokens[capacity_pos]
        )));
    }
    let capacity_mah = number
        .parse::<f64>()
        .map_err(|_| fail(&format!("malformed capacity value {:?}", number)))?
        * unit_scale;
    if capacity_mah <= 0.0 {
        return Err(fail("capacity must be positive"));
    }

    let model = join_or_unknown(&tokens[1..capacity_pos]);
    let test_condition = join_or_unknown(&tokens[capacity_pos + 1..]);

    let info = BatteryInfo {
        manufacturer: tokens[0].to_string(),
        model,
        capacity_mah,
        test_condition,
        full_name: base_name.to_string(),
    };
    debug!(?info, "parsed battery info");
    Ok(info)
}

/// Split a capacity token into its numeric part and the factor to mAh.
///
/// Only tokens starting with a digit are candidates, so words such as
/// `"Noah"` are never mistaken for a capacity.
fn split_capacity_unit(token: &str) -> Option<(&str, f64)> {
    if !token.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let lower = token.to_ascii_lowercase();
    if lower.ends_with("mah") {
        Some((&token[..token.len() - 3], 1.0))
    } else if lower.ends_with("ah") {
        Some((&token[..token.len() - 2], 1000.0))
    } else {
        None
    }
}

fn join_or_unknown(tokens: &[&str]) -> String {
    if tokens.is_empty() {
        UNKNOWN.to_string()
    } else {
        tokens.join("_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_path() {
        let info = parse_battery_info("D:/pne/LGES_G3_MP1_4352mAh_상온수명").unwrap();
        assert_eq!(info.manufacturer, "LGES");
        assert_eq!(info.model, "G3_MP1");
        assert_eq!(info.capacity_mah, 4352.0);
        assert_eq!(info.test_condition, "상온수명");
        assert_eq!(info.full_name, "LGES_G3_MP1_4352mAh_상온수명");
    }

    #[test]
    fn test_parse_windows_separators() {
        let info = parse_battery_info(r"D:\toyo\Samsung_SDI_2170_3500mAh_고온수명\").unwrap();
        assert_eq!(info.manufacturer, "Samsung");
        assert_eq!(info.model, "SDI_2170");
        assert_eq!(info.capacity_mah, 3500.0);
        assert_eq!(info.test_condition, "고온수명");
    }

    #[test]
    fn test_parse_missing_condition_defaults_unknown() {
        let info = parse_battery_info("CATL_LFP_6000mAh").unwrap();
        assert_eq!(info.model, "LFP");
        assert_eq!(info.test_condition, UNKNOWN);
    }

    #[test]
    fn test_parse_missing_model_defaults_unknown() {
        let info = parse_battery_info("/data/ATL_5000mah_cycle").unwrap();
        assert_eq!(info.manufacturer, "ATL");
        assert_eq!(info.model, UNKNOWN);
        assert_eq!(info.capacity_mah, 5000.0);
        assert_eq!(info.test_condition, "cycle");
    }

    #[test]
    fn test_parse_amp_hours_and_decimal() {
        let info = parse_battery_info("BYD_Blade_3.2Ah_45C").unwrap();
        assert!((info.capacity_mah - 3200.0).abs() < 1e-9);
        assert_eq!(info.test_condition, "45C");
    }

    #[test]
    fn test_parse_multi_token_condition() {
        let info = parse_battery_info("LGES_M50_5000mAh_25C_1C_cycle").unwrap();
        assert_eq!(info.test_condition, "25C_1C_cycle");
    }

    #[test]
    fn test_parse_no_capacity_fails() {
        let err = parse_battery_info("LGES_G3_MP1_상온수명").unwrap_err();
        assert_eq!(err.kind(), "MetadataParseError");
    }

    #[test]
    fn test_parse_malformed_capacity_fails() {
        for name in ["LGES_G3_43a2mAh_x", "LGES_G3_4.3.5mAh_x", "LGES_G3_0mAh_x"] {
            let err = parse_battery_info(name).unwrap_err();
            assert!(
                matches!(err, CyclerError::MetadataParse { .. }),
                "{name} should fail"
            );
        }
    }

    #[test]
    fn test_parse_capacity_first_fails() {
        assert!(parse_battery_info("4352mAh_LGES").is_err());
    }

    #[test]
    fn test_parse_single_token_fails() {
        assert!(parse_battery_info("/data/battery").is_err());
        assert!(parse_battery_info("").is_err());
        assert!(parse_battery_info("LGES__4352mAh").is_err());
    }

    #[test]
    fn test_words_ending_in_ah_are_not_capacity() {
        let info = parse_battery_info("Noah_Cell_1200mAh").unwrap();
        assert_eq!(info.manufacturer, "Noah");
        assert_eq!(info.model, "Cell");
    }
}
