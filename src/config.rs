//! Declarative per-PLC attribute map.
//!
//! Each PLC link ships a configuration file assigning every exposed
//! attribute a name, a scalar type, memory addresses and the optional
//! quality/formula/meaning/events/autostop descriptors. The schema is pure
//! data; [`AttrRegistry`](crate::AttrRegistry) consumes it at construction
//! time and rejects malformed entries loudly, without retry.
//!
//! # Example
//!
//! ```
//! use plc_mirror::config::AttrSpec;
//!
//! let spec: AttrSpec = serde_json::from_str(r#"{
//!     "name": "GUN_HV_I",
//!     "type": "float32",
//!     "readAddr": 24,
//!     "label": "gun HV current",
//!     "unit": "mA",
//!     "events": { "threshold": 0.005 },
//!     "qualities": {
//!         "warning": { "absolute": { "below": 0.0, "above": 90.0 } }
//!     }
//! }"#).unwrap();
//! assert_eq!(spec.name, "GUN_HV_I");
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::codec::ScalarType;
use crate::error::{PlcError, Result};

/// Scalar type names accepted by the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeSpec {
    /// Single bit of a byte.
    Bool,
    /// Unsigned 8-bit value.
    Byte,
    /// Signed 16-bit big-endian integer.
    Int16,
    /// 32-bit big-endian IEEE float.
    Float32,
    /// ASCII string; width comes from `strLen`.
    Str,
}

impl TypeSpec {
    /// Resolves to a codec scalar type, taking the string width from `len`.
    pub fn to_scalar(self, len: Option<usize>) -> Result<ScalarType> {
        Ok(match self {
            TypeSpec::Bool => ScalarType::Bool,
            TypeSpec::Byte => ScalarType::Byte,
            TypeSpec::Int16 => ScalarType::Int16,
            TypeSpec::Float32 => ScalarType::Float32,
            TypeSpec::Str => ScalarType::Str(
                len.ok_or_else(|| PlcError::invalid_config("str type requires strLen"))?,
            ),
        })
    }
}

/// Event-emission policy.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventsSpec {
    /// Minimum absolute change for a numeric value to emit an event.
    /// Absent means any change emits.
    pub threshold: Option<f64>,
}

/// One severity band of the quality descriptor.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BandSpec {
    /// Discrete trigger values.
    pub values: Option<Vec<f64>>,
    /// Absolute numeric band.
    pub absolute: Option<AbsoluteSpec>,
    /// Relative (std-dev) bound; requires statistics.
    pub relative: Option<RelativeSpec>,
}

/// Absolute band bounds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AbsoluteSpec {
    /// Lower bound.
    pub below: f64,
    /// Upper bound.
    pub above: f64,
    /// Inverts the band reading.
    #[serde(default)]
    pub under: bool,
}

/// Relative band bound.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RelativeSpec {
    /// Standard-deviation bound.
    pub std_dev: f64,
}

/// Quality classification rules for one attribute.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QualitiesSpec {
    /// ALARM rules.
    pub alarm: Option<BandSpec>,
    /// WARNING rules.
    pub warning: Option<BandSpec>,
    /// CHANGING rules.
    pub changing: Option<BandSpec>,
}

/// Read/write formulas.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FormulaSpec {
    /// Transform applied to values read from the PLC.
    pub read: Option<String>,
    /// Transform applied to values written to the PLC.
    pub write: Option<String>,
    /// Predicate that must hold for a write to be accepted.
    pub write_guard: Option<String>,
    /// User-facing message when the guard vetoes a write.
    pub write_guard_message: Option<String>,
}

/// Logic (derived boolean) attribute definition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogicSpec {
    /// Operands: attribute name to its allowed discrete values.
    pub operands: BTreeMap<String, Vec<f64>>,
    /// Combination operator.
    #[serde(default)]
    pub operator: LogicOperator,
    /// Inverts the combined result.
    #[serde(default)]
    pub inverted: bool,
}

/// Logic combination operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicOperator {
    /// All operands must hold.
    #[default]
    And,
    /// Any operand suffices.
    Or,
}

/// Safety auto-stop definition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutoStopSpec {
    /// Trigger when the integrated mean falls below this bound.
    pub below: Option<f64>,
    /// Trigger when the integrated mean rises above this bound.
    pub above: Option<f64>,
    /// Integration window in samples.
    pub integration: usize,
    /// The switch attribute the monitor gates on and commands off.
    pub switch_attr: String,
}

/// Interlock-history tracking definition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HistorySpec {
    /// Known-good values that delimit interlock episodes.
    pub base: Vec<f64>,
    /// Window capacity; defaults to the statistics default.
    pub capacity: Option<usize>,
}

/// One attribute of the per-PLC map.
///
/// The attribute kind is inferred from the populated fields: a `readAddr`
/// makes a register attribute, `logic` a derived logic attribute, `group` a
/// bit group over other registers, `enumeration` a memorized option list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttrSpec {
    /// Attribute name, unique per PLC (matched case-insensitively).
    pub name: String,
    /// Scalar type.
    #[serde(rename = "type")]
    pub ty: TypeSpec,
    /// String width for `str` attributes.
    pub str_len: Option<usize>,
    /// Read address within the frame.
    pub read_addr: Option<usize>,
    /// Bit index for bool reads.
    pub read_bit: Option<u8>,
    /// Write address within the write region.
    pub write_addr: Option<usize>,
    /// Bit index for bool writes.
    pub write_bit: Option<u8>,
    /// Short display label.
    pub label: Option<String>,
    /// Longer description.
    pub description: Option<String>,
    /// Minimum accepted write value.
    pub min: Option<f64>,
    /// Maximum accepted write value.
    pub max: Option<f64>,
    /// Engineering unit.
    pub unit: Option<String>,
    /// Display format hint (e.g. `%4.2f`).
    pub format: Option<String>,
    /// Event-emission policy; absent means no change events.
    pub events: Option<EventsSpec>,
    /// Quality classification rules.
    pub qualities: Option<QualitiesSpec>,
    /// Read/write formulas.
    pub formula: Option<FormulaSpec>,
    /// Human meanings per discrete value.
    pub meanings: Option<BTreeMap<String, String>>,
    /// Safety auto-stop monitor.
    pub autostop: Option<AutoStopSpec>,
    /// Interlock-history tracking.
    pub history: Option<HistorySpec>,
    /// Statistics window size; required by relative qualities and autostop.
    pub statistics: Option<usize>,
    /// Logic attribute definition.
    pub logic: Option<LogicSpec>,
    /// Bit-group member names.
    pub group: Option<Vec<String>>,
    /// Initial options of an enumeration attribute.
    pub enumeration: Option<Vec<String>>,
    /// Persist writes through the external property store. Enumerations are
    /// memorized regardless of this flag.
    #[serde(default)]
    pub memorized: bool,
    /// Ramping descriptor. Accepted for memory-map compatibility; parsed
    /// and stored but not acted on.
    pub ramp: Option<serde_json::Value>,
}

impl AttrSpec {
    /// Parses one attribute from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::InvalidConfig` carrying the serde message.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PlcError::invalid_config(format!("attribute spec: {e}")))
    }

    /// Parses a whole attribute map from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::InvalidConfig` carrying the serde message.
    pub fn map_from_json(json: &str) -> Result<Vec<Self>> {
        serde_json::from_str(json)
            .map_err(|e| PlcError::invalid_config(format!("attribute map: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_register_spec() {
        let spec = AttrSpec::from_json(
            r#"{ "name": "VacuumOK", "type": "bool", "readAddr": 10, "readBit": 3 }"#,
        )
        .unwrap();
        assert_eq!(spec.name, "VacuumOK");
        assert_eq!(spec.ty, TypeSpec::Bool);
        assert_eq!(spec.read_addr, Some(10));
        assert_eq!(spec.read_bit, Some(3));
        assert!(!spec.memorized);
    }

    #[test]
    fn test_full_register_spec() {
        let spec = AttrSpec::from_json(
            r#"{
                "name": "GUN_HV_V",
                "type": "float32",
                "readAddr": 4,
                "writeAddr": 0,
                "label": "gun HV setpoint",
                "unit": "kV",
                "format": "%4.1f",
                "min": -90.0,
                "max": 0.0,
                "memorized": true,
                "events": { "threshold": 0.01 },
                "formula": { "read": "VALUE / 10" },
                "qualities": {
                    "alarm": { "absolute": { "below": -95.0, "above": 5.0 } },
                    "changing": { "relative": { "stdDev": 0.1 } }
                },
                "statistics": 10
            }"#,
        )
        .unwrap();
        assert_eq!(spec.min, Some(-90.0));
        assert!(spec.memorized);
        let q = spec.qualities.unwrap();
        assert_eq!(q.alarm.unwrap().absolute.unwrap().below, -95.0);
        assert_eq!(q.changing.unwrap().relative.unwrap().std_dev, 0.1);
    }

    #[test]
    fn test_logic_spec() {
        let spec = AttrSpec::from_json(
            r#"{
                "name": "KA_OK",
                "type": "bool",
                "logic": {
                    "operands": { "ka_vacuum": [1], "ka_cooling": [1, 2] },
                    "operator": "and",
                    "inverted": false
                }
            }"#,
        )
        .unwrap();
        let logic = spec.logic.unwrap();
        assert_eq!(logic.operator, LogicOperator::And);
        assert_eq!(logic.operands["ka_cooling"], vec![1.0, 2.0]);
    }

    #[test]
    fn test_autostop_and_meanings() {
        let spec = AttrSpec::from_json(
            r#"{
                "name": "GUN_HV_I",
                "type": "float32",
                "readAddr": 24,
                "statistics": 10,
                "autostop": {
                    "below": 0.02,
                    "integration": 10,
                    "switchAttr": "gun_hv_onc"
                },
                "meanings": { "0": "off", "1": "on" }
            }"#,
        )
        .unwrap();
        let austop = spec.autostop.unwrap();
        assert_eq!(austop.below, Some(0.02));
        assert_eq!(austop.switch_attr, "gun_hv_onc");
        assert_eq!(spec.meanings.unwrap()["1"], "on");
    }

    #[test]
    fn test_ramp_is_parsed_but_inert() {
        let spec = AttrSpec::from_json(
            r#"{
                "name": "HVPS_V",
                "type": "float32",
                "readAddr": 8,
                "writeAddr": 4,
                "ramp": { "step": 0.5, "stepTime": 1.0 }
            }"#,
        )
        .unwrap();
        assert!(spec.ramp.is_some());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let res = AttrSpec::from_json(
            r#"{ "name": "X", "type": "byte", "readAddr": 0, "bogus": 1 }"#,
        );
        assert!(matches!(res, Err(PlcError::InvalidConfig { .. })));
    }

    #[test]
    fn test_type_spec_resolution() {
        assert_eq!(
            TypeSpec::Float32.to_scalar(None).unwrap(),
            ScalarType::Float32
        );
        assert_eq!(TypeSpec::Str.to_scalar(Some(6)).unwrap(), ScalarType::Str(6));
        assert!(TypeSpec::Str.to_scalar(None).is_err());
    }

    #[test]
    fn test_map_from_json() {
        let specs = AttrSpec::map_from_json(
            r#"[
                { "name": "A", "type": "byte", "readAddr": 0 },
                { "name": "B", "type": "bool", "readAddr": 1, "readBit": 0 }
            ]"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].name, "B");
    }
}
