//! Quality classification for mirrored attribute values.
//!
//! Every attribute carries a [`Quality`] tag alongside its value and
//! timestamp. A [`QualityDescriptor`] classifies each fresh value into
//! VALID/CHANGING/WARNING/ALARM from one of three rule kinds:
//!
//! - **discrete tables** — the raw value is a member of a configured set
//!   (used for state bytes and interlock words)
//! - **absolute thresholds** — the numeric value lies outside (or, with
//!   `under`, inside) a `[below, above]` band
//! - **relative thresholds** — the standard deviation of the attribute's
//!   statistics buffer meets a bound (used to flag a readback still moving
//!   toward its setpoint as CHANGING)
//!
//! When several rules match, the worst quality wins:
//! ALARM > WARNING > CHANGING > VALID.
//!
//! # Example
//!
//! ```
//! use plc_mirror::{AbsoluteThreshold, Quality, QualityDescriptor};
//!
//! let desc = QualityDescriptor::new()
//!     .with_warning_absolute(AbsoluteThreshold::new(10.0, 20.0, false).unwrap());
//!
//! assert_eq!(desc.classify_numeric(15.0, None), Quality::Valid);
//! assert_eq!(desc.classify_numeric(25.0, None), Quality::Warning);
//! ```

use serde::Deserialize;

use crate::error::{PlcError, Result};
use crate::stats::StatBuffer;
use crate::Value;

/// Quality tag attached to every attribute value.
///
/// Ordering reflects severity: a larger variant overrides a smaller one when
/// several classification rules match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quality {
    /// Value is trustworthy and inside all configured bands.
    Valid,
    /// Value is moving (relative threshold met); expected during ramps.
    Changing,
    /// Value is in a configured warning band or set.
    Warning,
    /// Value is in a configured alarm band or set.
    Alarm,
    /// Value could not be derived (formula failure, lost reference).
    Invalid,
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quality::Valid => write!(f, "VALID"),
            Quality::Changing => write!(f, "CHANGING"),
            Quality::Warning => write!(f, "WARNING"),
            Quality::Alarm => write!(f, "ALARM"),
            Quality::Invalid => write!(f, "INVALID"),
        }
    }
}

/// Absolute numeric band.
///
/// With `under = false` the rule triggers when the value falls **outside**
/// `[below, above]`; with `under = true` it triggers when the value falls
/// strictly **inside** `(above, below)` — the band is read inverted, which is
/// how the PLCs express "this range is the bad one".
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AbsoluteThreshold {
    /// Lower bound of the band.
    pub below: f64,
    /// Upper bound of the band.
    pub above: f64,
    /// Inverts the band reading.
    #[serde(default)]
    pub under: bool,
}

impl AbsoluteThreshold {
    /// Creates an absolute band, rejecting inconsistent bounds.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::InvalidConfig` when `above <= below` with
    /// `under = false` (an empty good band), or `above >= below` with
    /// `under = true` (an empty bad band).
    pub fn new(below: f64, above: f64, under: bool) -> Result<Self> {
        if !under && above <= below {
            return Err(PlcError::invalid_config(format!(
                "absolute threshold: above ({above}) must exceed below ({below})"
            )));
        }
        if under && above >= below {
            return Err(PlcError::invalid_config(format!(
                "inverted absolute threshold: above ({above}) must be less than below ({below})"
            )));
        }
        Ok(Self {
            below,
            above,
            under,
        })
    }

    /// Returns whether `value` triggers this rule.
    pub fn triggers(&self, value: f64) -> bool {
        if self.under {
            self.above < value && value < self.below
        } else {
            !(self.below <= value && value <= self.above)
        }
    }
}

/// Relative (standard-deviation) threshold.
///
/// Requires the attribute to carry a statistics buffer; triggers when the
/// live window's standard deviation meets the bound.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RelativeThreshold {
    /// Standard-deviation bound.
    pub std_dev: f64,
}

impl RelativeThreshold {
    /// Returns whether the buffer's current spread triggers this rule.
    pub fn triggers(&self, buffer: &StatBuffer) -> bool {
        buffer.std().is_some_and(|s| s >= self.std_dev)
    }
}

/// One severity level's rules: a discrete value set and/or numeric bands.
#[derive(Debug, Clone, Default)]
struct Band {
    discrete: Option<Vec<Value>>,
    absolute: Option<AbsoluteThreshold>,
    relative: Option<RelativeThreshold>,
}

impl Band {
    fn matches(&self, value: &Value, buffer: Option<&StatBuffer>) -> bool {
        if let Some(set) = &self.discrete {
            if set.contains(value) {
                return true;
            }
        }
        if let Some(abs) = &self.absolute {
            if value.as_f64().is_some_and(|v| abs.triggers(v)) {
                return true;
            }
        }
        if let (Some(rel), Some(buf)) = (&self.relative, buffer) {
            if rel.triggers(buf) {
                return true;
            }
        }
        false
    }
}

/// Per-attribute quality classification rules.
///
/// Built once from the declarative configuration; classification runs on
/// every fresh value. Severities are checked worst-first so overlapping
/// rules resolve to the highest rank.
#[derive(Debug, Clone, Default)]
pub struct QualityDescriptor {
    alarm: Band,
    warning: Band,
    changing: Band,
}

impl QualityDescriptor {
    /// Creates an empty descriptor (everything classifies as VALID).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a discrete ALARM value set.
    pub fn with_alarm_values(mut self, values: Vec<Value>) -> Self {
        self.alarm.discrete = Some(values);
        self
    }

    /// Adds a discrete WARNING value set.
    pub fn with_warning_values(mut self, values: Vec<Value>) -> Self {
        self.warning.discrete = Some(values);
        self
    }

    /// Adds a discrete CHANGING value set.
    pub fn with_changing_values(mut self, values: Vec<Value>) -> Self {
        self.changing.discrete = Some(values);
        self
    }

    /// Adds an absolute ALARM band.
    pub fn with_alarm_absolute(mut self, threshold: AbsoluteThreshold) -> Self {
        self.alarm.absolute = Some(threshold);
        self
    }

    /// Adds an absolute WARNING band.
    pub fn with_warning_absolute(mut self, threshold: AbsoluteThreshold) -> Self {
        self.warning.absolute = Some(threshold);
        self
    }

    /// Adds an absolute CHANGING band.
    pub fn with_changing_absolute(mut self, threshold: AbsoluteThreshold) -> Self {
        self.changing.absolute = Some(threshold);
        self
    }

    /// Adds a relative ALARM rule.
    pub fn with_alarm_relative(mut self, threshold: RelativeThreshold) -> Self {
        self.alarm.relative = Some(threshold);
        self
    }

    /// Adds a relative CHANGING rule (value still moving).
    pub fn with_changing_relative(mut self, threshold: RelativeThreshold) -> Self {
        self.changing.relative = Some(threshold);
        self
    }

    /// Adds a relative WARNING rule.
    pub fn with_warning_relative(mut self, threshold: RelativeThreshold) -> Self {
        self.warning.relative = Some(threshold);
        self
    }

    /// Returns whether any relative rule is configured (which requires the
    /// attribute to carry a statistics buffer).
    pub fn needs_stats(&self) -> bool {
        self.alarm.relative.is_some()
            || self.warning.relative.is_some()
            || self.changing.relative.is_some()
    }

    /// Classifies a value, worst severity first.
    pub fn classify(&self, value: &Value, buffer: Option<&StatBuffer>) -> Quality {
        if self.alarm.matches(value, buffer) {
            Quality::Alarm
        } else if self.warning.matches(value, buffer) {
            Quality::Warning
        } else if self.changing.matches(value, buffer) {
            Quality::Changing
        } else {
            Quality::Valid
        }
    }

    /// Convenience wrapper for numeric values.
    pub fn classify_numeric(&self, value: f64, buffer: Option<&StatBuffer>) -> Quality {
        self.classify(&Value::Float32(value as f32), buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_severity_order() {
        assert!(Quality::Alarm > Quality::Warning);
        assert!(Quality::Warning > Quality::Changing);
        assert!(Quality::Changing > Quality::Valid);
    }

    #[test]
    fn test_quality_display() {
        assert_eq!(Quality::Valid.to_string(), "VALID");
        assert_eq!(Quality::Alarm.to_string(), "ALARM");
        assert_eq!(Quality::Invalid.to_string(), "INVALID");
    }

    #[test]
    fn test_absolute_threshold_construction() {
        assert!(AbsoluteThreshold::new(10.0, 20.0, false).is_ok());
        assert!(AbsoluteThreshold::new(20.0, 10.0, false).is_err());
        assert!(AbsoluteThreshold::new(10.0, 10.0, false).is_err());
        assert!(AbsoluteThreshold::new(20.0, 10.0, true).is_ok());
        assert!(AbsoluteThreshold::new(10.0, 20.0, true).is_err());
    }

    #[test]
    fn test_absolute_band_outside() {
        let t = AbsoluteThreshold::new(10.0, 20.0, false).unwrap();
        assert!(t.triggers(5.0));
        assert!(!t.triggers(10.0));
        assert!(!t.triggers(15.0));
        assert!(!t.triggers(20.0));
        assert!(t.triggers(25.0));
    }

    #[test]
    fn test_absolute_band_inverted() {
        // under = true: the bad range is strictly between above and below.
        let t = AbsoluteThreshold::new(20.0, 10.0, true).unwrap();
        assert!(!t.triggers(5.0));
        assert!(t.triggers(15.0));
        assert!(!t.triggers(25.0));
        assert!(!t.triggers(10.0));
        assert!(!t.triggers(20.0));
    }

    #[test]
    fn test_spec_band_example() {
        // below 10, above 20, outside-band semantics.
        let desc = QualityDescriptor::new()
            .with_warning_absolute(AbsoluteThreshold::new(10.0, 20.0, false).unwrap());
        assert_ne!(desc.classify_numeric(5.0, None), Quality::Valid);
        assert_eq!(desc.classify_numeric(15.0, None), Quality::Valid);
        assert_ne!(desc.classify_numeric(25.0, None), Quality::Valid);
    }

    #[test]
    fn test_discrete_tables() {
        let desc = QualityDescriptor::new()
            .with_alarm_values(vec![Value::Byte(0)])
            .with_warning_values(vec![Value::Byte(0), Value::Byte(1)]);
        // Overlap resolves to the worst rank.
        assert_eq!(desc.classify(&Value::Byte(0), None), Quality::Alarm);
        assert_eq!(desc.classify(&Value::Byte(1), None), Quality::Warning);
        assert_eq!(desc.classify(&Value::Byte(2), None), Quality::Valid);
    }

    #[test]
    fn test_relative_threshold_requires_buffer() {
        let desc = QualityDescriptor::new()
            .with_changing_relative(RelativeThreshold { std_dev: 0.5 });
        assert!(desc.needs_stats());

        // Without a buffer the rule cannot trigger.
        assert_eq!(desc.classify(&Value::Float32(1.0), None), Quality::Valid);

        let mut buf = StatBuffer::new(4);
        for v in [0.0, 10.0, 0.0, 10.0] {
            buf.append(v);
        }
        assert_eq!(
            desc.classify(&Value::Float32(1.0), Some(&buf)),
            Quality::Changing
        );

        let mut steady = StatBuffer::new(4);
        for _ in 0..4 {
            steady.append(5.0);
        }
        assert_eq!(
            desc.classify(&Value::Float32(5.0), Some(&steady)),
            Quality::Valid
        );
    }

    #[test]
    fn test_alarm_outranks_changing() {
        let desc = QualityDescriptor::new()
            .with_alarm_absolute(AbsoluteThreshold::new(0.0, 100.0, false).unwrap())
            .with_changing_relative(RelativeThreshold { std_dev: 0.1 });
        let mut buf = StatBuffer::new(2);
        buf.append(0.0);
        buf.append(200.0);
        assert_eq!(
            desc.classify(&Value::Float32(200.0), Some(&buf)),
            Quality::Alarm
        );
    }
}
