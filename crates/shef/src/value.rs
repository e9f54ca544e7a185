//! Decoded observation records

use chrono::{DateTime, Utc};

use crate::error::ShefError;
use crate::registry::ParamRegistry;

/// Sentinel for an explicitly missing value
pub const MISSING_VALUE: f64 = -9999.0;

/// Value reported for a precipitation trace
pub const TRACE_VALUE: f64 = 0.001;

/// One fully-decoded SHEF observation
///
/// Everything a loader or the text emitter needs: times are UTC, the value
/// is in English units, and the parameter code is the full seven-character
/// `PEDTSEP` form (physical element, duration, type, source, extremum,
/// probability) with registry defaults filled in.
#[derive(Clone, Debug, PartialEq)]
pub struct ShefValue {
    /// SHEF station identifier (3-8 letters/digits)
    pub location: String,
    /// Observation time, UTC
    pub obs_time: DateTime<Utc>,
    /// Creation time, UTC; absent renders as the null time
    pub creation_time: Option<DateTime<Utc>>,
    /// Full 7-character parameter code
    pub parameter_code: String,
    /// Parameter code exactly as it appeared in the message
    pub orig_parameter_code: String,
    /// Value in English units; [`MISSING_VALUE`] when missing
    pub value: f64,
    /// Data qualifier letter, default `Z`
    pub qualifier: char,
    /// Numeric probability for the code's probability letter
    pub probability: f64,
    /// From the `R` suffix of the message header
    pub revised: bool,
    /// `DV` override unit letter, `Z` when none
    pub duration_unit: char,
    /// `DV` override magnitude
    pub duration_value: Option<i32>,
    /// Header field of the enclosing `.B` message
    pub message_source: Option<String>,
    /// 1 for the first value of a (location, parameter, qualifier) run
    /// within one message, 2 thereafter. Meaningless across messages.
    pub time_series_code: u8,
    /// Retained comment, without its quotes; empty when none
    pub comment: String,
}

impl ShefValue {
    /// Physical element code (first two characters)
    pub fn pe_code(&self) -> &str {
        &self.parameter_code[..2]
    }

    /// Duration letter (third character)
    pub fn duration_code(&self) -> char {
        self.parameter_code.as_bytes()[2] as char
    }

    pub fn type_code(&self) -> char {
        self.parameter_code.as_bytes()[3] as char
    }

    pub fn source_code(&self) -> char {
        self.parameter_code.as_bytes()[4] as char
    }

    pub fn extremum_code(&self) -> char {
        self.parameter_code.as_bytes()[5] as char
    }

    pub fn probability_code(&self) -> char {
        self.parameter_code.as_bytes()[6] as char
    }

    /// Whether the value is the missing sentinel
    pub fn is_missing(&self) -> bool {
        self.value == MISSING_VALUE
    }

    /// Numeric duration code for the output formats
    ///
    /// A `V` duration requires a `DV` override; a `Z` duration falls back
    /// to the PE code's default duration.
    pub fn duration_code_number(&self, registry: &ParamRegistry) -> Result<i32, ShefError> {
        match self.duration_code() {
            'V' => match (self.duration_unit, self.duration_value) {
                (unit, Some(value)) if unit != 'Z' => registry
                    .variable_duration_base(unit)
                    .map(|base| base + value)
                    .ok_or_else(|| {
                        ShefError::RegistryMiss(format!(
                            "invalid variable duration unit [{}]",
                            unit
                        ))
                    }),
                _ => Err(ShefError::Context(format!(
                    "no duration specified for parameter code [{}]",
                    self.parameter_code
                ))),
            },
            'Z' => {
                // a Z duration survives only in send-code expansions; it
                // resolves to the PE default, or to Z's own number
                let letter = registry
                    .default_duration_override(self.pe_code())
                    .unwrap_or('Z');
                registry.lookup_duration_code(letter).ok_or_else(|| {
                    ShefError::RegistryMiss(format!("invalid duration code [{}]", letter))
                })
            }
            c => registry.lookup_duration_code(c).ok_or_else(|| {
                ShefError::RegistryMiss(format!("invalid duration code [{}]", c))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> ShefValue {
        ShefValue {
            location: "KEYO2".to_string(),
            obs_time: Utc.with_ymd_and_hms(2025, 11, 7, 14, 0, 0).unwrap(),
            creation_time: None,
            parameter_code: "HTIRZZZ".to_string(),
            orig_parameter_code: "HT".to_string(),
            value: 637.74,
            qualifier: 'Z',
            probability: -1.0,
            revised: false,
            duration_unit: 'Z',
            duration_value: None,
            message_source: None,
            time_series_code: 1,
            comment: String::new(),
        }
    }

    #[test]
    fn test_code_accessors() {
        let v = sample();
        assert_eq!(v.pe_code(), "HT");
        assert_eq!(v.duration_code(), 'I');
        assert_eq!(v.type_code(), 'R');
        assert_eq!(v.source_code(), 'Z');
        assert_eq!(v.extremum_code(), 'Z');
        assert_eq!(v.probability_code(), 'Z');
        assert!(!v.is_missing());
    }

    #[test]
    fn test_duration_number() {
        let reg = ParamRegistry::default();
        let mut v = sample();
        assert_eq!(v.duration_code_number(&reg).unwrap(), 0);

        v.parameter_code = "HTHRZZZ".to_string();
        assert_eq!(v.duration_code_number(&reg).unwrap(), 1001);

        // V duration needs the DV override
        v.parameter_code = "HTVRZZZ".to_string();
        assert!(v.duration_code_number(&reg).is_err());
        v.duration_unit = 'H';
        v.duration_value = Some(6);
        assert_eq!(v.duration_code_number(&reg).unwrap(), 1006);
    }
}
