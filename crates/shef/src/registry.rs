//! Canonical SHEF parameter tables
//!
//! The registry is built once at startup from the built-in defaults,
//! optionally modified by a SHEFPARM override file, and is immutable for
//! the rest of the run. Decoder runs share it by reference.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;

use log::{info, warn};

use crate::builtin;
use crate::error::ShefError;

/// Default parameter-code positions filled in when a message leaves them out
pub const DEFAULT_DURATION_CODE: char = 'I';
pub const DEFAULT_TYPE_CODE: char = 'R';
pub const DEFAULT_SOURCE_CODE: char = 'Z';
pub const DEFAULT_EXTREMUM_CODE: char = 'Z';
pub const DEFAULT_PROBABILITY_CODE: char = 'Z';

const BUILTIN_MAX_ERRORS: u32 = 1500;

/// Physical-element lookup result
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeEntry {
    /// SI-to-English multiplier; -1.0 selects Celsius→Fahrenheit
    pub conversion_factor: f64,
    /// Duration letter assumed when the code omits one
    pub default_duration: char,
}

/// One change or rejection recorded while merging a SHEFPARM file
#[derive(Clone, Debug)]
pub struct OverrideDiagnostic {
    /// 1-based line number within the SHEFPARM text
    pub line: usize,
    pub severity: log::Level,
    pub message: String,
}

/// The canonical code tables (C1)
#[derive(Clone, Debug)]
pub struct ParamRegistry {
    pe_conversions: BTreeMap<String, f64>,
    additional_pe_codes: BTreeSet<String>,
    send_codes: BTreeMap<String, (String, bool)>,
    duration_codes: BTreeMap<char, i32>,
    duration_ids: HashMap<i32, char>,
    ts_codes: BTreeSet<String>,
    extremum_codes: BTreeSet<char>,
    probability_codes: BTreeMap<char, f64>,
    qualifier_codes: BTreeSet<char>,
    max_errors: u32,
}

impl Default for ParamRegistry {
    fn default() -> Self {
        let mut reg = ParamRegistry {
            pe_conversions: builtin::PE_CONVERSIONS
                .entries()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            additional_pe_codes: BTreeSet::new(),
            send_codes: builtin::SEND_CODES
                .entries()
                .map(|(k, (code, flag))| (k.to_string(), (code.to_string(), *flag)))
                .collect(),
            duration_codes: builtin::DURATION_CODES
                .entries()
                .map(|(k, v)| (*k, *v))
                .collect(),
            duration_ids: HashMap::new(),
            ts_codes: builtin::TS_CODES.iter().map(|s| s.to_string()).collect(),
            extremum_codes: builtin::EXTREMUM_CODES.iter().copied().collect(),
            probability_codes: builtin::PROBABILITY_CODES
                .entries()
                .map(|(k, v)| (*k, *v))
                .collect(),
            qualifier_codes: builtin::QUALIFIER_CODES.iter().copied().collect(),
            max_errors: BUILTIN_MAX_ERRORS,
        };
        reg.rebuild_duration_ids();
        reg
    }
}

impl ParamRegistry {
    /// Built-in defaults modified by one SHEFPARM file
    pub fn with_shefparm(text: &str) -> (Self, Vec<OverrideDiagnostic>) {
        let mut reg = Self::default();
        let diags = reg.merge_shefparm(text);
        (reg, diags)
    }

    /// Physical-element entry, if the code is known
    pub fn lookup_pe(&self, code: &str) -> Option<PeEntry> {
        self.pe_conversions.get(code).map(|&f| PeEntry {
            conversion_factor: f,
            default_duration: self.default_duration_for(code),
        })
    }

    /// Whether a PE code is recognized (standard, send, or loader-added)
    pub fn is_recognized_pe(&self, code: &str) -> bool {
        self.pe_conversions.contains_key(code)
            || self.additional_pe_codes.contains(code)
            || self.send_codes.contains_key(code)
    }

    /// Extra PE codes contributed by a loader
    pub fn add_additional_pe_codes<I: IntoIterator<Item = String>>(&mut self, codes: I) {
        for code in codes {
            if !self.is_recognized_pe(&code) {
                info!("PE code [{}] is now recognized", code);
                self.additional_pe_codes.insert(code);
            }
        }
    }

    /// Send-code expansion and its previous-07:00 flag
    pub fn lookup_send(&self, code: &str) -> Option<(&str, bool)> {
        self.send_codes.get(code).map(|(c, f)| (c.as_str(), *f))
    }

    /// Numeric equivalent of a duration letter
    pub fn lookup_duration_code(&self, c: char) -> Option<i32> {
        self.duration_codes.get(&c).copied()
    }

    /// Duration letter for a numeric duration, if one exists
    pub fn duration_id(&self, number: i32) -> Option<char> {
        self.duration_ids.get(&number).copied()
    }

    /// Default duration letter for a PE code
    pub fn default_duration_for(&self, pe: &str) -> char {
        self.default_duration_override(pe)
            .unwrap_or(DEFAULT_DURATION_CODE)
    }

    /// The non-instantaneous default duration, for the PE codes that have one
    pub fn default_duration_override(&self, pe: &str) -> Option<char> {
        builtin::DEFAULT_DURATION_CODES.get(pe).copied()
    }

    /// Numeric base for a DV variable-duration unit letter
    pub fn variable_duration_base(&self, unit: char) -> Option<i32> {
        builtin::DURATION_VARIABLE_CODES.get(&unit).copied()
    }

    pub fn lookup_type_source(&self, code: &str) -> bool {
        self.ts_codes.contains(code)
    }

    pub fn lookup_extremum(&self, c: char) -> bool {
        self.extremum_codes.contains(&c)
    }

    pub fn lookup_probability(&self, c: char) -> Option<f64> {
        self.probability_codes.get(&c).copied()
    }

    /// Probability letter whose numeric value matches `value`
    pub fn probability_code_for(&self, value: f64) -> Option<char> {
        self.probability_codes
            .iter()
            .find(|(_, &v)| (v - value).abs() < 1e-6)
            .map(|(&c, _)| c)
    }

    pub fn lookup_qualifier(&self, c: char) -> bool {
        self.qualifier_codes.contains(&c)
    }

    /// Recoverable-error budget for one decoding run
    pub fn max_errors(&self) -> u32 {
        self.max_errors
    }

    /// Convert a value to English units for the given PE code
    pub fn to_english(&self, value: f64, pe: &str) -> Result<f64, ShefError> {
        let factor = self
            .pe_conversions
            .get(&pe[..2.min(pe.len())].to_ascii_uppercase())
            .copied()
            .ok_or_else(|| {
                ShefError::RegistryMiss(format!("no conversion factor for PE code [{}]", pe))
            })?;
        if factor == -1.0 {
            Ok(value * 1.8 + 32.0)
        } else {
            Ok(value * factor)
        }
    }

    /// Expand a partial parameter code to the full 7-character form
    ///
    /// Returns the expanded code and whether a send code with the
    /// previous-07:00 rule was used. Missing positions are filled with the
    /// registry defaults; `Z` placeholders for duration and type are
    /// replaced the way the SHEF manual specifies.
    pub fn expand_parameter_code(&self, partial: &str) -> Result<(String, bool), ShefError> {
        if partial.split_whitespace().count() != 1 {
            return Err(ShefError::Syntax(format!(
                "invalid parameter code: [{}]",
                partial
            )));
        }
        let partial = partial.trim();
        if !partial.is_ascii() || partial.len() < 2 {
            return Err(ShefError::Syntax(format!(
                "parameter code [{}] must be 2-7 characters long",
                partial
            )));
        }
        let mut use_prev_7am = false;
        let mut send_expanded = false;
        let mut code: String = match self.send_codes.get(&partial[..2]) {
            Some((expansion, flag)) => {
                use_prev_7am = *flag;
                if partial.len() != 2 && !self.pe_conversions.contains_key(&partial[..2]) {
                    return Err(ShefError::RegistryMiss(format!(
                        "invalid parameter code: [{}] - {} is send code for {}",
                        partial,
                        &partial[..2],
                        expansion
                    )));
                }
                if partial.len() == 2 {
                    send_expanded = true;
                    expansion.clone()
                } else {
                    partial.to_string()
                }
            }
            None => partial.to_string(),
        };
        let length = code.len();
        if !(2..=7).contains(&length) {
            return Err(ShefError::Syntax(format!(
                "parameter code [{}] must be 2-7 characters long",
                partial
            )));
        }
        let mut chars: Vec<char> = code.chars().collect();
        if length > 2 && chars[2] == 'Z' && !send_expanded {
            chars[2] = self.default_duration_for(&code[..2]);
        }
        if length > 3 && chars[3] == 'Z' {
            chars[3] = DEFAULT_TYPE_CODE;
        }
        code = chars.into_iter().collect();
        match length {
            2 => {
                let dur = self.default_duration_for(&code[..2]);
                code.push(dur);
                code.push(DEFAULT_TYPE_CODE);
                code.push(DEFAULT_SOURCE_CODE);
                code.push(DEFAULT_EXTREMUM_CODE);
                code.push(DEFAULT_PROBABILITY_CODE);
            }
            3 => {
                code.push(DEFAULT_TYPE_CODE);
                code.push(DEFAULT_SOURCE_CODE);
                code.push(DEFAULT_EXTREMUM_CODE);
                code.push(DEFAULT_PROBABILITY_CODE);
            }
            4 => {
                code.push(DEFAULT_SOURCE_CODE);
                code.push(DEFAULT_EXTREMUM_CODE);
                code.push(DEFAULT_PROBABILITY_CODE);
            }
            5 => {
                code.push(DEFAULT_EXTREMUM_CODE);
                code.push(DEFAULT_PROBABILITY_CODE);
            }
            6 => code.push(DEFAULT_PROBABILITY_CODE),
            _ => {}
        }
        let chars: Vec<char> = code.chars().collect();
        if !self.duration_codes.contains_key(&chars[2]) {
            return Err(ShefError::RegistryMiss(format!(
                "invalid duration code [{}] in parameter code [{}]",
                chars[2], code
            )));
        }
        if !self.ts_codes.contains(&code[3..5]) {
            return Err(ShefError::RegistryMiss(format!(
                "invalid type and source code [{}] in parameter code [{}]",
                &code[3..5],
                code
            )));
        }
        if !self.extremum_codes.contains(&chars[5]) {
            return Err(ShefError::RegistryMiss(format!(
                "invalid extremum code [{}] in parameter code [{}]",
                chars[5], code
            )));
        }
        if !self.probability_codes.contains_key(&chars[6]) {
            return Err(ShefError::RegistryMiss(format!(
                "invalid probability code [{}] in parameter code [{}]",
                chars[6], code
            )));
        }
        Ok((code, use_prev_7am))
    }

    fn rebuild_duration_ids(&mut self) {
        self.duration_ids = self
            .duration_codes
            .iter()
            .map(|(&c, &n)| (n, c))
            .collect();
    }

    /// Apply one SHEFPARM override file
    ///
    /// Every change to a standard table entry is reported; an illegal line
    /// is reported and ignored and never aborts construction.
    pub fn merge_shefparm(&mut self, text: &str) -> Vec<OverrideDiagnostic> {
        let mut diags = Vec::new();
        let mut section: Option<char> = None;
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end();
            if line.is_empty() || line.starts_with('$') || line.to_uppercase().starts_with("SHEFPARM")
            {
                continue;
            }
            if !line.is_ascii() {
                log_diag(
                    &mut diags,
                    line_no,
                    log::Level::Warn,
                    format!("non-ASCII SHEFPARM line ignored: [{}]", line),
                );
                continue;
            }
            if let Some(marker) = line.strip_prefix('*') {
                match marker.chars().next() {
                    Some(c @ ('1'..='7' | '*')) => section = Some(c),
                    _ => log_diag(
                        &mut diags,
                        line_no,
                        log::Level::Warn,
                        format!("unexpected SHEFPARM section marker: [{}]", line),
                    ),
                }
                continue;
            }
            let result = match section {
                Some('1') => self.merge_pe_line(line, line_no, &mut diags),
                Some('2') => self.merge_duration_line(line, line_no, &mut diags),
                Some('3') => self.merge_ts_line(line, line_no, &mut diags),
                Some('4') => self.merge_extremum_line(line, line_no, &mut diags),
                Some('5') => self.merge_probability_line(line, line_no, &mut diags),
                Some('6') => self.merge_send_line(line, line_no, &mut diags),
                Some('7') => self.merge_qualifier_line(line, line_no, &mut diags),
                Some('*') => self.merge_max_errors_line(line, line_no, &mut diags),
                _ => {
                    log_diag(
                        &mut diags,
                        line_no,
                        log::Level::Warn,
                        format!("no SHEFPARM section for line: [{}]", line),
                    );
                    Ok(())
                }
            };
            if let Err(msg) = result {
                log_diag(&mut diags, line_no, log::Level::Warn, msg);
            }
        }
        self.rebuild_duration_ids();
        diags
    }

    fn merge_pe_line(
        &mut self,
        line: &str,
        line_no: usize,
        diags: &mut Vec<OverrideDiagnostic>,
    ) -> Result<(), String> {
        if line.len() < 4 {
            return Err(format!("illegal PE line: [{}]", line));
        }
        let key = line[..2].to_string();
        let value: f64 = line[3..line.len().min(23)]
            .trim()
            .parse()
            .map_err(|_| format!("illegal PE conversion factor: [{}]", line))?;
        match self.pe_conversions.get(&key) {
            None => {
                if !self.send_codes.contains_key(&key) {
                    log_diag(
                        diags,
                        line_no,
                        log::Level::Info,
                        format!(
                            "adding non-standard physical element code [{}] with conversion factor [{}]",
                            key, value
                        ),
                    );
                }
            }
            Some(&old) => {
                let ratio = value / old;
                if !(0.9999..=1.001).contains(&ratio) {
                    log_diag(
                        diags,
                        line_no,
                        log::Level::Warn,
                        format!(
                            "updating standard physical element code [{}] conversion factor from [{}] to [{}]",
                            key, old, value
                        ),
                    );
                }
            }
        }
        self.pe_conversions.insert(key, value);
        Ok(())
    }

    fn merge_duration_line(
        &mut self,
        line: &str,
        line_no: usize,
        diags: &mut Vec<OverrideDiagnostic>,
    ) -> Result<(), String> {
        let key = line.chars().next().ok_or("empty duration line")?;
        if line.len() < 4 {
            return Err(format!("illegal duration line: [{}]", line));
        }
        let value: i32 = line[3..line.len().min(8)]
            .trim()
            .parse()
            .map_err(|_| format!("illegal duration value: [{}]", line))?;
        match self.duration_codes.get(&key) {
            None => log_diag(
                diags,
                line_no,
                log::Level::Info,
                format!(
                    "adding non-standard duration code [{}] with numerical value [{}]",
                    key, value
                ),
            ),
            Some(&old) if old != value => log_diag(
                diags,
                line_no,
                log::Level::Warn,
                format!(
                    "updating standard duration code [{}] numerical value from [{}] to [{}]",
                    key, old, value
                ),
            ),
            _ => {}
        }
        self.duration_codes.insert(key, value);
        Ok(())
    }

    fn merge_ts_line(
        &mut self,
        line: &str,
        line_no: usize,
        diags: &mut Vec<OverrideDiagnostic>,
    ) -> Result<(), String> {
        if line.len() < 2 {
            return Err(format!("illegal TS line: [{}]", line));
        }
        let key = line[..2].to_string();
        let enabled = flag_column(line, 3, 5);
        if enabled {
            if self.ts_codes.insert(key.clone()) {
                log_diag(
                    diags,
                    line_no,
                    log::Level::Info,
                    format!("adding non-standard type-and-source code [{}]", key),
                );
            }
        } else if self.ts_codes.remove(&key) {
            log_diag(
                diags,
                line_no,
                log::Level::Warn,
                format!("disabling standard type-and-source code [{}]", key),
            );
        }
        Ok(())
    }

    fn merge_extremum_line(
        &mut self,
        line: &str,
        line_no: usize,
        diags: &mut Vec<OverrideDiagnostic>,
    ) -> Result<(), String> {
        let key = line.chars().next().ok_or("empty extremum line")?;
        let enabled = flag_column(line, 3, 5);
        if enabled {
            if self.extremum_codes.insert(key) {
                log_diag(
                    diags,
                    line_no,
                    log::Level::Info,
                    format!("adding non-standard extremum code [{}]", key),
                );
            }
        } else if self.extremum_codes.remove(&key) {
            log_diag(
                diags,
                line_no,
                log::Level::Warn,
                format!("disabling standard extremum code [{}]", key),
            );
        }
        Ok(())
    }

    fn merge_probability_line(
        &mut self,
        line: &str,
        line_no: usize,
        diags: &mut Vec<OverrideDiagnostic>,
    ) -> Result<(), String> {
        let key = line.chars().next().ok_or("empty probability line")?;
        if line.len() < 3 {
            return Err(format!("illegal probability line: [{}]", line));
        }
        let value: f64 = line[2..line.len().min(22)]
            .trim()
            .parse()
            .map_err(|_| format!("illegal probability value: [{}]", line))?;
        match self.probability_codes.get(&key) {
            None => log_diag(
                diags,
                line_no,
                log::Level::Info,
                format!(
                    "adding non-standard probability code [{}] with value [{}]",
                    key, value
                ),
            ),
            Some(&old) if old != value => log_diag(
                diags,
                line_no,
                log::Level::Warn,
                format!(
                    "updating standard probability code [{}] value from [{}] to [{}]",
                    key, old, value
                ),
            ),
            _ => {}
        }
        self.probability_codes.insert(key, value);
        Ok(())
    }

    fn merge_send_line(
        &mut self,
        line: &str,
        line_no: usize,
        diags: &mut Vec<OverrideDiagnostic>,
    ) -> Result<(), String> {
        if line.len() < 4 {
            return Err(format!("illegal send code line: [{}]", line));
        }
        let key = line[..2].to_string();
        let expansion = line[3..line.len().min(10)].trim_end().to_string();
        let prev_7am = line.len() > 12 && line.as_bytes()[12] == b'1';
        let value = (expansion, prev_7am);
        match self.send_codes.get(&key) {
            None => log_diag(
                diags,
                line_no,
                log::Level::Info,
                format!(
                    "adding non-standard send code [{}] with parameter [{}] and use-prev-0700 = [{}]",
                    key, value.0, value.1
                ),
            ),
            Some(old) if *old != value => log_diag(
                diags,
                line_no,
                log::Level::Warn,
                format!(
                    "updating standard send code [{}] from parameter [{}] and use-prev-0700 = [{}] \
                     to parameter [{}] and use-prev-0700 = [{}]",
                    key, old.0, old.1, value.0, value.1
                ),
            ),
            _ => {}
        }
        self.send_codes.insert(key, value);
        Ok(())
    }

    fn merge_qualifier_line(
        &mut self,
        line: &str,
        line_no: usize,
        diags: &mut Vec<OverrideDiagnostic>,
    ) -> Result<(), String> {
        let key = line.chars().next().ok_or("empty qualifier line")?;
        if !key.is_ascii_uppercase() || key == 'I' || key == 'O' {
            return Err(format!("invalid data qualifier: [{}]", key));
        }
        if self.qualifier_codes.insert(key) {
            log_diag(
                diags,
                line_no,
                log::Level::Info,
                format!("adding non-standard data qualifier code [{}]", key),
            );
        }
        Ok(())
    }

    fn merge_max_errors_line(
        &mut self,
        line: &str,
        line_no: usize,
        diags: &mut Vec<OverrideDiagnostic>,
    ) -> Result<(), String> {
        let value: u32 = line[..line.len().min(4)]
            .replace(' ', "")
            .parse()
            .map_err(|_| format!("illegal max error count: [{}]", line))?;
        if value != self.max_errors {
            log_diag(
                diags,
                line_no,
                log::Level::Info,
                format!("maximum error count set to [{}]", value),
            );
        }
        self.max_errors = value;
        Ok(())
    }

    /// Render the current registry state in SHEFPARM form
    ///
    /// Re-merging the output into the built-in defaults reproduces this
    /// registry.
    pub fn emit_shefparm(&self) -> String {
        let mut out = String::new();
        out.push_str("$\n$ SHEF parameter data\n$\nSHEFPARM\n");
        out.push_str("*1                      PE CODES AND CONVERSION FACTORS\n");
        let mut conversions = self.pe_conversions.clone();
        for (code, (target, _)) in &self.send_codes {
            if let Some(&factor) = self.pe_conversions.get(&target[..2.min(target.len())]) {
                conversions.entry(code.clone()).or_insert(factor);
            }
        }
        for (code, factor) in &conversions {
            let _ = writeln!(out, "{} {:?}", code, factor);
        }
        out.push_str("*2                      DURATION CODES AND ASSOCIATED VALUES\n");
        for (code, value) in &self.duration_codes {
            let _ = writeln!(out, "{}   {:04}", code, value);
        }
        out.push_str("*3                      TS CODES\n");
        for code in &self.ts_codes {
            let _ = writeln!(out, "{}  1", code);
        }
        out.push_str("*4                      EXTREMUM CODES\n");
        for code in &self.extremum_codes {
            let _ = writeln!(out, "{}   1", code);
        }
        out.push_str("*5                      PROBABILITY CODES AND ASSOCIATED VALUES\n");
        for (code, value) in &self.probability_codes {
            let _ = writeln!(out, "{} {:?}", code, value);
        }
        out.push_str("*6                      SEND CODES OR DURATION DEFAULTS OTHER THAN I\n");
        for (code, (target, prev_7am)) in &self.send_codes {
            let _ = writeln!(
                out,
                "{} {:<7}{}",
                code,
                target,
                if *prev_7am { "  1" } else { "" }
            );
        }
        out.push_str("*7                      DATA QUALIFIER CODES\n");
        for code in &self.qualifier_codes {
            let _ = writeln!(out, "{}", code);
        }
        out.push_str("**                      MAX NUMBER OF ERRORS (I4 FORMAT)\n");
        let _ = writeln!(out, "{:4}", self.max_errors);
        out.push_str("**\n");
        out
    }
}

// enable/disable column shared by the TS and extremum sections
fn flag_column(line: &str, start: usize, end: usize) -> bool {
    if line.len() > start {
        line[start..line.len().min(end)]
            .trim()
            .parse::<i32>()
            .map(|v| v != 0)
            .unwrap_or(false)
    } else {
        false
    }
}

fn log_diag(diags: &mut Vec<OverrideDiagnostic>, line: usize, severity: log::Level, message: String) {
    match severity {
        log::Level::Warn => warn!("SHEFPARM line {}: {}", line, message),
        _ => info!("SHEFPARM line {}: {}", line, message),
    }
    diags.push(OverrideDiagnostic {
        line,
        severity,
        message,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookups() {
        let reg = ParamRegistry::default();
        let hg = reg.lookup_pe("HG").unwrap();
        assert_eq!(hg.conversion_factor, 3.2808399);
        assert_eq!(hg.default_duration, 'I');
        assert_eq!(reg.lookup_pe("PP").unwrap().default_duration, 'D');
        assert!(reg.lookup_pe("XX").is_none());
        assert_eq!(reg.lookup_duration_code('I'), Some(0));
        assert_eq!(reg.lookup_duration_code('H'), Some(1001));
        assert_eq!(reg.duration_id(2001), Some('D'));
        assert!(reg.lookup_type_source("RZ"));
        assert!(!reg.lookup_type_source("QQ"));
        assert!(reg.lookup_extremum('X'));
        assert_eq!(reg.lookup_probability('Z'), Some(-1.0));
        assert_eq!(reg.probability_code_for(-1.0), Some('Z'));
        assert!(reg.lookup_qualifier('Z'));
        assert_eq!(reg.max_errors(), 1500);
    }

    #[test]
    fn test_celsius_conversion() {
        let reg = ParamRegistry::default();
        // TA carries the -1.0 marker
        assert_eq!(reg.to_english(0.0, "TA").unwrap(), 32.0);
        assert_eq!(reg.to_english(100.0, "TA").unwrap(), 212.0);
        // HG is a straight multiplier
        assert!((reg.to_english(1.0, "HG").unwrap() - 3.2808399).abs() < 1e-9);
    }

    #[test]
    fn test_expand_parameter_code() {
        let reg = ParamRegistry::default();
        assert_eq!(
            reg.expand_parameter_code("HT").unwrap(),
            ("HTIRZZZ".to_string(), false)
        );
        // PP defaults to a daily duration
        assert_eq!(
            reg.expand_parameter_code("PP").unwrap(),
            ("PPDRZZZ".to_string(), false)
        );
        // explicit positions survive
        assert_eq!(
            reg.expand_parameter_code("HGIRZXZ").unwrap(),
            ("HGIRZXZ".to_string(), false)
        );
        // Z duration placeholder is replaced
        assert_eq!(
            reg.expand_parameter_code("HGZRZ").unwrap(),
            ("HGIRZZZ".to_string(), false)
        );
        // send codes expand, HY carries the previous-07:00 rule
        assert_eq!(
            reg.expand_parameter_code("HN").unwrap(),
            ("HGIRZNZ".to_string(), false)
        );
        assert_eq!(
            reg.expand_parameter_code("HY").unwrap(),
            ("HGIRZZZ".to_string(), true)
        );
        // bad pieces are registry misses
        assert!(matches!(
            reg.expand_parameter_code("HGIQQ"),
            Err(ShefError::RegistryMiss(_))
        ));
    }

    #[test]
    fn test_shefparm_merge_and_emit() {
        let mut reg = ParamRegistry::default();
        let text = "\
$ comment
SHEFPARM
*1                      PE CODES AND CONVERSION FACTORS
ZQ 2.5
*7                      DATA QUALIFIER CODES
K
**                      MAX NUMBER OF ERRORS (I4 FORMAT)
 250
";
        let diags = reg.merge_shefparm(text);
        assert_eq!(reg.lookup_pe("ZQ").unwrap().conversion_factor, 2.5);
        assert!(reg.lookup_qualifier('K'));
        assert_eq!(reg.max_errors(), 250);
        assert!(diags.iter().all(|d| d.severity == log::Level::Info));

        // round trip: emit, re-merge into fresh defaults, emit again
        let emitted = reg.emit_shefparm();
        let mut reg2 = ParamRegistry::default();
        reg2.merge_shefparm(&emitted);
        assert_eq!(emitted, reg2.emit_shefparm());
    }

    #[test]
    fn test_shefparm_illegal_lines_ignored() {
        let mut reg = ParamRegistry::default();
        let diags = reg.merge_shefparm("*1  PE CODES\nBAD LINE WITH NO FACTOR x\n*9 nothing\n");
        assert!(diags.iter().any(|d| d.severity == log::Level::Warn));
        // registry is still usable
        assert!(reg.lookup_pe("HG").is_some());
    }
}
