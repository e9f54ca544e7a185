//! Message decoding (C3)
//!
//! One [`MessageRecord`] in, an ordered list of [`ShefValue`]s out. The
//! decoder keeps a mutable bag of inherited defaults for the lifetime of a
//! message (observation time, creation time, units, qualifier, variable
//! duration, retained comment); body `D*` tokens mutate the bag for
//! subsequent values only. Errors are recoverable by default: the bad
//! field is skipped and decoding resumes at the next delimiter. In strict
//! mode a single error discards the whole message.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use lazy_static::lazy_static;
use log::{error, warn};
use regex::Regex;

use crate::error::ShefError;
use crate::registry::ParamRegistry;
use crate::time::{self, add_months, to_utc, CalendarShift, ShefZone, TimeModel};
use crate::tokenizer::{MessageKind, MessageRecord};
use crate::value::{ShefValue, MISSING_VALUE, TRACE_VALUE};

lazy_static! {
    static ref POSITIONAL: Regex = Regex::new(
        r"(?i)^\.[AEB]R?[ \t]+([0-9A-Za-z]{3,8})[ \t]+((?:\d{2})?(?:\d{2})?\d{4})([ \t]+([NAECMPYLHB][DS]?|[JZ]))?\s"
    )
    .expect("bad positional regexp");
    static ref TIME_CHUNK: Regex =
        Regex::new(r"(?i)D(?:R[SNHDMYE][+-]?\d+|[SNHDMY]\d+|T\d+|J\d{1,7})")
            .expect("bad time chunk regexp");
    static ref CREATE_TOKEN: Regex = Regex::new(r"(?i)^DC\d+$").expect("bad DC regexp");
    static ref UNITS_TOKEN: Regex = Regex::new(r"(?i)^DU[ES]$").expect("bad DU regexp");
    static ref QUALIFIER_TOKEN: Regex = Regex::new(r"(?i)^DQ.$").expect("bad DQ regexp");
    static ref DURATION_TOKEN: Regex =
        Regex::new(r"(?i)^(DV[SNHDMY]\d{1,2}|DVZ)$").expect("bad DV regexp");
    static ref INTERVAL_TOKEN: Regex =
        Regex::new(r"(?i)^DI[SNHDMEY][+-]?\d{1,2}$").expect("bad DI regexp");
    static ref PARAM_TOKEN: Regex =
        Regex::new(r"^[A-CE-IL-NP-Y][A-Z][A-Z0-9]{0,5}$").expect("bad parameter regexp");
    static ref NUMBER_TOKEN: Regex =
        Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)$").expect("bad number regexp");
    static ref B_ROW: Regex =
        Regex::new(r"^[0-9A-Za-z]{3,8}[ \t]+\S").expect("bad row regexp");
}

/// Per-run decoder settings
#[derive(Clone, Copy, Debug)]
pub struct DecoderOptions {
    pub time_model: TimeModel,
    /// Reject every value from a message that produced any error
    pub strict: bool,
    /// Reference time for resolving dates written without a year
    pub now: DateTime<Utc>,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        DecoderOptions {
            time_model: TimeModel::Modern,
            strict: false,
            now: Utc::now(),
        }
    }
}

/// The message decoder
///
/// Holds the per-run error budget; the registry is shared read-only.
pub struct Decoder<'r> {
    registry: &'r ParamRegistry,
    opts: DecoderOptions,
    error_count: u32,
    warning_count: u32,
    exhausted: bool,
}

// inherited-context bag; cloned at segment boundaries so local overrides
// cannot leak backward
#[derive(Clone, Debug)]
struct Context {
    obstime: NaiveDateTime,
    last_explicit: NaiveDateTime,
    zone: ShefZone,
    century_specified: bool,
    relative_specified: bool,
    create_str: Option<String>,
    units_english: bool,
    qualifier: char,
    duration_unit: char,
    duration_value: Option<i32>,
    comment: Option<String>,
}

// strict-mode unwinding marker for .B decoding
struct Rejected;

// a parsed value token
enum Parsed {
    Value(f64),
    /// `+`: suppress emission entirely
    Null,
}

// one column declared in a .B header
#[derive(Clone, Debug)]
struct BColumn {
    param: String,
    orig: String,
    obstime: NaiveDateTime,
    use_prev_7am: bool,
    relative: Option<CalendarShift>,
    create_str: Option<String>,
    units_english: bool,
    qualifier: char,
    duration_unit: char,
    duration_value: Option<i32>,
}

impl<'r> Decoder<'r> {
    pub fn new(registry: &'r ParamRegistry, opts: DecoderOptions) -> Self {
        Decoder {
            registry,
            opts,
            error_count: 0,
            warning_count: 0,
            exhausted: false,
        }
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn warning_count(&self) -> u32 {
        self.warning_count
    }

    /// True once the error budget is spent; the run must stop
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    /// Decode one message into values, in document order
    ///
    /// Recoverable errors are logged and counted here. When the budget is
    /// exhausted mid-message, the values already decoded are returned and
    /// [`exhausted`](Self::exhausted) turns on.
    pub fn decode(&mut self, rec: &MessageRecord) -> Vec<ShefValue> {
        let mut values = match rec.kind {
            MessageKind::Unrecognized => {
                self.note_warning(rec, &format!("unrecognized line dropped: [{}]", rec.text));
                Vec::new()
            }
            MessageKind::A => self.decode_a(rec),
            MessageKind::E => self.decode_e(rec),
            MessageKind::B => self.decode_b(rec),
        };
        // time-series hint: 1 on each new (location, parameter, qualifier)
        // run within this message, 2 on the rest of the run
        let mut prev: Option<(String, String, char)> = None;
        for v in &mut values {
            let key = (v.location.clone(), v.parameter_code.clone(), v.qualifier);
            v.time_series_code = if prev.as_ref() == Some(&key) { 2 } else { 1 };
            prev = Some(key);
        }
        values
    }

    fn note_error(&mut self, rec: &MessageRecord, err: &ShefError) {
        error!("{} in message starting at line {}", err, rec.line_number);
        self.error_count += 1;
        if self.error_count > self.registry.max_errors() {
            self.exhausted = true;
        }
    }

    fn note_warning(&mut self, rec: &MessageRecord, text: &str) {
        warn!("{} in message starting at line {}", text, rec.line_number);
        self.warning_count += 1;
    }

    // ---- header ----------------------------------------------------------

    fn parse_header(
        &self,
        rec: &MessageRecord,
    ) -> Result<(String, NaiveDate, bool, ShefZone, usize), ShefError> {
        let caps = POSITIONAL.captures(&rec.text).ok_or_else(|| {
            ShefError::Syntax(format!(
                "mal-formed positional fields: [{}]",
                rec.text.lines().next().unwrap_or("")
            ))
        })?;
        let location = caps[1].to_ascii_uppercase();
        let zone = match caps.get(4) {
            Some(z) => ShefZone::try_from(z.as_str())?,
            None => ShefZone::Zulu,
        };
        let (date, century_specified) = self.parse_header_date(&caps[2], zone)?;
        let body_start = caps.get(0).expect("match exists").end();
        Ok((location, date, century_specified, zone, body_start))
    }

    // observation date from the header: mmdd, yymmdd, or ccyymmdd
    fn parse_header_date(
        &self,
        datestr: &str,
        _zone: ShefZone,
    ) -> Result<(NaiveDate, bool), ShefError> {
        let bad = || ShefError::Time(format!("bad date string: [{}]", datestr));
        let now = self.opts.now.naive_utc();
        let (cy, cm, cd) = (now.year(), now.month(), now.day());
        let mut century_specified = false;
        let (y, m, d) = match datestr.len() {
            4 => {
                let m: u32 = datestr[0..2].parse().map_err(|_| bad())?;
                let d: u32 = datestr[2..4].parse().map_err(|_| bad())?;
                (cy, m, d)
            }
            6 => {
                let yy: i32 = datestr[0..2].parse().map_err(|_| bad())?;
                let mut y = cy - cy % 100 + yy;
                if y - cy > 10 {
                    y -= 100;
                }
                (
                    y,
                    datestr[2..4].parse().map_err(|_| bad())?,
                    datestr[4..6].parse().map_err(|_| bad())?,
                )
            }
            8 => {
                century_specified = true;
                (
                    datestr[0..4].parse().map_err(|_| bad())?,
                    datestr[4..6].parse().map_err(|_| bad())?,
                    datestr[6..8].parse().map_err(|_| bad())?,
                )
            }
            _ => return Err(bad()),
        };
        if !(1700..=2100).contains(&y) || !(1..=12).contains(&m) || d < 1 || d > time::last_day(y, m)
        {
            return Err(bad());
        }
        let mut date = NaiveDate::from_ymd_opt(y, m, d).ok_or_else(bad)?;
        if datestr.len() == 4 {
            // no year given: use the closest calendar year
            date = match self.opts.time_model {
                TimeModel::Legacy => {
                    let mut y = cy;
                    let month_diff = cm as i32 - m as i32;
                    if month_diff > 6 || (month_diff == 6 && cd > d) {
                        y += 1;
                    } else if month_diff < -6 || (month_diff == -6 && cd < d) {
                        y -= 1;
                    }
                    NaiveDate::from_ymd_opt(y, m, d.min(time::last_day(y, m))).ok_or_else(bad)?
                }
                TimeModel::Modern => {
                    let today = NaiveDate::from_ymd_opt(cy, cm, cd).ok_or_else(bad)?;
                    let this_year = date;
                    let prev_year =
                        NaiveDate::from_ymd_opt(cy - 1, m, d.min(time::last_day(cy - 1, m)))
                            .ok_or_else(bad)?;
                    if today - prev_year < this_year - today {
                        prev_year
                    } else {
                        this_year
                    }
                }
            };
        }
        Ok((date, century_specified))
    }

    // ---- date/time tokens ------------------------------------------------

    // apply one token of concatenated date/time codes to the context.
    // `rebase` overrides the base for the first absolute code (used by .E
    // bodies, which restart from the header time). With `collect_relative`
    // a DR code is returned instead of applied (for .B columns).
    fn apply_time_token(
        &self,
        token: &str,
        ctx: &mut Context,
        rebase: Option<NaiveDateTime>,
        collect_relative: bool,
    ) -> Result<Option<CalendarShift>, ShefError> {
        let mut pending: Option<CalendarShift> = None;
        let mut base = rebase.unwrap_or(ctx.obstime);
        let mut covered = 0usize;
        let chunks: Vec<regex::Match> = TIME_CHUNK.find_iter(token).collect();
        if chunks.len() > 1 && chunks.iter().any(|c| is_julian(c.as_str())) {
            return Err(ShefError::Syntax(format!("bad observation time: [{}]", token)));
        }
        for chunk in &chunks {
            if chunk.start() != covered {
                break;
            }
            covered = chunk.end();
            let text = chunk.as_str().to_ascii_uppercase();
            if text.starts_with("DR") {
                let shift = parse_relative(&text)?;
                if collect_relative {
                    pending = Some(shift);
                } else {
                    ctx.obstime = shift.apply(ctx.last_explicit)?;
                    ctx.relative_specified = true;
                }
            } else {
                let t = self.absolute_time(base, ctx.century_specified, &text)?;
                ctx.obstime = t;
                ctx.last_explicit = t;
                base = t;
                ctx.relative_specified = false;
            }
        }
        if covered != token.len() {
            return Err(ShefError::Syntax(format!(
                "unexpected data string item: [{}]",
                token
            )));
        }
        Ok(pending)
    }

    // one absolute date/time code applied to base fields
    fn absolute_time(
        &self,
        base: NaiveDateTime,
        century_specified: bool,
        code: &str,
    ) -> Result<NaiveDateTime, ShefError> {
        let bad = || ShefError::Time(format!("bad observation time: [{}]", code));
        let v = &code[2..];
        let n = v.len();
        let num = |a: usize, b: usize| -> Result<u32, ShefError> {
            v.get(a..b).and_then(|s| s.parse().ok()).ok_or_else(bad)
        };
        let (by, bm, bd) = (base.year(), base.month(), base.day());
        let (bh, bn, bs) = (base.hour(), base.minute(), base.second());
        let built = match code.as_bytes()[1] {
            b'S' if n == 2 => civil(by, bm, bd, bh, bn, num(0, 2)?),
            b'N' if n == 4 => civil(by, bm, bd, bh, num(0, 2)?, num(2, 4)?),
            b'N' if n == 2 => civil(by, bm, bd, bh, num(0, 2)?, bs),
            b'H' if n == 6 => civil(by, bm, bd, num(0, 2)?, num(2, 4)?, num(4, 6)?),
            b'H' if n == 4 => civil(by, bm, bd, num(0, 2)?, num(2, 4)?, bs),
            b'H' if n == 2 => civil(by, bm, bd, num(0, 2)?, bn, bs),
            b'D' if n == 8 => civil(by, bm, num(0, 2)?, num(2, 4)?, num(4, 6)?, num(6, 8)?),
            b'D' if n == 6 => civil(by, bm, num(0, 2)?, num(2, 4)?, num(4, 6)?, bs),
            b'D' if n == 4 => civil(by, bm, num(0, 2)?, num(2, 4)?, bh, bs),
            b'D' if n == 2 => civil(by, bm, num(0, 2)?, bh, bn, bs),
            b'M' if n == 10 => {
                civil(by, num(0, 2)?, num(2, 4)?, num(4, 6)?, num(6, 8)?, num(8, 10)?)
            }
            b'M' if n == 8 => civil(by, num(0, 2)?, num(2, 4)?, num(4, 6)?, num(6, 8)?, bs),
            b'M' if n == 6 => civil(by, num(0, 2)?, num(2, 4)?, num(4, 6)?, bn, bs),
            b'M' if n == 4 => civil(by, num(0, 2)?, num(2, 4)?, bh, bn, bs),
            b'M' if n == 2 => civil(by, num(0, 2)?, bd, bh, bn, bs),
            b'Y' if (2..=12).contains(&n) && n % 2 == 0 => {
                let yy = num(0, 2)? as i32;
                let now_year = self.opts.now.year();
                let mut y = if century_specified {
                    by - by % 100 + yy
                } else {
                    now_year - now_year % 100 + yy
                };
                if y - now_year > 10 {
                    y -= 100;
                }
                match n {
                    12 => civil(y, num(2, 4)?, num(4, 6)?, num(6, 8)?, num(8, 10)?, num(10, 12)?),
                    10 => civil(y, num(2, 4)?, num(4, 6)?, num(6, 8)?, num(8, 10)?, bs),
                    8 => civil(y, num(2, 4)?, num(4, 6)?, num(6, 8)?, bn, bs),
                    6 => civil(y, num(2, 4)?, num(4, 6)?, bh, bn, bs),
                    4 => civil(y, num(2, 4)?, bd, bh, bn, bs),
                    _ => civil(y, bm, bd, bh, bn, bs),
                }
            }
            b'T' => match n {
                14 => civil(
                    num(0, 4)? as i32, num(4, 6)?, num(6, 8)?, num(8, 10)?, num(10, 12)?,
                    num(12, 14)?,
                ),
                12 => civil(num(0, 4)? as i32, num(4, 6)?, num(6, 8)?, num(8, 10)?, num(10, 12)?, 0),
                10 => civil(num(0, 4)? as i32, num(4, 6)?, num(6, 8)?, num(8, 10)?, 0, 0),
                8 => civil(num(0, 4)? as i32, num(4, 6)?, num(6, 8)?, bh, 0, 0),
                6 => civil(num(0, 4)? as i32, num(4, 6)?, bd, bh, 0, 0),
                4 => civil(num(0, 4)? as i32, bm, bd, bh, 0, 0),
                2 => civil(100 * num(0, 2)? as i32 + by % 100, bm, bd, bh, 0, 0),
                _ => None,
            },
            b'J' => {
                let (y, day) = match n {
                    7 => (num(0, 4)? as i32, num(4, 7)?),
                    5 => {
                        let now_year = self.opts.now.year();
                        let mut y = now_year - now_year % 100 + num(0, 2)? as i32;
                        if y - now_year > 10 {
                            y -= 100;
                        }
                        (y, num(2, 5)?)
                    }
                    1..=3 => (by, num(0, n)?),
                    _ => return Err(bad()),
                };
                if day < 1 || day > if time::is_leap(y) { 366 } else { 365 } {
                    return Err(ShefError::Time(format!("invalid day: [{}]", code)));
                }
                NaiveDate::from_yo_opt(y, day).and_then(|d| d.and_hms_opt(bh, bn, bs))
            }
            _ => return Err(bad()),
        };
        built.ok_or_else(bad)
    }

    // ---- creation time ---------------------------------------------------

    // civil creation time in the message zone from the DC digits
    fn creation_time(
        &self,
        obstime: NaiveDateTime,
        zone: ShefZone,
        digits: &str,
    ) -> Result<NaiveDateTime, ShefError> {
        let bad = || ShefError::Time(format!("bad creation time: [{}]", digits));
        let s = digits;
        let num = |a: usize, b: usize| -> Result<u32, ShefError> {
            s.get(a..b).and_then(|t| t.parse().ok()).ok_or_else(bad)
        };
        let threshold = add_months(
            obstime.date().and_hms_opt(0, 0, 0).ok_or_else(bad)?,
            120,
            false,
        )?;
        let mut dt = match s.len() {
            12 => civil(num(0, 4)? as i32, num(4, 6)?, num(6, 8)?, num(8, 10)?, num(10, 12)?, 0)
                .ok_or_else(bad)?,
            10 => {
                let now_year = self.opts.now.year();
                let y = now_year - now_year % 100 + num(0, 2)? as i32;
                civil(y, num(2, 4)?, num(4, 6)?, num(6, 8)?, num(8, 10)?, 0).ok_or_else(bad)?
            }
            8 => civil(obstime.year(), num(0, 2)?, num(2, 4)?, num(4, 6)?, num(6, 8)?, 0)
                .ok_or_else(bad)?,
            6 => civil(obstime.year(), num(0, 2)?, num(2, 4)?, num(4, 6)?, 0, 0)
                .ok_or_else(bad)?,
            4 => {
                let hour = if zone.is_utc() { 12 } else { 24 };
                civil(obstime.year(), num(0, 2)?, num(2, 4)?, hour, 0, 0).ok_or_else(bad)?
            }
            _ => return Err(bad()),
        };
        while dt > threshold {
            dt = add_months(dt, -1200, false)?;
        }
        Ok(dt)
    }

    // ---- value tokens ----------------------------------------------------

    // numeric value (already in English units) and trailing qualifier
    fn parse_value_token(
        &self,
        token: &str,
        pe: &str,
        units_english: bool,
    ) -> Result<(Parsed, Option<char>), ShefError> {
        let t = token.trim().to_ascii_uppercase();
        if t.is_empty() {
            return Err(ShefError::Numeric("missing value".to_string()));
        }
        let last = t.chars().last().expect("nonempty");
        let (body, qualifier) = if t.len() > 1 && last.is_ascii_alphabetic() {
            match classify(&t[..t.len() - 1]) {
                Some(c) => (c, Some(last)),
                None => (classify(&t).ok_or_else(|| ShefError::Numeric(token.to_string()))?, None),
            }
        } else {
            (classify(&t).ok_or_else(|| ShefError::Numeric(token.to_string()))?, None)
        };
        let parsed = match body {
            TokenClass::Number(text) => {
                let mut value: f64 = text
                    .parse()
                    .map_err(|_| ShefError::Numeric(token.to_string()))?;
                if units_english && (pe == "PC" || pe == "PP") && !text.contains('.') {
                    // whole-number precipitation is hundredths of an inch
                    value /= 100.0;
                } else if !units_english && value != MISSING_VALUE {
                    value = self.registry.to_english(value, pe)?;
                }
                if value == 0.0 {
                    value = value.abs(); // never emit -0.0
                }
                Parsed::Value(value)
            }
            TokenClass::Trace => {
                if pe != "PC" && pe != "PP" {
                    return Err(ShefError::Numeric(format!(
                        "trace value is not valid for PE code [{}]",
                        pe
                    )));
                }
                Parsed::Value(TRACE_VALUE)
            }
            TokenClass::Missing => Parsed::Value(MISSING_VALUE),
            TokenClass::Null => Parsed::Null,
        };
        Ok((parsed, qualifier))
    }

    // default and validate the qualifier for one value
    fn resolve_qualifier(
        &mut self,
        rec: &MessageRecord,
        explicit: Option<char>,
        default: char,
    ) -> char {
        let q = explicit.unwrap_or(default);
        if self.registry.lookup_qualifier(q) {
            q
        } else {
            self.note_warning(
                rec,
                &format!("unknown data qualifier: [{}], qualifier set to Z", q),
            );
            'Z'
        }
    }

    // ---- record assembly -------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn build_value(
        &mut self,
        rec: &MessageRecord,
        ctx: &Context,
        location: &str,
        param: &str,
        orig_param: &str,
        revised: bool,
        message_source: Option<&str>,
        value: f64,
        qualifier: char,
    ) -> Result<ShefValue, ShefError> {
        let obs_utc = to_utc(ctx.obstime, ctx.zone, self.opts.time_model)?;
        let creation_time = match &ctx.create_str {
            Some(digits) => {
                let civil = self.creation_time(ctx.obstime, ctx.zone, digits)?;
                Some(to_utc(civil, ctx.zone, self.opts.time_model)?)
            }
            None => None,
        };
        if param.as_bytes()[3] == b'F' && creation_time.is_none() {
            self.note_warning(
                rec,
                &format!(
                    "forecast parameter [{}] value [{}] does not have creation date",
                    param, value
                ),
            );
        }
        let probability = self
            .registry
            .lookup_probability(param.as_bytes()[6] as char)
            .unwrap_or(-1.0);
        Ok(ShefValue {
            location: location.to_string(),
            obs_time: obs_utc,
            creation_time,
            parameter_code: param.to_string(),
            orig_parameter_code: orig_param.to_string(),
            value,
            qualifier,
            probability,
            revised,
            duration_unit: ctx.duration_unit,
            duration_value: ctx.duration_value,
            message_source: message_source.map(str::to_string),
            time_series_code: 0,
            comment: ctx.comment.clone().unwrap_or_default(),
        })
    }

    // expand and screen a parameter code token
    fn expand_param(&self, code: &str) -> Result<(String, bool), ShefError> {
        if !code.is_ascii() || code.len() < 2 {
            return Err(ShefError::Syntax(format!("invalid PE code: [{}]", code)));
        }
        if !self.registry.is_recognized_pe(&code[..2]) {
            return Err(ShefError::RegistryMiss(format!(
                "unknown PE code: [{}]",
                &code[..2]
            )));
        }
        self.registry.expand_parameter_code(code)
    }

    // snap to 07:00 local of the previous day for HY/QY/PY send codes
    fn apply_prev_7am(&self, ctx: &mut Context) -> Result<(), ShefError> {
        if ctx.relative_specified {
            return Err(ShefError::Context(
                "cannot use relative date/time offsets with send codes QY, HY, or PY".to_string(),
            ));
        }
        if ctx.zone.is_utc() {
            return Err(ShefError::Context(
                "cannot use Zulu/UTC time zone with send codes QY, HY, or PY".to_string(),
            ));
        }
        let mut t = ctx.obstime;
        if t.hour() < 7 {
            t -= chrono::Duration::days(1);
        }
        ctx.obstime = t
            .date()
            .and_hms_opt(7, 0, 0)
            .ok_or_else(|| ShefError::Time("bad 07:00 adjustment".to_string()))?;
        Ok(())
    }

    fn initial_context(&self, date: NaiveDate, century: bool, zone: ShefZone) -> Context {
        // with no time field the observation snaps to 00:00 of the header date
        let midnight = date.and_hms_opt(0, 0, 0).expect("midnight exists");
        Context {
            obstime: midnight,
            last_explicit: midnight,
            zone,
            century_specified: century,
            relative_specified: false,
            create_str: None,
            units_english: true,
            qualifier: 'Z',
            duration_unit: 'Z',
            duration_value: None,
            comment: None,
        }
    }

    // shared handling of the simple D* context tokens; true when consumed
    fn apply_context_token(&mut self, ctx: &mut Context, token: &str) -> Result<bool, ShefError> {
        if CREATE_TOKEN.is_match(token) {
            ctx.create_str = Some(token[2..].to_string());
        } else if UNITS_TOKEN.is_match(token) {
            ctx.units_english = token[2..3].eq_ignore_ascii_case("E");
        } else if QUALIFIER_TOKEN.is_match(token) {
            let q = token.as_bytes()[2].to_ascii_uppercase() as char;
            if !self.registry.lookup_qualifier(q) {
                return Err(ShefError::RegistryMiss(format!(
                    "bad data qualifier: [{}]",
                    q
                )));
            }
            ctx.qualifier = q;
        } else if DURATION_TOKEN.is_match(token) {
            let unit = token.as_bytes()[2].to_ascii_uppercase() as char;
            if unit == 'Z' {
                ctx.duration_unit = 'Z';
                ctx.duration_value = None;
            } else {
                let value: i32 = token[3..]
                    .parse()
                    .map_err(|_| ShefError::Syntax(format!("invalid duration code [{}]", token)))?;
                if value > 99 {
                    return Err(ShefError::Syntax(format!(
                        "invalid duration code variable [{}]",
                        token
                    )));
                }
                ctx.duration_unit = unit;
                ctx.duration_value = Some(value);
            }
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    // ---- .A --------------------------------------------------------------

    fn decode_a(&mut self, rec: &MessageRecord) -> Vec<ShefValue> {
        let mut values = Vec::new();
        let header = match self.parse_header(rec) {
            Ok(h) => h,
            Err(e) => {
                self.note_error(rec, &e);
                return values;
            }
        };
        let (location, date, century, zone, body_start) = header;
        let mut ctx = self.initial_context(date, century, zone);
        let fields = retokenize_a(body_fields(&rec.text[body_start..]));
        for field in fields {
            if self.exhausted {
                break;
            }
            let outcome = self.decode_a_field(rec, &mut ctx, &location, &field, &mut values);
            if let Err(e) = outcome {
                self.note_error(rec, &e);
                if self.opts.strict {
                    return Vec::new();
                }
            }
        }
        values
    }

    fn decode_a_field(
        &mut self,
        rec: &MessageRecord,
        ctx: &mut Context,
        location: &str,
        field: &[String],
        values: &mut Vec<ShefValue>,
    ) -> Result<(), ShefError> {
        if field.is_empty() {
            return Ok(());
        }
        if field.len() == 1 {
            let token = field[0].trim();
            if token.is_empty() {
                return Ok(());
            }
            if is_time_token(token) {
                self.apply_time_token(token, ctx, None, false)?;
                return Ok(());
            }
            if is_quote(token) {
                ctx.comment = Some(unquote(token));
                return Ok(());
            }
            if self.apply_context_token(ctx, token)? {
                return Ok(());
            }
            if PARAM_TOKEN.is_match(&token.to_ascii_uppercase()) {
                // a parameter with no value is a null field
                return Ok(());
            }
            return Err(ShefError::Syntax(format!(
                "unexpected data string item: [{}]",
                token
            )));
        }
        // parameter + value [+ retained comment]
        let code = field[0].to_ascii_uppercase();
        let (param, use_prev_7am) = self.expand_param(&code)?;
        let value_token = &field[1];
        if is_time_token(value_token)
            || CREATE_TOKEN.is_match(value_token)
            || UNITS_TOKEN.is_match(value_token)
            || QUALIFIER_TOKEN.is_match(value_token)
            || DURATION_TOKEN.is_match(value_token)
        {
            return Err(ShefError::Syntax(format!(
                "expected value for parameter [{}], got [{}]",
                param, value_token
            )));
        }
        let (parsed, explicit_q) =
            self.parse_value_token(value_token, &param[..2], ctx.units_english)?;
        if field.len() > 2 {
            if is_quote(&field[2]) {
                // attaches to this value and carries to the rest of the message
                ctx.comment = Some(unquote(&field[2]));
            } else {
                return Err(ShefError::Syntax(format!(
                    "invalid retained comment [{}]",
                    field[2]
                )));
            }
        }
        if let Parsed::Value(value) = parsed {
            // the 07:00 snap is local to this field
            let mut emit_ctx = ctx.clone();
            if use_prev_7am {
                self.apply_prev_7am(&mut emit_ctx)?;
            }
            let qualifier = self.resolve_qualifier(rec, explicit_q, ctx.qualifier);
            let v = self.build_value(
                rec, &emit_ctx, location, &param, &code, rec.revised, None, value, qualifier,
            )?;
            values.push(v);
        }
        Ok(())
    }

    // ---- .E --------------------------------------------------------------

    fn decode_e(&mut self, rec: &MessageRecord) -> Vec<ShefValue> {
        let mut values = Vec::new();
        let header = match self.parse_header(rec) {
            Ok(h) => h,
            Err(e) => {
                self.note_error(rec, &e);
                return values;
            }
        };
        let (location, date, century, zone, body_start) = header;
        let mut ctx = self.initial_context(date, century, zone);
        let original_obstime = ctx.obstime;
        let mut param: Option<(String, String, bool)> = None;
        let mut interval: Option<CalendarShift> = None;
        let fields = retokenize_e(body_fields(&rec.text[body_start..]));
        for field in fields {
            if self.exhausted {
                break;
            }
            if let Err(e) = self.decode_e_field(
                rec,
                &mut ctx,
                &location,
                original_obstime,
                &mut param,
                &mut interval,
                &field,
                &mut values,
            ) {
                self.note_error(rec, &e);
                if self.opts.strict {
                    return Vec::new();
                }
                // a failed value slot still advances the clock so the
                // remaining slots keep their positional alignment
                let token = field[0].trim().to_ascii_uppercase();
                let value_like =
                    !token.is_empty() && !token.starts_with('D') && !PARAM_TOKEN.is_match(&token);
                if value_like {
                    if let Some(step) = interval {
                        if let Ok(t) = step.apply(ctx.obstime) {
                            ctx.obstime = t;
                        }
                    }
                }
            }
        }
        values
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_e_field(
        &mut self,
        rec: &MessageRecord,
        ctx: &mut Context,
        location: &str,
        original_obstime: NaiveDateTime,
        param: &mut Option<(String, String, bool)>,
        interval: &mut Option<CalendarShift>,
        field: &[String],
        values: &mut Vec<ShefValue>,
    ) -> Result<(), ShefError> {
        let token = field[0].trim();
        let upper = token.to_ascii_uppercase();
        if token.is_empty() {
            // a null slot advances the clock
            let step = interval.ok_or_else(|| {
                ShefError::Context("null field in data definition".to_string())
            })?;
            if param.is_none() {
                return Err(ShefError::Context("null field in data definition".to_string()));
            }
            ctx.obstime = step.apply(ctx.obstime)?;
            return Ok(());
        }
        if is_time_token(token) {
            self.apply_time_token(token, ctx, Some(original_obstime), false)?;
            if ctx.relative_specified {
                if let Some((_, _, true)) = param {
                    return Err(ShefError::Context(
                        "cannot use relative date/time offsets with send codes QY, HY, or PY"
                            .to_string(),
                    ));
                }
            }
            return Ok(());
        }
        if CREATE_TOKEN.is_match(token) {
            ctx.create_str = Some(token[2..].to_string());
            ctx.obstime = ctx.last_explicit;
            return Ok(());
        }
        if UNITS_TOKEN.is_match(token)
            || QUALIFIER_TOKEN.is_match(token)
            || DURATION_TOKEN.is_match(token)
        {
            self.apply_context_token(ctx, token)?;
            return Ok(());
        }
        if INTERVAL_TOKEN.is_match(token) {
            if param.is_none() {
                return Err(ShefError::Context(
                    "interval is specified before parameter".to_string(),
                ));
            }
            if matches!(param, Some((_, _, true))) {
                return Err(ShefError::Context(format!(
                    "cannot use data interval [{}] with send codes QY, HY, or PY",
                    token
                )));
            }
            if interval.is_some() {
                return Err(ShefError::Syntax(
                    "interval specified more than once".to_string(),
                ));
            }
            *interval = Some(parse_interval(&upper)?);
            return Ok(());
        }
        if param.is_none() && PARAM_TOKEN.is_match(&upper) {
            let (expanded, use_prev_7am) = self.expand_param(&upper)?;
            if use_prev_7am {
                if ctx.relative_specified {
                    return Err(ShefError::Context(
                        "cannot use relative date/time offsets with send codes QY, HY, or PY"
                            .to_string(),
                    ));
                }
                if ctx.zone.is_utc() {
                    return Err(ShefError::Context(
                        "cannot use Zulu/UTC time zone with send codes QY, HY, or PY".to_string(),
                    ));
                }
            }
            *param = Some((expanded, upper, use_prev_7am));
            return Ok(());
        }
        if is_quote(token) {
            ctx.comment = Some(unquote(token));
            return Ok(());
        }
        // a data value
        let (param_code, orig_code, _) = param.clone().ok_or_else(|| {
            ShefError::Context("value encountered before parameter code".to_string())
        })?;
        let step = interval
            .ok_or_else(|| ShefError::Context("value encountered before interval".to_string()))?;
        let (parsed, explicit_q) =
            self.parse_value_token(token, &param_code[..2], ctx.units_english)?;
        if field.len() > 1 {
            if is_quote(&field[1]) {
                ctx.comment = Some(unquote(&field[1]));
            } else {
                return Err(ShefError::Syntax(format!(
                    "invalid retained comment [{}]",
                    field[1]
                )));
            }
        }
        if let Parsed::Value(value) = parsed {
            let qualifier = self.resolve_qualifier(rec, explicit_q, ctx.qualifier);
            let v = self.build_value(
                rec, ctx, location, &param_code, &orig_code, rec.revised, None, value, qualifier,
            )?;
            values.push(v);
        }
        ctx.obstime = step.apply(ctx.obstime)?;
        Ok(())
    }

    // ---- .B --------------------------------------------------------------

    fn decode_b(&mut self, rec: &MessageRecord) -> Vec<ShefValue> {
        let mut values = Vec::new();
        match self.decode_b_inner(rec, &mut values) {
            Ok(()) => values,
            Err(Rejected) => Vec::new(),
        }
    }

    // errors are noted here; Err(Rejected) only unwinds strict mode
    fn decode_b_inner(
        &mut self,
        rec: &MessageRecord,
        values: &mut Vec<ShefValue>,
    ) -> Result<(), Rejected> {
        let (source, date, century, zone, _) = match self.parse_header(rec) {
            Ok(header) => header,
            Err(e) => return self.recover_b(rec, e),
        };
        // reassemble the header from the opening line and .Bn continuations
        let mut lines = rec.text.lines();
        let mut header = lines.next().unwrap_or("").to_string();
        let mut body_lines: Vec<&str> = Vec::new();
        let mut in_header = true;
        for line in lines {
            if line.to_ascii_uppercase().starts_with(".END") {
                break;
            }
            if in_header && line.starts_with('.') {
                let cont = line
                    .trim_start_matches(|c: char| !c.is_whitespace())
                    .trim_start();
                if !header.ends_with('/') && !cont.starts_with('/') && !cont.is_empty() {
                    header.push('/');
                }
                header.push_str(cont);
            } else {
                in_header = false;
                body_lines.push(line);
            }
        }
        let caps = match POSITIONAL.captures(&header) {
            Some(caps) => caps,
            None => {
                let e = ShefError::Syntax("mal-formed positional fields".to_string());
                return self.recover_b(rec, e);
            }
        };
        let control = header[caps.get(0).expect("match exists").end()..].to_string();
        let mut ctx = self.initial_context(date, century, zone);
        let columns = self.parse_b_header(rec, &mut ctx, &control)?;
        let declared = columns.iter().filter(|c| c.is_some()).count();
        if declared == 0 {
            let e = ShefError::Context(".B message declares no valid parameters".to_string());
            return self.recover_b(rec, e);
        }
        // a comma packs several reports on one physical line
        let body = body_lines.join("\n").replace(',', "\n");
        for row in body.lines() {
            if self.exhausted {
                break;
            }
            let row = row.trim();
            if row.is_empty() {
                continue;
            }
            if !B_ROW.is_match(row) {
                let e = ShefError::Syntax(format!(
                    "invalid item in body line or packed report: [{}]",
                    row
                ));
                self.recover_b(rec, e)?;
                continue;
            }
            self.decode_b_row(rec, &ctx, &columns, &source, row, values)?;
        }
        Ok(())
    }

    // note one .B error; unwind only in strict mode
    fn recover_b(&mut self, rec: &MessageRecord, e: ShefError) -> Result<(), Rejected> {
        self.note_error(rec, &e);
        if self.opts.strict {
            Err(Rejected)
        } else {
            Ok(())
        }
    }

    // parse the parameter-control fields of a .B header into columns
    fn parse_b_header(
        &mut self,
        rec: &MessageRecord,
        ctx: &mut Context,
        control: &str,
    ) -> Result<Vec<Option<BColumn>>, Rejected> {
        let mut columns: Vec<Option<BColumn>> = Vec::new();
        let mut pending_relative: Option<CalendarShift> = None;
        let mut obstime_specified = false;
        for field in split_fields(control) {
            let token = field.trim();
            if token.is_empty() {
                continue;
            }
            let outcome: Result<(), ShefError> = (|| {
                if is_time_token(token) {
                    match self.apply_time_token(token, ctx, None, true)? {
                        Some(shift) => {
                            pending_relative = Some(shift);
                            obstime_specified = false;
                        }
                        None => {
                            obstime_specified = true;
                        }
                    }
                    return Ok(());
                }
                if self.apply_context_token(ctx, token)? {
                    return Ok(());
                }
                let upper = token.to_ascii_uppercase();
                if PARAM_TOKEN.is_match(&upper) {
                    let (param, use_prev_7am) = self.expand_param(&upper)?;
                    if use_prev_7am {
                        if pending_relative.is_some() {
                            return Err(ShefError::Context(
                                "cannot use relative date/time offsets with send codes QY, HY, \
                                 or PY"
                                    .to_string(),
                            ));
                        }
                        if ctx.zone.is_utc() {
                            return Err(ShefError::Context(
                                "cannot use Zulu/UTC time zone with send codes QY, HY, or PY"
                                    .to_string(),
                            ));
                        }
                    }
                    // an un-overridden column inherits the previous column's
                    // relative offset
                    let relative = if obstime_specified {
                        None
                    } else if pending_relative.is_some() {
                        pending_relative
                    } else {
                        columns
                            .iter()
                            .rev()
                            .flatten()
                            .next()
                            .and_then(|c| c.relative)
                    };
                    columns.push(Some(BColumn {
                        param,
                        orig: upper,
                        obstime: ctx.last_explicit,
                        use_prev_7am,
                        relative,
                        create_str: ctx.create_str.clone(),
                        units_english: ctx.units_english,
                        qualifier: ctx.qualifier,
                        duration_unit: ctx.duration_unit,
                        duration_value: ctx.duration_value,
                    }));
                    pending_relative = None;
                    obstime_specified = false;
                    return Ok(());
                }
                Err(ShefError::Syntax(format!(
                    "unexpected data string item: [{}]",
                    token
                )))
            })();
            if let Err(e) = outcome {
                self.recover_b(rec, e)?;
                columns.push(None);
            }
        }
        Ok(columns)
    }

    // decode one .B data row against the declared columns
    fn decode_b_row(
        &mut self,
        rec: &MessageRecord,
        header_ctx: &Context,
        columns: &[Option<BColumn>],
        source: &str,
        row: &str,
        values: &mut Vec<ShefValue>,
    ) -> Result<(), Rejected> {
        let location = row.split_whitespace().next().expect("row matched").to_string();
        let rest = row[location.len()..].trim();
        let tokens = b_row_tokens(rest);
        let mut p = 0usize;
        let mut emitted = 0usize;
        let mut last_emitted: Option<usize> = None;
        let mut last_explicit: Option<NaiveDateTime> = None;
        let mut time_overrides: Vec<Option<NaiveDateTime>> = vec![None; columns.len()];
        let mut relative_overrides: Vec<Option<CalendarShift>> = vec![None; columns.len()];
        let mut create_override: Option<String> = None;
        let mut units_override: Option<bool> = None;
        let mut qualifier_override: Option<char> = None;
        let mut duration_override: Option<(char, Option<i32>)> = None;
        let mut skip_parameter = false;
        for token in tokens {
            if p >= columns.len() {
                if !token.is_empty() {
                    self.note_warning(
                        rec,
                        &format!(
                            "too many tokens in .B body line [{}]; header contains {} parameters",
                            row,
                            columns.len()
                        ),
                    );
                }
                break;
            }
            if token.is_empty() {
                p += 1;
                continue;
            }
            let outcome: Result<bool, ShefError> = (|| {
                if is_time_token(&token) {
                    let padded = pad_b_time_token(&token);
                    let base = last_explicit
                        .or_else(|| columns[p].as_ref().map(|c| c.obstime))
                        .unwrap_or(header_ctx.obstime);
                    let mut scratch = header_ctx.clone();
                    scratch.obstime = base;
                    scratch.last_explicit = base;
                    match self.apply_time_token(&padded, &mut scratch, None, true) {
                        Ok(Some(shift)) => {
                            relative_overrides[p] = Some(shift);
                        }
                        Ok(None) => {
                            last_explicit = Some(scratch.obstime);
                            time_overrides[p] = Some(scratch.obstime);
                        }
                        Err(e) => {
                            skip_parameter = true;
                            return Err(e);
                        }
                    }
                    return Ok(false);
                }
                if CREATE_TOKEN.is_match(&token) {
                    create_override = Some(token[2..].to_string());
                    return Ok(false);
                }
                if UNITS_TOKEN.is_match(&token) {
                    units_override = Some(token[2..3].eq_ignore_ascii_case("E"));
                    return Ok(false);
                }
                if QUALIFIER_TOKEN.is_match(&token) {
                    qualifier_override = Some(token.as_bytes()[2].to_ascii_uppercase() as char);
                    return Ok(false);
                }
                if DURATION_TOKEN.is_match(&token) {
                    let unit = token.as_bytes()[2].to_ascii_uppercase() as char;
                    duration_override = if unit == 'Z' {
                        None
                    } else {
                        let value: i32 = token[3..].parse().map_err(|_| {
                            ShefError::Syntax(format!("invalid duration code [{}]", token))
                        })?;
                        Some((unit, Some(value)))
                    };
                    return Ok(false);
                }
                Ok(true)
            })();
            let is_value = match outcome {
                Ok(v) => v,
                Err(e) => {
                    self.recover_b(rec, e)?;
                    continue;
                }
            };
            if !is_value {
                continue;
            }
            // value (with optional comment) for column p
            if let Some(column) = &columns[p] {
                let column = column.clone();
                let result: Result<(), ShefError> = (|| {
                    let (value_text, comment) = split_value_comment(&token);
                    let units_english = units_override.unwrap_or(column.units_english);
                    let (parsed, explicit_q) =
                        self.parse_value_token(&value_text, &column.param[..2], units_english)?;
                    // inherit the previous value column's overrides
                    if p > 0 {
                        if let Some(last) = last_emitted {
                            if time_overrides[p].is_none() && time_overrides[last].is_some() {
                                time_overrides[p] = time_overrides[last];
                            }
                            if relative_overrides[p].is_none()
                                && relative_overrides[last].is_some()
                            {
                                relative_overrides[p] = relative_overrides[last];
                            }
                        }
                    }
                    if skip_parameter {
                        skip_parameter = false;
                        return Ok(());
                    }
                    let mut obstime = time_overrides[p]
                        .or(last_explicit)
                        .unwrap_or(column.obstime);
                    let shift = relative_overrides[p].or(column.relative);
                    if column.use_prev_7am {
                        if shift.is_some() {
                            return Err(ShefError::Context(
                                "cannot use relative date/time offsets with send codes QY, HY, \
                                 or PY"
                                    .to_string(),
                            ));
                        }
                        let mut t = obstime;
                        if t.hour() < 7 {
                            t -= chrono::Duration::days(1);
                        }
                        obstime = t
                            .date()
                            .and_hms_opt(7, 0, 0)
                            .ok_or_else(|| ShefError::Time("bad 07:00 adjustment".to_string()))?;
                    } else if let Some(shift) = shift {
                        obstime = shift.apply(obstime)?;
                    }
                    let qualifier = self.resolve_qualifier(
                        rec,
                        explicit_q.or(qualifier_override),
                        column.qualifier,
                    );
                    let (duration_unit, duration_value) = duration_override
                        .unwrap_or((column.duration_unit, column.duration_value));
                    let create_str = create_override.clone().or_else(|| column.create_str.clone());
                    let value_ctx = Context {
                        obstime,
                        last_explicit: obstime,
                        zone: header_ctx.zone,
                        century_specified: header_ctx.century_specified,
                        relative_specified: false,
                        create_str,
                        units_english,
                        qualifier,
                        duration_unit,
                        duration_value,
                        comment,
                    };
                    if let Parsed::Value(value) = parsed {
                        let v = self.build_value(
                            rec,
                            &value_ctx,
                            &location,
                            &column.param,
                            &column.orig,
                            rec.revised,
                            Some(source),
                            value,
                            qualifier,
                        )?;
                        values.push(v);
                        emitted += 1;
                        last_emitted = Some(p);
                    }
                    Ok(())
                })();
                if let Err(e) = result {
                    self.recover_b(rec, e)?;
                }
            }
            duration_override = None;
            p += 1;
        }
        let declared = columns.iter().filter(|c| c.is_some()).count();
        if emitted < declared {
            self.note_warning(
                rec,
                &format!(
                    "value count ({}) is less than parameter count ({}) for location [{}]",
                    emitted, declared, location
                ),
            );
        }
        Ok(())
    }
}

// ---- token and field helpers --------------------------------------------

// builds a civil time; hour 24 with zero minutes/seconds rolls to the next day
fn civil(y: i32, m: u32, d: u32, h: u32, n: u32, s: u32) -> Option<NaiveDateTime> {
    if h == 24 {
        if n != 0 || s != 0 {
            return None;
        }
        return NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|t| t + chrono::Duration::days(1));
    }
    NaiveDate::from_ymd_opt(y, m, d).and_then(|date| date.and_hms_opt(h, n, s))
}

fn is_time_token(token: &str) -> bool {
    match TIME_CHUNK.find(token) {
        Some(m) => m.start() == 0,
        None => false,
    }
}

fn is_julian(chunk: &str) -> bool {
    chunk.len() > 1 && chunk.as_bytes()[1].to_ascii_uppercase() == b'J'
}

fn is_quote(token: &str) -> bool {
    token.starts_with('"') || token.starts_with('\'')
}

fn unquote(token: &str) -> String {
    token
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string()
}

// DR unit and signed magnitude
fn parse_relative(text: &str) -> Result<CalendarShift, ShefError> {
    let unit = text.as_bytes()[2] as char;
    let value: i32 = text[3..]
        .parse()
        .map_err(|_| ShefError::Syntax(format!("bad observation time: [{}]", text)))?;
    if value.abs() > 99 {
        return Err(ShefError::Time("invalid relative time value".to_string()));
    }
    Ok(match unit {
        'S' => CalendarShift::Span(chrono::Duration::seconds(value as i64)),
        'N' => CalendarShift::Span(chrono::Duration::minutes(value as i64)),
        'H' => CalendarShift::Span(chrono::Duration::hours(value as i64)),
        'D' => CalendarShift::Span(chrono::Duration::days(value as i64)),
        'M' => CalendarShift::Months { months: value, eom: false },
        'E' => CalendarShift::Months { months: value, eom: true },
        'Y' => CalendarShift::Months { months: 12 * value, eom: false },
        _ => return Err(ShefError::Syntax(format!("bad observation time: [{}]", text))),
    })
}

// DI interval for .E expansion
fn parse_interval(token: &str) -> Result<CalendarShift, ShefError> {
    let unit = token.as_bytes()[2] as char;
    let value: i32 = token[3..]
        .parse()
        .map_err(|_| ShefError::Syntax(format!("invalid interval value: [{}]", token)))?;
    if value.abs() > 99 {
        return Err(ShefError::Time(format!("invalid interval value: [{}]", token)));
    }
    Ok(match unit {
        'S' => CalendarShift::Span(chrono::Duration::seconds(value as i64)),
        'N' => CalendarShift::Span(chrono::Duration::minutes(value as i64)),
        'H' => CalendarShift::Span(chrono::Duration::hours(value as i64)),
        'D' => CalendarShift::Span(chrono::Duration::days(value as i64)),
        'M' => CalendarShift::Months { months: value, eom: false },
        'E' => CalendarShift::Months { months: value, eom: true },
        'Y' => CalendarShift::Months { months: 12 * value, eom: false },
        _ => return Err(ShefError::Syntax(format!("invalid interval: [{}]", token))),
    })
}

// shefit pads abbreviated time overrides in .B rows with trailing zeros
fn pad_b_time_token(token: &str) -> String {
    let mut t = token.to_string();
    let code = token.as_bytes()[1].to_ascii_uppercase();
    let target = match code {
        b'M' if token.len() > 6 => 12,
        b'D' if token.len() > 4 => 10,
        b'H' => 8,
        b'N' if token.len() == 4 => 6,
        _ => token.len(),
    };
    while t.len() < target {
        t.push('0');
    }
    t
}

enum TokenClass<'t> {
    Number(&'t str),
    Trace,
    Missing,
    Null,
}

// classify a bare value body (no trailing qualifier)
fn classify(s: &str) -> Option<TokenClass<'_>> {
    if NUMBER_TOKEN.is_match(s) {
        return Some(TokenClass::Number(s));
    }
    if !s.is_empty() && s.bytes().all(|b| b == b'T') {
        return Some(TokenClass::Trace);
    }
    if s == "+" || s == "++" {
        return Some(TokenClass::Null);
    }
    if s == "MSG" {
        return Some(TokenClass::Missing);
    }
    if !s.is_empty() && s.bytes().all(|b| matches!(b, b'M' | b'.' | b'+' | b'-')) {
        return Some(TokenClass::Missing);
    }
    None
}

// quote-aware split on '/'
fn split_fields(s: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in s.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '/' => {
                    fields.push(current.trim().to_string());
                    current = String::new();
                }
                _ => current.push(c),
            },
        }
    }
    fields.push(current.trim().to_string());
    fields
}

// quote-aware split of one field into words; quoted runs are single words
fn field_words(field: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in field.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                    words.push(std::mem::take(&mut current));
                }
            }
            None => match c {
                '\'' | '"' => {
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                    quote = Some(c);
                    current.push(c);
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

// strip continuation prefixes, join continuation lines with an implicit
// '/', and split the body into slash-separated word lists
fn body_fields(body: &str) -> Vec<Vec<String>> {
    lazy_static! {
        static ref CONT_PREFIX: Regex =
            Regex::new(r"(?i)^\.[ABE]R?\d{1,2}").expect("bad continuation prefix regexp");
    }
    let mut joined = String::new();
    for line in body.lines() {
        let line = CONT_PREFIX.replace(line, "");
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !joined.is_empty() && !joined.ends_with('/') && !line.starts_with('/') {
            joined.push('/');
        }
        joined.push_str(line);
    }
    split_fields(joined.trim_matches('/'))
        .into_iter()
        .map(|f| field_words(&f))
        .collect()
}

// .A bodies tolerate a '/' between a parameter and its value
fn retokenize_a(fields: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let is_param = |w: &str| {
        let upper = w.to_ascii_uppercase();
        PARAM_TOKEN.is_match(&upper) && !upper.starts_with('D')
    };
    let mut out: Vec<Vec<String>> = Vec::new();
    let mut i = 0;
    while i < fields.len() {
        let field = &fields[i];
        if field.len() == 1 && is_param(&field[0]) {
            match fields.get(i + 1) {
                Some(next)
                    if !next.is_empty() && !is_param(&next[0]) && !next[0].starts_with('D') =>
                {
                    let mut merged = field.clone();
                    merged.extend(next.iter().cloned());
                    out.push(merged);
                    i += 2;
                    continue;
                }
                _ => {
                    out.push(field.clone());
                    i += 1;
                    continue;
                }
            }
        }
        // leading date/units words split into their own fields
        let mut rest = field.as_slice();
        while let Some(first) = rest.first() {
            if rest.len() > 1 && (is_time_token(first) || UNITS_TOKEN.is_match(first)) {
                out.push(vec![first.clone()]);
                rest = &rest[1..];
            } else {
                break;
            }
        }
        if !rest.is_empty() || field.is_empty() {
            out.push(rest.to_vec());
        }
        i += 1;
    }
    out
}

// .E bodies: one token per field; retained comments attach to the
// preceding field
fn retokenize_e(fields: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let mut out: Vec<Vec<String>> = Vec::new();
    for field in fields {
        if field.is_empty() {
            out.push(vec![String::new()]);
            continue;
        }
        for word in field {
            if is_quote(&word) && !out.is_empty() {
                out.last_mut().expect("nonempty").push(word);
            } else {
                out.push(vec![word]);
            }
        }
    }
    out
}

// .B rows: slashes and whitespace both separate fields; comments attach
// to the preceding token
fn b_row_tokens(rest: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for field in split_fields(rest) {
        if field.is_empty() {
            tokens.push(String::new());
            continue;
        }
        let mut empty_field = true;
        for word in field_words(&field) {
            if is_quote(&word) && !tokens.is_empty() {
                let last = tokens.last_mut().expect("nonempty");
                last.push(' ');
                last.push_str(&word);
            } else {
                tokens.push(word);
                empty_field = false;
            }
        }
        if empty_field && tokens.is_empty() {
            tokens.push(String::new());
        }
    }
    tokens
}

// separate a value token from an attached retained comment
fn split_value_comment(token: &str) -> (String, Option<String>) {
    match token.find(|c| c == '"' || c == '\'') {
        Some(pos) => (
            token[..pos].trim().to_string(),
            Some(unquote(token[pos..].trim())),
        ),
        None => (token.trim().to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Tokenizer;
    use chrono::TimeZone;
    use std::io::Cursor;

    fn decode_all(text: &str, strict: bool) -> (Vec<ShefValue>, u32) {
        let registry = ParamRegistry::default();
        let mut decoder = Decoder::new(
            &registry,
            DecoderOptions {
                strict,
                ..DecoderOptions::default()
            },
        );
        let mut tok = Tokenizer::new(Cursor::new(text.to_string()));
        let mut values = Vec::new();
        while let Some(rec) = tok.next_message().unwrap() {
            values.extend(decoder.decode(&rec));
        }
        (values, decoder.error_count())
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, n: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, n, s).unwrap()
    }

    #[test]
    fn test_simple_dot_e() {
        let (values, errors) = decode_all(".E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/637.73\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].location, "KEYO2");
        assert_eq!(values[0].parameter_code, "HTIRZZZ");
        assert_eq!(values[0].orig_parameter_code, "HT");
        assert_eq!(values[0].obs_time, utc(2025, 11, 7, 14, 0, 0));
        assert_eq!(values[0].value, 637.74);
        assert_eq!(values[0].qualifier, 'Z');
        assert_eq!(values[0].probability, -1.0);
        assert_eq!(values[0].time_series_code, 1);
        assert_eq!(values[0].creation_time, None);
        assert_eq!(values[1].obs_time, utc(2025, 11, 7, 15, 0, 0));
        assert_eq!(values[1].value, 637.73);
        assert_eq!(values[1].time_series_code, 2);
    }

    #[test]
    fn test_dot_e_continuation() {
        let (values, errors) = decode_all(
            ".E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/637.73\n.E01 638.00/638.01\n",
            false,
        );
        assert_eq!(errors, 0);
        assert_eq!(values.len(), 4);
        for (i, v) in values.iter().enumerate() {
            assert_eq!(v.obs_time, utc(2025, 11, 7, 14 + i as u32, 0, 0));
        }
        assert_eq!(values[3].value, 638.01);
        assert_eq!(values[3].time_series_code, 2);
    }

    #[test]
    fn test_dot_a_retained_comment_carries() {
        let (values, errors) =
            decode_all(".A TNSO2 20240630 DH0000/PC 0.00\"15:OKMN\"/TA 78.5\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].parameter_code, "PCIRZZZ");
        assert_eq!(values[0].obs_time, utc(2024, 6, 30, 0, 0, 0));
        assert_eq!(values[0].comment, "15:OKMN");
        assert_eq!(values[1].parameter_code, "TAIRZZZ");
        assert_eq!(values[1].obs_time, utc(2024, 6, 30, 0, 0, 0));
        assert_eq!(values[1].value, 78.5);
        assert_eq!(values[1].comment, "15:OKMN");
    }

    #[test]
    fn test_missing_sentinel() {
        let (values, errors) = decode_all(".A ABCD1 20250101 Z DH12/PC M\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values.len(), 1);
        assert!(values[0].is_missing());
        assert_eq!(values[0].value, MISSING_VALUE);
    }

    #[test]
    fn test_permissive_recovery() {
        let (values, errors) =
            decode_all(".A ABCD1 20250101 Z DH12/HG 5.0/XX bad/TA 72/\n", false);
        assert_eq!(errors, 1);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].pe_code(), "HG");
        assert_eq!(values[1].pe_code(), "TA");
    }

    #[test]
    fn test_strict_rejection() {
        let (values, errors) =
            decode_all(".A ABCD1 20250101 Z DH12/HG 5.0/XX bad/TA 72/\n", true);
        assert_eq!(errors, 1);
        assert!(values.is_empty());
    }

    #[test]
    fn test_override_locality() {
        // an in-line override never alters an already-emitted value
        let (values, _) =
            decode_all(".A ABCD1 20240101 Z DH06/HG 1.0/DH07/HG 2.0\n", false);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].obs_time, utc(2024, 1, 1, 6, 0, 0));
        assert_eq!(values[1].obs_time, utc(2024, 1, 1, 7, 0, 0));
    }

    #[test]
    fn test_relative_offset() {
        let (values, errors) = decode_all(".A ABCD1 20240101 Z DH06/DRH+2/HG 1.0\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values[0].obs_time, utc(2024, 1, 1, 8, 0, 0));
        // negative day shift
        let (values, _) = decode_all(".A ABCD1 20240110 Z DH06/DRD-2/HG 1.0\n", false);
        assert_eq!(values[0].obs_time, utc(2024, 1, 8, 6, 0, 0));
    }

    #[test]
    fn test_zone_resolution() {
        // Central standard time in January is UTC-6
        let (values, errors) = decode_all(".A ABCD1 20240115 C DH06/HG 1.0\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values[0].obs_time, utc(2024, 1, 15, 12, 0, 0));
    }

    #[test]
    fn test_creation_time() {
        let (values, errors) =
            decode_all(".A ABCD1 20240101 Z DH06/DC202401021200/HG 1.0\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values[0].creation_time, Some(utc(2024, 1, 2, 12, 0, 0)));
    }

    #[test]
    fn test_units_conversion() {
        // 10 degrees C is 50 degrees F
        let (values, errors) = decode_all(".A ABCD1 20240101 Z DH06/DUS/TA 10\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values[0].value, 50.0);
        // stage in meters converts by the HG factor
        let (values, _) = decode_all(".A ABCD1 20240101 Z DH06/DUS/HG 1.0\n", false);
        assert!((values[0].value - 3.2808399).abs() < 1e-9);
    }

    #[test]
    fn test_precip_hundredths_and_trace() {
        // whole-number English precipitation is hundredths of an inch
        let (values, _) = decode_all(".A ABCD1 20240101 Z DH06/PC 125\n", false);
        assert_eq!(values[0].value, 1.25);
        // trace is only valid for precipitation
        let (values, errors) = decode_all(".A ABCD1 20240101 Z DH06/PC T\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values[0].value, TRACE_VALUE);
        let (values, errors) = decode_all(".A ABCD1 20240101 Z DH06/HG T\n", false);
        assert_eq!(errors, 1);
        assert!(values.is_empty());
    }

    #[test]
    fn test_null_value_suppressed() {
        let (values, errors) = decode_all(".A ABCD1 20240101 Z DH06/HG +/TA 50\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].pe_code(), "TA");
    }

    #[test]
    fn test_value_qualifier() {
        let (values, errors) = decode_all(".A ABCD1 20240101 Z DH06/HG 5.2R\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values[0].qualifier, 'R');
        assert_eq!(values[0].value, 5.2);
        // DQ default applies when the token has none
        let (values, _) = decode_all(".A ABCD1 20240101 Z DH06/DQG/HG 5.2\n", false);
        assert_eq!(values[0].qualifier, 'G');
    }

    #[test]
    fn test_hour_24_rolls_over() {
        let (values, errors) = decode_all(".A ABCD1 20240101 Z DH24/HG 1.0\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values[0].obs_time, utc(2024, 1, 2, 0, 0, 0));
    }

    #[test]
    fn test_revised_flag() {
        let (values, _) = decode_all(".AR ABCD1 20240101 Z DH06/HG 1.0\n", false);
        assert!(values[0].revised);
    }

    #[test]
    fn test_dot_e_monthly_interval() {
        let (values, errors) =
            decode_all(".E ABCD1 20240131 Z DH06/HG/DIM01/1.0/2.0/3.0\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values[0].obs_time, utc(2024, 1, 31, 6, 0, 0));
        // month arithmetic clamps to the end of February
        assert_eq!(values[1].obs_time, utc(2024, 2, 29, 6, 0, 0));
        assert_eq!(values[2].obs_time, utc(2024, 3, 29, 6, 0, 0));
    }

    #[test]
    fn test_dot_e_null_slot_advances() {
        let (values, errors) =
            decode_all(".E ABCD1 20240101 Z DH00/HG/DIH06/1.0//3.0\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].obs_time, utc(2024, 1, 1, 0, 0, 0));
        assert_eq!(values[1].obs_time, utc(2024, 1, 1, 12, 0, 0));
    }

    #[test]
    fn test_dot_b_rows() {
        let (values, errors) = decode_all(
            ".B MSR 20240101 Z DH12/PC/TA\n\
             ALT1 1.25/50\n\
             ALT2 2.50/51\n\
             .END\n",
            false,
        );
        assert_eq!(errors, 0);
        assert_eq!(values.len(), 4);
        assert_eq!(values[0].location, "ALT1");
        assert_eq!(values[0].pe_code(), "PC");
        assert_eq!(values[0].value, 1.25);
        assert_eq!(values[0].message_source.as_deref(), Some("MSR"));
        assert_eq!(values[0].obs_time, utc(2024, 1, 1, 12, 0, 0));
        assert_eq!(values[3].location, "ALT2");
        assert_eq!(values[3].pe_code(), "TA");
        assert_eq!(values[3].value, 51.0);
        // every column starts its own one-value series
        assert!(values.iter().all(|v| v.time_series_code == 1));
    }

    #[test]
    fn test_dot_b_row_time_override() {
        let (values, errors) = decode_all(
            ".B MSR 20240101 Z DH12/HG/HG\n\
             ALT1 DH06/1.0/2.0\n\
             .END\n",
            false,
        );
        assert_eq!(errors, 0);
        assert_eq!(values.len(), 2);
        // the override carries to the following column of the row
        assert_eq!(values[0].obs_time, utc(2024, 1, 1, 6, 0, 0));
        assert_eq!(values[1].obs_time, utc(2024, 1, 1, 6, 0, 0));
    }

    #[test]
    fn test_dot_b_short_row_warns() {
        let registry = ParamRegistry::default();
        let mut decoder = Decoder::new(&registry, DecoderOptions::default());
        let mut tok = Tokenizer::new(Cursor::new(
            ".B MSR 20240101 Z DH12/PC/TA\nALT1 1.25\n.END\n".to_string(),
        ));
        let rec = tok.next_message().unwrap().unwrap();
        let values = decoder.decode(&rec);
        assert_eq!(values.len(), 1);
        assert!(decoder.warning_count() > 0);
    }

    #[test]
    fn test_send_code_expansion() {
        // TN expands to the daily-minimum temperature parameter
        let (values, errors) = decode_all(".A ABCD1 20240101 Z DH06/TN 20\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values[0].parameter_code, "TAIRZNZ");
        assert_eq!(values[0].orig_parameter_code, "TN");
    }

    #[test]
    fn test_prev_7am_send_code() {
        // HY snaps to 07:00 local of the same day when the hour is later
        let (values, errors) = decode_all(".A ABCD1 20240115 C DH12/HY 4.2\n", false);
        assert_eq!(errors, 0);
        assert_eq!(values[0].parameter_code, "HGIRZZZ");
        // 07:00 CST is 13:00 UTC
        assert_eq!(values[0].obs_time, utc(2024, 1, 15, 13, 0, 0));
        // and to the previous day when before 07:00
        let (values, _) = decode_all(".A ABCD1 20240115 C DH03/HY 4.2\n", false);
        assert_eq!(values[0].obs_time, utc(2024, 1, 14, 13, 0, 0));
        // Zulu time is rejected for these send codes
        let (_, errors) = decode_all(".A ABCD1 20240115 Z DH12/HY 4.2\n", false);
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_error_budget_exhaustion() {
        let registry = {
            let mut reg = ParamRegistry::default();
            reg.merge_shefparm("**\n   1\n");
            reg
        };
        let mut decoder = Decoder::new(&registry, DecoderOptions::default());
        let mut tok = Tokenizer::new(Cursor::new(
            ".A ABCD1 20240101 Z DH06/XX 1/XX 2/XX 3/HG 1.0\n".to_string(),
        ));
        let rec = tok.next_message().unwrap().unwrap();
        let _ = decoder.decode(&rec);
        assert!(decoder.exhausted());
    }
}
