//! Time-series loader plug-ins
//!
//! A loader receives decoded values in document order and persists them to
//! some time-series store. The shell pushes each value with
//! [`ShefLoader::set_shef_value`]; whenever the loader-defined series name
//! changes it calls [`ShefLoader::load_time_series`], and
//! [`ShefLoader::done`] exactly once at the end of the run. Loaders that
//! support `--unload` synthesize SHEF text back out of their store.
//!
//! Loaders are selected by name on the command line, with optional
//! square-bracketed arguments: `dummy[option1][option2]`.

use std::io::{BufRead, Write};

use anyhow::{anyhow, Result};
use log::info;

use shef::ShefValue;

/// The store-side contract of the decoder
pub trait ShefLoader {
    /// Loader name as registered
    fn name(&self) -> &'static str;

    /// Whether the loader can synthesize SHEF text from its store
    fn can_unload(&self) -> bool {
        false
    }

    /// Apply the square-bracketed command-line options
    fn set_options(&mut self, options: &[String]) -> Result<()>;

    /// The store-specific series identity of a value
    fn time_series_name(&self, value: &ShefValue) -> String;

    /// Accept one decoded value
    fn set_shef_value(&mut self, value: &ShefValue) -> Result<()>;

    /// Persist the values accumulated for the current series
    fn load_time_series(&mut self) -> Result<()>;

    /// Flush any remaining series; called exactly once
    fn done(&mut self) -> Result<()>;

    /// Write SHEF text for the series named on the input
    fn unload(&mut self, input: &mut dyn BufRead) -> Result<()>;
}

/// Construct a loader from its command-line specification
///
/// The registration table is fixed at build time; the decoder depends only
/// on the [`ShefLoader`] trait.
pub fn create(spec: &str, output: Box<dyn Write>) -> Result<Box<dyn ShefLoader>> {
    let (name, options) = parse_spec(spec)?;
    let mut loader: Box<dyn ShefLoader> = match name.as_str() {
        "dummy" | "dummy_loader" => Box::new(DummyLoader::new(output)),
        other => return Err(anyhow!("no such loader: {}", other)),
    };
    loader.set_options(&options)?;
    info!("{} loader instantiated", loader.name());
    Ok(loader)
}

// split "name[opt1][opt2]" into the name and its options
fn parse_spec(spec: &str) -> Result<(String, Vec<String>)> {
    let (name, rest) = match spec.find('[') {
        Some(pos) => (&spec[..pos], &spec[pos..]),
        None => (spec, ""),
    };
    if name.is_empty() {
        return Err(anyhow!("empty loader name in [{}]", spec));
    }
    let mut options = Vec::new();
    let mut cursor = rest;
    while !cursor.is_empty() {
        if !cursor.starts_with('[') {
            return Err(anyhow!("malformed loader options in [{}]", spec));
        }
        let end = cursor
            .find(']')
            .ok_or_else(|| anyhow!("unterminated loader option in [{}]", spec))?;
        options.push(cursor[1..end].to_string());
        cursor = &cursor[end + 1..];
    }
    Ok((name.to_string(), options))
}

/// Reference loader: writes each series to the output as text
///
/// Useful for exercising the loader plumbing without a real store. One
/// line per series name, then one indented line per value, sorted by
/// observation time.
pub struct DummyLoader {
    output: Box<dyn Write>,
    current: Option<String>,
    rows: Vec<(String, f64, char, String)>,
    series_count: usize,
    value_count: usize,
}

impl DummyLoader {
    pub fn new(output: Box<dyn Write>) -> Self {
        DummyLoader {
            output,
            current: None,
            rows: Vec::new(),
            series_count: 0,
            value_count: 0,
        }
    }
}

impl ShefLoader for DummyLoader {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn set_options(&mut self, options: &[String]) -> Result<()> {
        if !options.is_empty() {
            info!("dummy loader initialized with {:?}", options);
        }
        Ok(())
    }

    fn time_series_name(&self, value: &ShefValue) -> String {
        format!("{}.{}", value.location, value.parameter_code)
    }

    fn set_shef_value(&mut self, value: &ShefValue) -> Result<()> {
        self.current = Some(self.time_series_name(value));
        let created = value
            .creation_time
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        self.rows.push((
            value.obs_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            value.value,
            value.qualifier,
            created,
        ));
        self.value_count += 1;
        Ok(())
    }

    fn load_time_series(&mut self) -> Result<()> {
        if let Some(name) = self.current.take() {
            info!("storing {} values to {}", self.rows.len(), name);
            writeln!(self.output, "{}", name)?;
            self.rows
                .sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
            for (time, value, qualifier, created) in self.rows.drain(..) {
                writeln!(self.output, "\t{}, {}, {}, {}", time, value, qualifier, created)?;
            }
            self.series_count += 1;
        }
        Ok(())
    }

    fn done(&mut self) -> Result<()> {
        self.load_time_series()?;
        info!(
            "dummy loader stored {} values in {} time series",
            self.value_count, self.series_count
        );
        self.output.flush()?;
        Ok(())
    }

    fn unload(&mut self, _input: &mut dyn BufRead) -> Result<()> {
        Err(anyhow!("the dummy loader cannot unload"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec() {
        assert_eq!(parse_spec("dummy").unwrap(), ("dummy".to_string(), vec![]));
        let (name, options) = parse_spec("dummy[a][b c]").unwrap();
        assert_eq!(name, "dummy");
        assert_eq!(options, vec!["a".to_string(), "b c".to_string()]);
        assert!(parse_spec("dummy[a").is_err());
        assert!(parse_spec("[a]").is_err());
    }

    #[test]
    fn test_unknown_loader() {
        assert!(create("nonesuch", Box::new(Vec::new())).is_err());
    }
}
