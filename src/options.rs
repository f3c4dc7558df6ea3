//! Index options (reloptions)

use derivative::Derivative;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::base::HRL_WORD_SIZE;
use crate::error::{BitmapError, Result};

#[derive(Derivative, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[derivative(Default)]
pub struct BitmapOptions {
    /// Number of tuple ids buffered during a build before they are
    /// appended to their bitmap vectors
    #[derivative(Default(value = "16384"))]
    pub tid_buffer_threshold: usize,

    /// Maximum number of tuple ids expanded at once by tuple scans
    #[derivative(Default(value = "16384"))]
    pub batch_tids: usize,

    /// Check for interrupts every X heap tuples during a build
    #[derivative(Default(value = "1000"))]
    pub interrupt_interval: u64,

    /// Show a progress bar while building (not stored)
    #[serde(skip)]
    pub show_progress: bool,
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| BitmapError::InvalidOption(key.to_string(), value.to_string()))
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(BitmapError::InvalidOption(
            key.to_string(),
            value.to_string(),
        ));
    }
    Ok(())
}

impl BitmapOptions {
    /// Checks the bounds of every option
    ///
    /// A batch of tuple ids must hold at least one word, otherwise ones
    /// fills can never be expanded.
    pub fn validate(&self) -> Result<()> {
        check_range(
            "tid_buffer_threshold",
            self.tid_buffer_threshold as u64,
            1,
            1 << 24,
        )?;
        check_range("batch_tids", self.batch_tids as u64, HRL_WORD_SIZE, 1 << 24)?;
        check_range("interrupt_interval", self.interrupt_interval, 1, 1 << 30)?;
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut options = self.clone();
        match key {
            "tid_buffer_threshold" => options.tid_buffer_threshold = parse_usize(key, value)?,
            "batch_tids" => options.batch_tids = parse_usize(key, value)?,
            "interrupt_interval" => options.interrupt_interval = parse_usize(key, value)? as u64,
            _ => return Err(BitmapError::UnknownOption(key.to_string())),
        }
        options.validate()?;
        *self = options;
        Ok(())
    }
}

/// Parses `key=value` reloptions
///
/// When `validate` is false, unknown keys and malformed values are
/// skipped (with a warning) and the defaults kept.
pub fn parse_options<I, S>(reloptions: I, validate: bool) -> Result<BitmapOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = BitmapOptions::default();

    for option in reloptions {
        let option = option.as_ref();
        let (key, value) = match option.split_once('=') {
            Some((k, v)) => (k.trim().to_ascii_lowercase(), v),
            None => {
                if validate {
                    return Err(BitmapError::InvalidOption(
                        option.to_string(),
                        String::new(),
                    ));
                }
                warn!("Ignoring malformed option {}", option);
                continue;
            }
        };

        if let Err(e) = options.set(&key, value) {
            if validate {
                return Err(e);
            }
            warn!("Ignoring option {}: {}", option, e);
        }
    }

    options.validate()?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = parse_options(Vec::<String>::new(), true).expect("no options");
        assert_eq!(options, BitmapOptions::default());
        assert_eq!(options.interrupt_interval, 1000);
    }

    #[test]
    fn test_parse() {
        let options = parse_options(["batch_tids=128", "TID_BUFFER_THRESHOLD = 10"], true)
            .expect("valid options");
        assert_eq!(options.batch_tids, 128);
        assert_eq!(options.tid_buffer_threshold, 10);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            parse_options(["fillfactor=10"], true),
            Err(BitmapError::UnknownOption(_))
        ));
        assert!(matches!(
            parse_options(["batch_tids=3"], true),
            Err(BitmapError::InvalidOption(_, _))
        ));

        let options = parse_options(["fillfactor=10", "batch_tids=3"], false).expect("lenient");
        assert_eq!(options, BitmapOptions::default());
    }

    #[test]
    fn test_validate() {
        assert!(BitmapOptions::default().validate().is_ok());

        let options = BitmapOptions {
            interrupt_interval: 0,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(BitmapError::InvalidOption(key, _)) if key == "interrupt_interval"
        ));

        let options = BitmapOptions {
            batch_tids: 10,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(BitmapError::InvalidOption(key, _)) if key == "batch_tids"
        ));

        let options = BitmapOptions {
            tid_buffer_threshold: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
