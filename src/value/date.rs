//! The formatted timestamp value.

use std::sync::OnceLock;

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, TimeZone};

use crate::error::{Error, RuntimeError};

use super::Value;

/// A timestamp rendered through a strftime-style format string. A timestamp
/// of zero means "now at render time". The rendered form is produced once
/// on first use and stays stable for the rest of the render.
#[derive(Debug)]
pub struct DateValue {
    format: String,
    timestamp: i64,
    rendered: OnceLock<String>,
}

impl DateValue {
    /// Creates a date value. An empty or malformed format string is a
    /// construction error.
    pub fn new(format: impl Into<String>, timestamp: i64) -> Result<Self, Error> {
        let format = format.into();
        if format.is_empty() {
            return Err(RuntimeError::new("a date value needs a non-empty format").into());
        }
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            return Err(
                RuntimeError::new(format!("invalid date format string '{}'", format)).into(),
            );
        }
        Ok(Self {
            format,
            timestamp,
            rendered: OnceLock::new(),
        })
    }

    /// Creates a date value formatting the render-time clock.
    pub fn now(format: impl Into<String>) -> Result<Self, Error> {
        Self::new(format, 0)
    }

    fn effective_timestamp(&self) -> i64 {
        if self.timestamp == 0 {
            Local::now().timestamp()
        } else {
            self.timestamp
        }
    }
}

impl Value for DateValue {
    fn as_string(&self) -> &str {
        self.rendered.get_or_init(|| {
            let when = match Local.timestamp_opt(self.effective_timestamp(), 0).single() {
                Some(when) => when,
                None => Local::now(),
            };
            when.format(&self.format).to_string()
        })
    }

    fn to_numeric(&self) -> i64 {
        self.effective_timestamp()
    }

    fn to_double(&self) -> f64 {
        self.to_numeric() as f64
    }

    // dates are never truthy
    fn to_boolean(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_a_fixed_timestamp() {
        let date = DateValue::new("%Y", 951177600).unwrap();
        assert_eq!(date.as_string(), "2000");
        assert_eq!(date.to_numeric(), 951177600);
    }

    #[test]
    fn empty_format_is_an_error() {
        assert!(DateValue::new("", 0).is_err());
    }

    #[test]
    fn invalid_format_is_an_error() {
        assert!(DateValue::new("%Q-nope", 0).is_err());
    }

    #[test]
    fn never_truthy() {
        let date = DateValue::new("%Y-%m-%d", 0).unwrap();
        assert!(!date.to_boolean());
    }
}
