//! Generated test data: random identifiers and date conversions.
//!
//! Negative cases use these to build identifiers no service should know,
//! and payload preparation uses the date helpers to turn data-row dates
//! into the formats the services expect.

use crate::error::{HarnessError, Result};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use rand::Rng;
use rand::distributions::Alphanumeric;

/// Input format of data-row dates such as `7/04/2024 13:05`.
pub const DEFAULT_INPUT_FORMAT: &str = "%m/%d/%Y %H:%M";

/// Output format of [`convert_date`].
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ISO_LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// `len` random decimal digits.
pub fn random_numeric(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// `len` random ASCII letters and digits.
pub fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A number in `min..=max`; the bounds may be given in either order.
pub fn random_between(min: i64, max: i64) -> i64 {
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    rand::thread_rng().gen_range(low..=high)
}

/// Converts `input`, written in `input_format`, to `yyyy-MM-dd`.
///
/// The format may carry a time part or be date-only.
pub fn convert_date(input: &str, input_format: &str) -> Result<String> {
    let input = input.trim();
    let date = NaiveDateTime::parse_from_str(input, input_format)
        .map(|dt| dt.date())
        .or_else(|_| NaiveDate::parse_from_str(input, input_format))
        .map_err(|e| {
            HarnessError::Templating(format!(
                "cannot read date '{}' as '{}': {}",
                input, input_format, e
            ))
        })?;
    Ok(date.format(DATE_FORMAT).to_string())
}

/// `yyyy-MM-dd HH:mm:ss` to `yyyy-MM-ddTHH:mm:ss`.
pub fn to_iso_local(input: &str) -> Result<String> {
    let input = input.trim();
    let parsed = NaiveDateTime::parse_from_str(input, DATE_TIME_FORMAT).map_err(|e| {
        HarnessError::Templating(format!("cannot read timestamp '{}': {}", input, e))
    })?;
    Ok(parsed.format(ISO_LOCAL_FORMAT).to_string())
}

/// Local date `days` away from today, as `yyyy-MM-dd`.
pub fn date_from_today(days: i64) -> String {
    (Local::now().date_naive() + Duration::days(days))
        .format(DATE_FORMAT)
        .to_string()
}
