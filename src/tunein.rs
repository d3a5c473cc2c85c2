use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;

pub mod api;

// Either a bare `s297990` or the trailing part of a station page like `/radio/MSNBC-s297990/`
static STATION_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[-/])(s\d+)(?:[/?#]|$)").unwrap());

/// Extracts a TuneIn station ID out from a user-inputted ID or station page URL
/// # Errors
/// Error when unable to find a station ID
pub fn extract_station_id(input: &str) -> Result<String> {
    let input = input.trim();
    if let Some(captures) = STATION_ID_REGEX.captures(input) {
        return Ok(captures[1].to_string());
    }

    bail!("Unable to parse TuneIn station URL / ID from `{input}`");
}
