use anyhow::{anyhow, bail, Context, Result};
use clap::builder::{
    styling::{AnsiColor, Effects},
    Styles,
};
use std::time::Duration;

/// Parse a SLURM time limit string into Duration.
///
/// Supported formats:
/// - `"D-HH:MM:SS"` — days-hours:minutes:seconds
/// - `"D-HH:MM"` — days-hours:minutes
/// - `"D-HH"` — days-hours
/// - `"HH:MM:SS"` — hours:minutes:seconds
/// - `"MM:SS"` — minutes:seconds
/// - `"MM"` — minutes
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use maspipe::utils::parse_time_limit;
///
/// assert_eq!(parse_time_limit("30").unwrap(), Duration::from_secs(1800));
/// assert_eq!(parse_time_limit("30:45").unwrap(), Duration::from_secs(1845));
/// assert_eq!(parse_time_limit("3:00:00").unwrap(), Duration::from_secs(10800));
/// assert_eq!(parse_time_limit("1-00:00:00").unwrap(), Duration::from_secs(86400));
/// assert_eq!(parse_time_limit("1-12").unwrap(), Duration::from_secs(129600));
/// ```
pub fn parse_time_limit(time_str: &str) -> Result<Duration> {
    let time_str = time_str.trim();
    let (days, rest) = match time_str.split_once('-') {
        Some((days, rest)) => (
            Some(days.parse::<u64>().context("Invalid days in D-HH:MM:SS format")?),
            rest,
        ),
        None => (None, time_str),
    };
    let parts: Vec<&str> = rest.split(':').collect();
    let field = |i: usize, unit: &str| -> Result<u64> {
        parts[i]
            .parse::<u64>()
            .with_context(|| format!("Invalid {unit} in time limit '{time_str}'"))
    };

    let (hours, minutes, seconds) = match (days.is_some(), parts.len()) {
        // Minutes as a single number
        (false, 1) => (0, field(0, "minutes")?, 0),
        // MM:SS
        (false, 2) => (0, field(0, "minutes")?, field(1, "seconds")?),
        // D-HH
        (true, 1) => (field(0, "hours")?, 0, 0),
        // D-HH:MM
        (true, 2) => (field(0, "hours")?, field(1, "minutes")?, 0),
        (_, 3) => (field(0, "hours")?, field(1, "minutes")?, field(2, "seconds")?),
        _ => bail!(
            "Invalid time format. Expected formats: D-HH:MM:SS, D-HH:MM, D-HH, HH:MM:SS, MM:SS, or MM"
        ),
    };

    let total = days
        .unwrap_or(0)
        .checked_mul(86400)
        .and_then(|s| s.checked_add(hours.checked_mul(3600)?))
        .and_then(|s| s.checked_add(minutes.checked_mul(60)?))
        .and_then(|s| s.checked_add(seconds))
        .ok_or_else(|| anyhow!("Time limit '{time_str}' is too large"))?;
    Ok(Duration::from_secs(total))
}

/// Validates a time limit for the `--time` directive, keeping the text as given.
pub fn parse_time_directive(time_str: &str) -> Result<String> {
    parse_time_limit(time_str)?;
    Ok(time_str.trim().to_string())
}

/// Parse memory limit string into megabytes.
///
/// Supported formats:
/// - `"100G"` or `"100g"` — gigabytes (converted to MB)
/// - `"1024M"` or `"1024m"` — megabytes
/// - `"100"` — megabytes (default unit)
///
/// # Examples
///
/// ```
/// use maspipe::utils::parse_memory_limit;
///
/// assert_eq!(parse_memory_limit("8000").unwrap(), 8000);
/// assert_eq!(parse_memory_limit("1024M").unwrap(), 1024);
/// assert_eq!(parse_memory_limit("2G").unwrap(), 2048);
/// ```
pub fn parse_memory_limit(memory_str: &str) -> Result<u64> {
    let memory_str = memory_str.trim();

    if memory_str.is_empty() {
        return Err(anyhow!("Memory limit cannot be empty"));
    }

    // Check if ends with 'G' or 'g' (gigabytes)
    if memory_str.ends_with('G') || memory_str.ends_with('g') {
        let value = memory_str[..memory_str.len() - 1]
            .trim()
            .parse::<u64>()
            .context("Invalid memory value in GB format")?;
        // Convert GB to MB
        value
            .checked_mul(1024)
            .ok_or_else(|| anyhow!("Memory limit '{memory_str}' is too large"))
    }
    // Check if ends with 'M' or 'm' (megabytes)
    else if memory_str.ends_with('M') || memory_str.ends_with('m') {
        let value = memory_str[..memory_str.len() - 1]
            .trim()
            .parse::<u64>()
            .context("Invalid memory value in MB format")?;
        Ok(value)
    }
    // Otherwise, treat as megabytes
    else {
        memory_str
            .parse::<u64>()
            .context("Invalid memory format. Expected formats: 8G, 1024M, or 8000 (MB)")
    }
}

pub const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());
