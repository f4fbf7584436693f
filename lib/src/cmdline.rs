//! Boot command line helpers shared by the runtime configuration parsers.

pub fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("on")
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("enabled")
        || value == "1"
    {
        Some(true)
    } else if value.eq_ignore_ascii_case("off")
        || value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("no")
        || value.eq_ignore_ascii_case("disabled")
        || value == "0"
    {
        Some(false)
    } else {
        None
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer.
pub fn parse_u64(value: &str) -> Option<u64> {
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse::<u64>().ok(),
    }
}

/// Iterate `key=value` tokens of a command line. Bare flags yield an empty value.
pub fn tokens(cmdline: &str) -> impl Iterator<Item = (&str, &str)> {
    cmdline
        .split_whitespace()
        .map(|token| token.split_once('=').unwrap_or((token, "")))
}
