use crate::error::{Error, Result};

/// Parses `<digits>[smhdw]` into seconds. A bare number is seconds.
pub fn parse_expiration(raw: &str) -> Result<i32> {
    let invalid = || Error::InvalidExpiration(raw.to_string());

    let (digits, unit) = match raw.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&raw[..raw.len() - 1], c),
        Some(_) => (raw, 's'),
        None => return Err(invalid()),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let multiplier: i32 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        'w' => 7 * 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    let amount: i32 = digits.parse().map_err(|_| invalid())?;
    amount.checked_mul(multiplier).ok_or_else(invalid)
}

/// Resolves a caller-requested lifetime against the policy maximum.
///
/// No request (or an empty one) and a request of zero both mean the maximum.
/// Longer requests are clamped. Unparseable requests are rejected.
pub fn resolve_expiration(max_seconds: i32, requested: Option<&str>) -> Result<i32> {
    let Some(requested) = requested.filter(|r| !r.is_empty()) else {
        return Ok(max_seconds);
    };

    let seconds = parse_expiration(requested)?;
    if seconds == 0 || seconds > max_seconds {
        Ok(max_seconds)
    } else {
        Ok(seconds)
    }
}
