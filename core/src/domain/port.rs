//! Port number validation.

use crate::error::{Error, Result};

/// Validate a numeric port coming from an untyped source.
///
/// Rejects 0, values above 65535, negatives, fractions, NaN and infinities.
pub fn validate_port(value: f64) -> Result<u16> {
    if !value.is_finite() || value.fract() != 0.0 || !(1.0..=65535.0).contains(&value) {
        return Err(Error::Validation(format!(
            "Invalid port {}: expected an integer between 1 and 65535",
            value
        )));
    }
    Ok(value as u16)
}

/// Parse and validate a port from text.
pub fn parse_port(text: &str) -> Result<u16> {
    let trimmed = text.trim();
    let value: i64 = trimmed.parse().map_err(|_| {
        Error::Validation(format!(
            "Invalid port '{}': expected an integer between 1 and 65535",
            trimmed
        ))
    })?;
    validate_port(value as f64)
}

/// Reject port 0 on an already-typed port.
pub fn ensure_port(port: u16) -> Result<u16> {
    if port == 0 {
        return Err(Error::Validation(
            "Invalid port 0: expected an integer between 1 and 65535".to_string(),
        ));
    }
    Ok(port)
}

/// Validate an inclusive range `start..=end`.
pub fn validate_port_range(start: u16, end: u16) -> Result<()> {
    ensure_port(start)?;
    ensure_port(end)?;
    if start > end {
        return Err(Error::Validation(format!(
            "Invalid port range {}-{}: start must not exceed end",
            start, end
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_domain_values() {
        for bad in [0.0, 65536.0, -1.0, 80.5, f64::NAN, f64::INFINITY] {
            assert!(validate_port(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_accepts_full_domain() {
        for port in 1..=65535u32 {
            assert_eq!(validate_port(port as f64).unwrap() as u32, port);
        }
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port(" 8080 ").unwrap(), 8080);
        assert!(parse_port("abc").is_err());
        assert!(parse_port("3.5").is_err());
        assert!(parse_port("-80").is_err());
        assert!(parse_port("70000").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_port_range(3000, 3010).is_ok());
        assert!(validate_port_range(3000, 3000).is_ok());
        assert!(validate_port_range(0, 10).is_err());
        assert!(validate_port_range(10, 5).is_err());
    }
}
