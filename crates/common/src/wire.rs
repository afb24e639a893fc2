//! Line-oriented text framing used between broadcaster and receivers.
//!
//! One sample per line: `ECG Value: <decimal>\n`. Only the value travels;
//! receivers stamp samples with their own clock on arrival.

use crate::error::{TelemetryError, TelemetryResult};

pub const LABEL: &str = "ECG Value:";

/// Longest line, newline excluded, a receiver buffers before giving up on
/// the peer.
pub const MAX_LINE: usize = 1024;

pub fn encode(value: f64) -> String {
    format!("{LABEL} {value}\n")
}

pub fn decode(line: &str) -> TelemetryResult<f64> {
    let rest = line
        .trim()
        .strip_prefix(LABEL)
        .ok_or_else(|| TelemetryError::MalformedMessage(format!("missing label: {:?}", line.trim())))?;

    let text = rest.trim();
    let value: f64 = text
        .parse()
        .map_err(|_| TelemetryError::MalformedMessage(format!("not a number: {text:?}")))?;

    if !value.is_finite() {
        return Err(TelemetryError::MalformedMessage(format!("non-finite value: {text:?}")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_line_matches_wire_format() {
        assert_eq!(encode(0.5), "ECG Value: 0.5\n");
        assert_eq!(encode(-1.25), "ECG Value: -1.25\n");
    }

    #[test]
    fn decoded_value_matches_encoded_value() {
        for v in [0.0, 1.0, -1.0, 0.1, 0.587785252292473, -0.9510565162951536, 1e-9, 12345.678] {
            let decoded = decode(&encode(v)).unwrap();
            assert!((decoded - v).abs() <= f64::EPSILON * v.abs().max(1.0));
        }
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert_eq!(decode("  ECG Value:   42.5  \r\n").unwrap(), 42.5);
        assert_eq!(decode("ECG Value:7").unwrap(), 7.0);
    }

    #[test]
    fn rejects_lines_without_label() {
        for line in ["42.0", "Value: 1.0", "", "HR Value: 60", "junk ECG Value: 1.0"] {
            assert!(matches!(decode(line), Err(TelemetryError::MalformedMessage(_))), "{line:?}");
        }
    }

    #[test]
    fn rejects_non_numeric_or_non_finite_values() {
        for line in ["ECG Value: abc", "ECG Value:", "ECG Value: 1.0.0", "ECG Value: NaN", "ECG Value: inf"] {
            assert!(matches!(decode(line), Err(TelemetryError::MalformedMessage(_))), "{line:?}");
        }
    }
}
