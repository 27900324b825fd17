//! NMEA 0183 position sentences.
//!
//! Decoding is done by `nmea-parser`; this module only turns the two
//! sentences that carry a position fix into a [`Fix`]:
//!
//! - `RMC`: accepted when the status is `A` (valid)
//! - `GGA`: accepted when the quality indicator is not `0`; HDOP is
//!   converted to an accuracy radius
//!
//! Any talker ID is accepted (`GP`, `GN`, `GL`, ...). The fix is stamped with
//! the receive time rather than the sentence time, which carries no date for
//! GGA.

use nmea_parser::gnss::GgaQualityIndicator;
use nmea_parser::{NmeaParser, ParsedMessage};

use crate::error::ParseError;
use crate::model::Fix;

/// Accuracy assumed when the sentence carries no HDOP
pub const DEFAULT_ACCURACY_M: f32 = 10.0;
/// Meters of horizontal error per unit of HDOP
pub const HDOP_TO_METERS: f32 = 5.0;

/// Stateful sentence decoder.
///
/// `nmea-parser` keeps multi-sentence state (GSV, AIS fragments), so one
/// `FixParser` should be kept per input stream.
pub struct FixParser {
    parser: NmeaParser,
}

impl Default for FixParser {
    fn default() -> Self {
        FixParser::new()
    }
}

impl FixParser {
    pub fn new() -> Self {
        FixParser {
            parser: NmeaParser::new(),
        }
    }

    /// Parse one sentence into a fix stamped with `received_ms`.
    pub fn parse(&mut self, line: &str, received_ms: i64) -> Result<Fix, ParseError> {
        let line = line.trim();
        let sentence = sentence_type(line)?;

        let message = self
            .parser
            .parse_sentence(line)
            .map_err(|e| ParseError::Invalid(e.to_string()))?;

        match message {
            ParsedMessage::Rmc(rmc) => {
                if rmc.status_active != Some(true) {
                    return Err(ParseError::NoFix);
                }
                position(rmc.latitude, rmc.longitude)
                    .map(|(lat, lon)| Fix::new(lat, lon, DEFAULT_ACCURACY_M, received_ms))
            }
            ParsedMessage::Gga(gga) => {
                if matches!(gga.quality, GgaQualityIndicator::Invalid) {
                    return Err(ParseError::NoFix);
                }
                let accuracy = gga
                    .hdop
                    .filter(|h| h.is_finite() && *h > 0.0)
                    .map_or(DEFAULT_ACCURACY_M, |hdop| hdop as f32 * HDOP_TO_METERS);
                position(gga.latitude, gga.longitude)
                    .map(|(lat, lon)| Fix::new(lat, lon, accuracy, received_ms))
            }
            _ => Err(ParseError::Unsupported(sentence.to_string())),
        }
    }
}

/// The three-letter sentence type of `$ttsss,...`.
///
/// Also rejects input that is too short or non-ASCII before it reaches the
/// decoder, which slices the address field by byte offset.
fn sentence_type(line: &str) -> Result<&str, ParseError> {
    let not_nmea = || ParseError::NotNmea(line.to_string());

    if !line.starts_with('$') || !line.is_ascii() {
        return Err(not_nmea());
    }
    let address = line.split(',').next().unwrap_or("");
    if address.len() < 6 || !line.contains(',') {
        return Err(not_nmea());
    }
    Ok(&address[address.len() - 3..])
}

fn position(lat: Option<f64>, lon: Option<f64>) -> Result<(f64, f64), ParseError> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok((lat, lon)),
        _ => Err(ParseError::NoFix),
    }
}

/// Parse a single sentence without keeping decoder state.
pub fn parse_fix(line: &str, received_ms: i64) -> Result<Fix, ParseError> {
    FixParser::new().parse(line, received_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    #[test]
    fn test_parse_rmc() {
        let fix = parse_fix(RMC, 1_000).unwrap();
        assert!((fix.lat - 48.1173).abs() < 1e-4);
        assert!((fix.lon - 11.516_666).abs() < 1e-4);
        assert_eq!(fix.accuracy_meters, DEFAULT_ACCURACY_M);
        assert_eq!(fix.timestamp_ms, 1_000);
    }

    #[test]
    fn test_parse_gga_uses_hdop() {
        let fix = parse_fix(GGA, 2_000).unwrap();
        assert!((fix.lat - 48.1173).abs() < 1e-4);
        assert!((fix.accuracy_meters - 4.5).abs() < 1e-5);
    }

    #[test]
    fn test_west_longitude_and_gn_talker() {
        let fix = parse_fix(
            "$GNRMC,101500.00,A,4800.0000,N,00430.0000,W,0.1,,161026,,,A*71",
            0,
        )
        .unwrap();
        assert!((fix.lat - 48.0).abs() < 1e-9);
        assert!((fix.lon + 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_no_fix_sentences() {
        assert_eq!(
            parse_fix(
                "$GPRMC,123519,V,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*7D",
                0
            ),
            Err(ParseError::NoFix)
        );
        assert_eq!(
            parse_fix("$GNGGA,000001,4800.000,N,00430.000,W,0,00,,,M,,M,,*5B", 0),
            Err(ParseError::NoFix)
        );
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let bad = RMC.replace("*6A", "*6B");
        assert!(matches!(parse_fix(&bad, 0), Err(ParseError::Invalid(_))));
    }

    #[test]
    fn test_parser_reused_across_sentences() {
        let mut parser = FixParser::new();
        assert!(parser.parse(RMC, 1).is_ok());
        assert!(parser.parse(GGA, 2).is_ok());
        assert_eq!(parser.parse(RMC, 3).unwrap().timestamp_ms, 3);
    }

    #[test]
    fn test_unsupported_and_garbage() {
        assert_eq!(
            parse_fix(
                "$GPGSV,3,1,11,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00*74",
                0
            ),
            Err(ParseError::Unsupported("GSV".to_string()))
        );
        assert!(matches!(parse_fix("hello", 0), Err(ParseError::NotNmea(_))));
        assert!(matches!(parse_fix("$GP,1", 0), Err(ParseError::NotNmea(_))));
        assert!(matches!(parse_fix("$GPRMC°,1", 0), Err(ParseError::NotNmea(_))));
    }
}
