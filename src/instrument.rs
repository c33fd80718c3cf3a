//! Option instrument-name parsing.
//!
//! Deribit-style names are dash-delimited: `BTC-29DEC23-40000-C`.
//! Anything that does not decompose into exactly four tokens is a
//! non-option instrument (perpetual, future) and yields `None`.

use std::fmt;

use chrono::NaiveDate;

/// Call or put side of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Call,
    Put,
}

/// Strike price key with a total order and exact hashing.
///
/// Stored as integer thousandths of the quoted price so that fractional
/// strikes (`0d625` = 0.625 on low-priced underlyings) stay exact and the
/// keyed map iterates in ascending strike order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Strike(i64);

impl Strike {
    pub fn from_price(price: f64) -> Self {
        Strike((price * 1000.0).round() as i64)
    }

    pub fn price(&self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl fmt::Display for Strike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.price())
    }
}

/// A fully decomposed option instrument identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionInstrument {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike: Strike,
    pub kind: OptionKind,
}

/// Parse a dash-delimited option name into its four components.
///
/// Returns `None` for anything that is not an option (`BTC-PERPETUAL`,
/// `BTC-28MAR25`), or whose expiry/strike/side tokens do not parse. Callers
/// treat `None` as skip-without-error.
pub fn parse_instrument(name: &str) -> Option<OptionInstrument> {
    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() != 4 {
        return None;
    }

    let expiry = NaiveDate::parse_from_str(parts[1], "%d%b%y").ok()?;

    // Fractional strikes use `d` as the decimal marker: 0d625 -> 0.625
    let strike: f64 = parts[2].replace('d', ".").parse().ok()?;
    if strike <= 0.0 {
        return None;
    }

    let kind = match parts[3] {
        "C" => OptionKind::Call,
        "P" => OptionKind::Put,
        _ => return None,
    };

    Some(OptionInstrument {
        underlying: parts[0].to_string(),
        expiry,
        strike: Strike::from_price(strike),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call() {
        let inst = parse_instrument("BTC-29DEC23-40000-C").unwrap();
        assert_eq!(inst.underlying, "BTC");
        assert_eq!(inst.expiry, NaiveDate::from_ymd_opt(2023, 12, 29).unwrap());
        assert_eq!(inst.strike, Strike::from_price(40000.0));
        assert_eq!(inst.kind, OptionKind::Call);
    }

    #[test]
    fn test_parse_put() {
        let inst = parse_instrument("ETH-1NOV24-2500-P").unwrap();
        assert_eq!(inst.kind, OptionKind::Put);
        assert_eq!(inst.expiry, NaiveDate::from_ymd_opt(2024, 11, 1).unwrap());
    }

    #[test]
    fn test_parse_fractional_strike() {
        let inst = parse_instrument("XRP-4APR25-0d625-P").unwrap();
        assert!((inst.strike.price() - 0.625).abs() < 1e-12);
    }

    #[test]
    fn test_non_option_is_skipped() {
        assert!(parse_instrument("BTC-PERPETUAL").is_none());
        assert!(parse_instrument("BTC-28MAR25").is_none());
        assert!(parse_instrument("BTCUSDT").is_none());
        assert!(parse_instrument("BTC-29DEC23-40000-C-EXTRA").is_none());
    }

    #[test]
    fn test_malformed_tokens_are_skipped() {
        // bad expiry
        assert!(parse_instrument("BTC-99XYZ23-40000-C").is_none());
        // bad strike
        assert!(parse_instrument("BTC-29DEC23-forty-C").is_none());
        // bad side
        assert!(parse_instrument("BTC-29DEC23-40000-X").is_none());
    }

    #[test]
    fn test_strike_ordering() {
        let mut strikes = vec![
            Strike::from_price(42000.0),
            Strike::from_price(0.625),
            Strike::from_price(40000.0),
        ];
        strikes.sort();
        assert_eq!(strikes[0], Strike::from_price(0.625));
        assert_eq!(strikes[2], Strike::from_price(42000.0));
    }
}
