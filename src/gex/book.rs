//! Keyed aggregation over an options chain.
//!
//! One small metrics record per strike, updated in place per tick
//! (last-write-wins per field, never accumulated), plus a separately tracked
//! reference price. The derived exposure is computed on demand from the
//! latest stored state.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::instrument::{OptionInstrument, OptionKind, Strike};

/// Last-seen open interest and gamma for one strike, split by side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrikeRecord {
    pub call_oi: f64,
    pub put_oi: f64,
    pub call_gamma: f64,
    pub put_gamma: f64,
    /// Latest expiry observed at this strike; drives stale-entry eviction.
    pub latest_expiry: Option<NaiveDate>,
}

impl StrikeRecord {
    pub fn total_open_interest(&self) -> f64 {
        self.call_oi + self.put_oi
    }
}

/// Strike-keyed aggregate state for one options chain.
///
/// Records are created lazily on the first tick that references a strike and
/// evicted once every expiry seen at that strike has passed. Keys iterate in
/// ascending strike order.
#[derive(Debug, Clone, Default)]
pub struct StrikeBook {
    strikes: BTreeMap<Strike, StrikeRecord>,
    reference_price: Option<f64>,
}

impl StrikeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one options ticker update: overwrite the side's fields on the
    /// strike's record, creating it with zero defaults on first use.
    ///
    /// Feeding the identical tick twice leaves the record unchanged.
    pub fn apply(&mut self, instrument: &OptionInstrument, open_interest: f64, gamma: f64) {
        let record = self.strikes.entry(instrument.strike).or_default();
        match instrument.kind {
            OptionKind::Call => {
                record.call_oi = open_interest;
                record.call_gamma = gamma;
            }
            OptionKind::Put => {
                record.put_oi = open_interest;
                record.put_gamma = gamma;
            }
        }
        if record
            .latest_expiry
            .is_none_or(|expiry| instrument.expiry > expiry)
        {
            record.latest_expiry = Some(instrument.expiry);
        }
    }

    /// Last-write-wins reference (spot/index) price. Zero and negative values
    /// are treated as unset and ignored.
    pub fn set_reference_price(&mut self, price: f64) {
        if price > 0.0 {
            self.reference_price = Some(price);
        }
    }

    pub fn reference_price(&self) -> Option<f64> {
        self.reference_price
    }

    /// Net gamma exposure at a strike, in millions:
    /// `(call_gamma * call_oi - put_gamma * put_oi) * reference / 1e6`.
    ///
    /// Exactly `0.0` (never NaN) while the reference price is unset.
    pub fn net_exposure_millions(&self, record: &StrikeRecord) -> f64 {
        match self.reference_price {
            Some(reference) => {
                (record.call_gamma * record.call_oi - record.put_gamma * record.put_oi)
                    * reference
                    / 1_000_000.0
            }
            None => 0.0,
        }
    }

    /// Drop records whose latest observed expiry is strictly before `today`.
    /// Returns the number of evicted strikes.
    pub fn evict_expired(&mut self, today: NaiveDate) -> usize {
        let before = self.strikes.len();
        self.strikes
            .retain(|_, record| record.latest_expiry.is_none_or(|expiry| expiry >= today));
        before - self.strikes.len()
    }

    pub fn get(&self, strike: Strike) -> Option<&StrikeRecord> {
        self.strikes.get(&strike)
    }

    /// Iterate records in ascending strike order.
    pub fn iter(&self) -> impl Iterator<Item = (Strike, &StrikeRecord)> {
        self.strikes.iter().map(|(strike, record)| (*strike, record))
    }

    pub fn len(&self) -> usize {
        self.strikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::parse_instrument;

    fn call_40k() -> OptionInstrument {
        parse_instrument("BTC-29DEC23-40000-C").unwrap()
    }

    fn put_40k() -> OptionInstrument {
        parse_instrument("BTC-29DEC23-40000-P").unwrap()
    }

    #[test]
    fn test_lazy_record_creation() {
        let mut book = StrikeBook::new();
        assert!(book.is_empty());
        book.apply(&call_40k(), 600.0, 0.00002);
        assert_eq!(book.len(), 1);

        let record = book.get(Strike::from_price(40000.0)).unwrap();
        assert_eq!(record.call_oi, 600.0);
        assert_eq!(record.call_gamma, 0.00002);
        assert_eq!(record.put_oi, 0.0);
        assert_eq!(record.put_gamma, 0.0);
    }

    #[test]
    fn test_identical_tick_is_idempotent() {
        let mut book = StrikeBook::new();
        book.apply(&call_40k(), 600.0, 0.00002);
        let first = book.get(Strike::from_price(40000.0)).unwrap().clone();

        book.apply(&call_40k(), 600.0, 0.00002);
        let second = book.get(Strike::from_price(40000.0)).unwrap();
        assert_eq!(&first, second);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_last_write_wins_per_field() {
        let mut book = StrikeBook::new();
        book.apply(&call_40k(), 600.0, 0.00002);
        book.apply(&put_40k(), 300.0, 0.00003);
        book.apply(&call_40k(), 650.0, 0.000021);

        let record = book.get(Strike::from_price(40000.0)).unwrap();
        // Not accumulated: the second call tick replaced the first.
        assert_eq!(record.call_oi, 650.0);
        assert_eq!(record.call_gamma, 0.000021);
        // Put side untouched by call updates.
        assert_eq!(record.put_oi, 300.0);
        assert_eq!(record.total_open_interest(), 950.0);
    }

    #[test]
    fn test_exposure_zero_without_reference() {
        let mut book = StrikeBook::new();
        book.apply(&call_40k(), 600.0, 0.00002);
        let record = book.get(Strike::from_price(40000.0)).unwrap().clone();

        let exposure = book.net_exposure_millions(&record);
        assert_eq!(exposure, 0.0);
        assert!(!exposure.is_nan());
    }

    #[test]
    fn test_call_exposure_formula() {
        // BTC-29DEC23-40000-C, OI 600, gamma 0.00002, reference 42000
        // -> 0.00002 * 600 * 42000 = 504 -> 0.000504M
        let mut book = StrikeBook::new();
        book.apply(&call_40k(), 600.0, 0.00002);
        book.set_reference_price(42000.0);

        let record = book.get(Strike::from_price(40000.0)).unwrap().clone();
        let exposure = book.net_exposure_millions(&record);
        assert!((exposure - 0.000504).abs() < 1e-12);
    }

    #[test]
    fn test_reference_price_ignores_unset_values() {
        let mut book = StrikeBook::new();
        book.set_reference_price(0.0);
        assert_eq!(book.reference_price(), None);
        book.set_reference_price(42000.0);
        book.set_reference_price(-1.0);
        assert_eq!(book.reference_price(), Some(42000.0));
        // Last write wins.
        book.set_reference_price(43000.0);
        assert_eq!(book.reference_price(), Some(43000.0));
    }

    #[test]
    fn test_evict_expired_strikes() {
        let mut book = StrikeBook::new();
        book.apply(&call_40k(), 600.0, 0.00002); // expires 2023-12-29
        book.apply(
            &parse_instrument("BTC-27JUN25-50000-C").unwrap(),
            100.0,
            0.00001,
        );

        let today = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(book.evict_expired(today), 1);
        assert_eq!(book.len(), 1);
        assert!(book.get(Strike::from_price(40000.0)).is_none());
        assert!(book.get(Strike::from_price(50000.0)).is_some());

        // Eviction keys off the *latest* expiry seen at the strike.
        book.apply(&call_40k(), 600.0, 0.00002);
        book.apply(
            &parse_instrument("BTC-26DEC25-40000-C").unwrap(),
            50.0,
            0.00001,
        );
        assert_eq!(book.evict_expired(today), 0);
    }
}
