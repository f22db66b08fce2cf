//! Incremental candle aggregation.
//!
//! Trades are folded into fixed-width buckets keyed by
//! `floor(trade_secs / width) * width`. The series only ever grows at its
//! tail: a trade for the last bucket updates it in place, a trade for a newer
//! bucket opens a candle, and a trade for an older bucket is dropped and
//! counted. Closed candles are never edited by live trades.

use cbx_core::time_util::bucket_start;
use cbx_core::{Candle, Granularity, Match};
use tracing::warn;

/// What applying one trade did to the series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CandleUpdate {
    /// A new bucket was appended.
    Opened(Candle),
    /// The last bucket absorbed the trade.
    Updated(Candle),
    /// The trade belongs to a bucket older than the last one and was dropped.
    Late { bucket: i64, last_bucket: i64 },
}

impl CandleUpdate {
    /// The candle that changed, if any.
    pub fn candle(&self) -> Option<&Candle> {
        match self {
            Self::Opened(c) | Self::Updated(c) => Some(c),
            Self::Late { .. } => None,
        }
    }
}

/// Candle series for one (product, granularity).
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    granularity: Granularity,
    series: Vec<Candle>,
    late: u64,
}

impl CandleAggregator {
    pub fn new(granularity: Granularity) -> Self {
        Self { granularity, series: Vec::new(), late: 0 }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    fn width(&self) -> i64 {
        i64::from(self.granularity.as_secs())
    }

    /// Fold one trade into the series.
    pub fn apply(&mut self, trade: &Match) -> CandleUpdate {
        let bucket = bucket_start(trade.time_secs(), self.width());

        match self.series.last_mut() {
            Some(last) if bucket == last.time => {
                last.absorb(trade.price, trade.size);
                CandleUpdate::Updated(*last)
            }
            Some(last) if bucket < last.time => {
                self.late += 1;
                warn!(
                    "[candles {} {}] late trade {} for bucket {} (last bucket {}), dropped",
                    trade.product_id, self.granularity, trade.trade_id, bucket, last.time
                );
                CandleUpdate::Late { bucket, last_bucket: last.time }
            }
            _ => {
                let candle = Candle::opened_by(bucket, trade.price, trade.size);
                self.series.push(candle);
                CandleUpdate::Opened(candle)
            }
        }
    }

    /// Merge seed history (e.g. from REST) into the series.
    ///
    /// Seed rows are aligned, sorted and de-duplicated. A bucket present on
    /// both sides keeps the seed's open, the wider high/low, the live close
    /// and the larger volume.
    pub fn seed(&mut self, candles: impl IntoIterator<Item = Candle>) {
        let width = self.width();
        let mut seed: Vec<Candle> = candles.into_iter().map(|c| c.aligned(width)).collect();
        seed.sort_by_key(|c| c.time);
        seed.dedup_by_key(|c| c.time);
        if seed.is_empty() {
            return;
        }

        let live = std::mem::take(&mut self.series);
        let mut merged = Vec::with_capacity(live.len() + seed.len());
        let mut seed = seed.into_iter().peekable();
        let mut live = live.into_iter().peekable();

        loop {
            let next = match (seed.peek().map(|c| c.time), live.peek().map(|c| c.time)) {
                (Some(s), Some(l)) if s < l => seed.next(),
                (Some(s), Some(l)) if s > l => live.next(),
                (Some(_), Some(_)) => seed.next().zip(live.next()).map(|(s, l)| Candle {
                    time: s.time,
                    open: s.open,
                    high: s.high.max(l.high),
                    low: s.low.min(l.low),
                    close: l.close,
                    volume: s.volume.max(l.volume),
                }),
                (Some(_), None) => seed.next(),
                (None, Some(_)) => live.next(),
                (None, None) => None,
            };
            match next {
                Some(c) => merged.push(c),
                None => break,
            }
        }
        self.series = merged;
    }

    /// The series, ascending by bucket time.
    pub fn series(&self) -> &[Candle] {
        &self.series
    }

    pub fn last(&self) -> Option<&Candle> {
        self.series.last()
    }

    /// Trades dropped for arriving after their bucket closed.
    pub fn late_count(&self) -> u64 {
        self.late
    }
}

#[cfg(test)]
mod tests {
    use cbx_core::Side;

    use super::*;

    fn trade(secs: i64, price: f64, size: f64) -> Match {
        Match {
            trade_id: secs as u64,
            sequence: secs as u64,
            maker_order_id: "m".into(),
            taker_order_id: "t".into(),
            time_us: secs * 1_000_000,
            product_id: "BTC-USD".into(),
            size,
            price,
            side: Side::Buy,
        }
    }

    fn times(agg: &CandleAggregator) -> Vec<i64> {
        agg.series().iter().map(|c| c.time).collect()
    }

    #[test]
    fn trades_fold_into_two_buckets() {
        let mut agg = CandleAggregator::new(Granularity::M1);
        let updates: Vec<CandleUpdate> = [(10, 100.0), (15, 102.0), (61, 99.0), (62, 101.0), (119, 98.0)]
            .into_iter()
            .map(|(t, p)| agg.apply(&trade(t, p, 1.0)))
            .collect();

        assert_eq!(times(&agg), vec![0, 60]);
        assert!(matches!(updates[0], CandleUpdate::Opened(c) if c.time == 0));
        assert!(matches!(updates[1], CandleUpdate::Updated(_)));
        assert!(matches!(updates[2], CandleUpdate::Opened(c) if c.time == 60));

        let first = agg.series()[0];
        assert_eq!((first.open, first.high, first.low, first.close), (100.0, 102.0, 100.0, 102.0));
        assert_eq!(first.volume, 2.0);
        let second = agg.series()[1];
        assert_eq!((second.open, second.high, second.low, second.close), (99.0, 101.0, 98.0, 98.0));
        assert_eq!(second.volume, 3.0);
    }

    #[test]
    fn single_trade_opens_flat_candle() {
        let mut agg = CandleAggregator::new(Granularity::M5);
        let CandleUpdate::Opened(c) = agg.apply(&trade(301, 7.0, 0.5)) else {
            panic!("expected opened");
        };
        assert_eq!(c, Candle { time: 300, open: 7.0, high: 7.0, low: 7.0, close: 7.0, volume: 0.5 });
    }

    #[test]
    fn late_trade_is_dropped_and_counted() {
        let mut agg = CandleAggregator::new(Granularity::M1);
        agg.apply(&trade(10, 100.0, 1.0));
        agg.apply(&trade(70, 110.0, 1.0));
        let before = agg.series().to_vec();

        let update = agg.apply(&trade(20, 1.0, 5.0));
        assert_eq!(update, CandleUpdate::Late { bucket: 0, last_bucket: 60 });
        assert_eq!(update.candle(), None);
        assert_eq!(agg.late_count(), 1);
        assert_eq!(agg.series(), &before[..]);
    }

    #[test]
    fn skipped_buckets_are_not_filled() {
        let mut agg = CandleAggregator::new(Granularity::M1);
        agg.apply(&trade(5, 1.0, 1.0));
        agg.apply(&trade(300, 2.0, 1.0));
        assert_eq!(times(&agg), vec![0, 300]);
    }

    #[test]
    fn seed_into_empty_series_sorts_and_dedups() {
        let mut agg = CandleAggregator::new(Granularity::M1);
        agg.seed(vec![
            Candle::opened_by(120, 3.0, 1.0),
            Candle::opened_by(0, 1.0, 1.0),
            Candle::opened_by(60, 2.0, 1.0),
            Candle::opened_by(60, 9.0, 1.0),
        ]);
        assert_eq!(times(&agg), vec![0, 60, 120]);
    }

    #[test]
    fn seed_merges_with_live_bucket() {
        let mut agg = CandleAggregator::new(Granularity::M1);
        agg.apply(&trade(125, 105.0, 0.5));
        agg.apply(&trade(130, 95.0, 0.5));

        agg.seed(vec![
            Candle { time: 0, open: 90.0, high: 91.0, low: 89.0, close: 90.5, volume: 4.0 },
            Candle { time: 60, open: 91.0, high: 92.0, low: 90.0, close: 91.5, volume: 4.0 },
            Candle { time: 120, open: 100.0, high: 101.0, low: 99.0, close: 100.5, volume: 3.0 },
        ]);

        assert_eq!(times(&agg), vec![0, 60, 120]);
        let merged = agg.series()[2];
        assert_eq!(merged.open, 100.0);
        assert_eq!(merged.high, 105.0);
        assert_eq!(merged.low, 95.0);
        assert_eq!(merged.close, 95.0);
        assert_eq!(merged.volume, 3.0);

        // Live trading continues at the tail.
        assert!(matches!(agg.apply(&trade(150, 96.0, 1.0)), CandleUpdate::Updated(_)));
        assert!(matches!(agg.apply(&trade(181, 97.0, 1.0)), CandleUpdate::Opened(_)));
    }

    #[test]
    fn seed_newer_than_live_keeps_order() {
        let mut agg = CandleAggregator::new(Granularity::M1);
        agg.apply(&trade(5, 1.0, 1.0));
        agg.seed(vec![Candle::opened_by(60, 2.0, 1.0), Candle::opened_by(61, 3.0, 1.0)]);
        assert_eq!(times(&agg), vec![0, 60]);
        assert!(agg.series().windows(2).all(|w| w[0].time < w[1].time));
        assert!(matches!(agg.apply(&trade(30, 1.0, 1.0)), CandleUpdate::Late { .. }));
    }
}
