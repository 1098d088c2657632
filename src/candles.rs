//! OHLC bars built from mid ticks, for the console chart.

use std::collections::VecDeque;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candle {
    pub t0: f64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
}

impl Candle {
    fn open_at(t0: f64, price: f64) -> Self {
        Self { t0, o: price, h: price, l: price, c: price }
    }

    pub fn range(&self) -> f64 {
        self.h - self.l
    }

    pub fn is_bullish(&self) -> bool {
        self.c > self.o
    }
}

#[derive(Debug, Clone)]
pub struct CandleBuilder {
    interval: f64,
    max_keep: usize,
    candles: VecDeque<Candle>,
}

impl CandleBuilder {
    pub fn new(interval: f64, max_keep: usize) -> Self {
        Self {
            interval,
            max_keep: max_keep.max(1),
            candles: VecDeque::new(),
        }
    }

    /// Bucket start for `now`, aligned to multiples of the interval.
    pub fn bucket(&self, now: f64) -> f64 {
        if self.interval <= 0.0 {
            return now;
        }
        (now / self.interval).floor() * self.interval
    }

    /// Fold one tick in. Returns the candle that was closed, if any.
    pub fn update(&mut self, now: f64, price: f64) -> Option<Candle> {
        if !now.is_finite() || !price.is_finite() {
            return None;
        }
        let t0 = self.bucket(now);
        if let Some(last) = self.candles.back_mut() {
            if t0 <= last.t0 {
                // late ticks land in the current bar
                last.h = last.h.max(price);
                last.l = last.l.min(price);
                last.c = price;
                return None;
            }
        }
        let closed = self.candles.back().copied();
        self.candles.push_back(Candle::open_at(t0, price));
        while self.candles.len() > self.max_keep {
            self.candles.pop_front();
        }
        closed
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_within_interval_update_bar() {
        let mut b = CandleBuilder::new(0.5, 10);
        assert!(b.update(1.0, 200.0).is_none());
        b.update(1.1, 201.0);
        b.update(1.2, 199.5);
        b.update(1.45, 200.2);
        assert_eq!(b.len(), 1);
        let c = b.last().unwrap();
        assert_eq!(c.t0, 1.0);
        assert_eq!((c.o, c.h, c.l, c.c), (200.0, 201.0, 199.5, 200.2));
    }

    #[test]
    fn test_tick_past_interval_opens_new_bar() {
        let mut b = CandleBuilder::new(0.5, 10);
        b.update(1.0, 200.0);
        b.update(1.2, 202.0);
        let closed = b.update(1.6, 198.0).unwrap();
        assert_eq!(closed.c, 202.0);
        assert_eq!(b.len(), 2);
        let c = b.last().unwrap();
        assert_eq!(c.t0, 1.5);
        assert_eq!(c.o, 198.0);
    }

    #[test]
    fn test_retention_caps_buffer() {
        let mut b = CandleBuilder::new(1.0, 3);
        for i in 0..10 {
            b.update(i as f64, 100.0 + i as f64);
        }
        assert_eq!(b.len(), 3);
        assert_eq!(b.iter().next().unwrap().t0, 7.0);
    }

    #[test]
    fn test_non_finite_ticks_ignored() {
        let mut b = CandleBuilder::new(1.0, 3);
        b.update(0.0, 100.0);
        b.update(0.5, f64::NAN);
        assert_eq!(b.last().unwrap().h, 100.0);
    }
}
