//! Feature snapshot: latest indicator values derived from a window at
//! produce time. Also backs the read-only TA endpoint; TA output never
//! participates in the prediction merge.

use crate::domain::forecast::FeatureSnapshot;
use crate::domain::market::WindowSlice;
use ta::Next;
use ta::indicators::{
    AverageTrueRange, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex, SimpleMovingAverage,
};

pub fn compute_snapshot(window: &WindowSlice) -> FeatureSnapshot {
    let candles = window.candles();
    let Some(last) = candles.last() else {
        return FeatureSnapshot::default();
    };

    let mut snapshot = FeatureSnapshot {
        last_close: last.close_f64(),
        ..Default::default()
    };

    if candles.len() >= 2 {
        let prev = candles[candles.len() - 2].close_f64();
        if prev > 0.0 {
            snapshot.return_1 = Some(last.close_f64() / prev - 1.0);
        }
    }

    // Indicator warmup windows; shorter histories leave the field None.
    if candles.len() >= 15 {
        let mut rsi = RelativeStrengthIndex::new(14).expect("period 14 is valid");
        snapshot.rsi_14 = Some(feed_closes(&mut rsi, window));
    }
    if candles.len() >= 20 {
        let mut sma = SimpleMovingAverage::new(20).expect("period 20 is valid");
        snapshot.sma_20 = Some(feed_closes(&mut sma, window));
    }
    if candles.len() >= 50 {
        let mut sma = SimpleMovingAverage::new(50).expect("period 50 is valid");
        snapshot.sma_50 = Some(feed_closes(&mut sma, window));
    }
    if candles.len() >= 20 {
        let mut ema = ExponentialMovingAverage::new(20).expect("period 20 is valid");
        snapshot.ema_20 = Some(feed_closes(&mut ema, window));
    }
    if candles.len() >= 35 {
        let mut macd =
            MovingAverageConvergenceDivergence::new(12, 26, 9).expect("12/26/9 is valid");
        let mut out = None;
        for close in window.closes_f64() {
            out = Some(macd.next(close));
        }
        if let Some(value) = out {
            snapshot.macd = Some(value.macd);
            snapshot.macd_signal = Some(value.signal);
            snapshot.macd_hist = Some(value.histogram);
        }
    }
    if candles.len() >= 15 {
        let mut atr = AverageTrueRange::new(14).expect("period 14 is valid");
        let mut out = None;
        for candle in candles {
            if let Ok(item) = ta::DataItem::builder()
                .open(candle.open_f64())
                .high(candle.high_f64())
                .low(candle.low_f64())
                .close(candle.close_f64())
                .volume(candle.volume_f64())
                .build()
            {
                out = Some(atr.next(&item));
            }
        }
        snapshot.atr_14 = out;
    }

    let high = candles
        .iter()
        .map(|c| c.high_f64())
        .fold(f64::MIN, f64::max);
    let low = candles.iter().map(|c| c.low_f64()).fold(f64::MAX, f64::min);
    if high > low {
        snapshot.range_position = Some((last.close_f64() - low) / (high - low));
    }

    snapshot
}

fn feed_closes<I: Next<f64, Output = f64>>(indicator: &mut I, window: &WindowSlice) -> f64 {
    let mut value = 0.0;
    for close in window.closes_f64() {
        value = indicator.next(close);
    }
    value
}
