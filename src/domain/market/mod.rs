pub mod calendar;
pub mod candle;
pub mod timeframe;
pub mod window;

pub use calendar::{IstEquityCalendar, TradingCalendar};
pub use candle::{Candle, Provenance};
pub use timeframe::Timeframe;
pub use window::WindowSlice;
