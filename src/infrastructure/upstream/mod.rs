pub mod upstox;
pub mod yahoo;

pub use upstox::UpstoxProvider;
pub use yahoo::YahooProvider;
