pub mod bots;
pub mod cache;
pub mod core;
pub mod hub;
pub mod mock;
pub mod observability;
pub mod persistence;
pub mod upstream;
