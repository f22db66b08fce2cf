//! Core data types: enums, decoded feed events, and candles.

pub mod enums;
pub mod market_data;

pub use enums::*;
pub use market_data::*;
