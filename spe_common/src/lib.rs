mod satang;

pub mod helpers;
pub mod op;

pub use satang::{decimal, Satang, SatangConversionError, THB_CURRENCY_CODE};
