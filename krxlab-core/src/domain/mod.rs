//! Row types for the three KRX tables.

pub mod master;
pub mod price;
pub mod trend;

pub use master::{normalize_short_code, StockMaster};
pub use price::DailyPrice;
pub use trend::{Flow, Investor, InvestorTrend};
