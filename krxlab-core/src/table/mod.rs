//! Cached read-only views of the published tables.

pub mod cache;
pub mod descriptor;
pub mod files;
pub mod filter;
pub mod registry;

pub use cache::TableCache;
pub use descriptor::{
    descriptor_by_name, TableDescriptor, ALL_TABLES, STOCK_DAILY_PRICE, STOCK_MASTER,
    STOCK_MINUTE_PRICE, STOCK_TREND,
};
pub use files::{SnapshotMeta, TableFiles, TableStatus};
pub use filter::Filter;
pub use registry::TableRegistry;
