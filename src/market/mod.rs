pub mod cache;
pub mod quota;

pub use cache::{Board, MarketCache, Snapshot};
pub use quota::QuotaGovernor;
