pub mod bets;
pub mod settlement;

pub use bets::{BetEngine, LegSpec};
pub use settlement::{CycleReport, MarketResolution, Settler};
