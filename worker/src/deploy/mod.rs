//! Deployment execution

pub mod events;
pub mod executor;
pub mod fsm;
pub mod tracker;
