//! Per-merchant balance ledger and settlement scheduling.
//!
//! [`ledger::BalanceLedger`] owns pending/available balances and is the only
//! path through which they change. [`settlement::scheduler::SettlementScheduler`]
//! answers due-ness and timing questions for merchant policies, and
//! [`settlement::driver::SettlementDriver`] periodically sweeps due merchants.

pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod settlement;
