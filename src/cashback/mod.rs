pub mod cache;
pub mod calculator;
pub mod error;
pub mod expiration;
pub mod ledger;
pub mod models;
pub mod reversal;
pub mod types;

pub use cache::*;
pub use calculator::{BalanceMutation, CashbackCalculator};
pub use error::*;
pub use expiration::*;
pub use ledger::*;
pub use models::*;
pub use reversal::*;
pub use types::*;

#[cfg(test)]
pub(crate) use calculator::test_support;
