//! Storage layer: accounts and the refresh ledger

pub mod account_repo;
pub mod ledger_repo;

pub use account_repo::*;
pub use ledger_repo::*;
