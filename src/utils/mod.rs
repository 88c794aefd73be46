//!
//! Utility module for the UTXO indexer.
//!
//! Re-exports amount conversion helpers used by the differencer, the mempool estimator and the
//! query service.
/// Decimal coin amounts to and from integer minor units
pub mod amount;

pub use amount::{AmountError, from_minor_units, value_to_minor_units};
