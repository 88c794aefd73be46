pub mod mempool;
pub mod query;
pub mod sync;
pub mod types;

pub use types::*;
