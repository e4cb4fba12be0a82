//! Type definitions for the inference worker

pub mod alert;
pub mod result;
pub mod transaction;

pub use alert::AlertNotice;
pub use result::{DeadLetter, ScoredResult};
pub use transaction::TransactionRecord;
