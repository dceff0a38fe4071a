//! Loaders that write dump items into a `MigrationStore`

pub mod batch;
pub mod communities;
pub mod deposits;
pub mod records;
pub mod remote_accounts;
pub mod users;

pub use batch::{run_batch, run_concurrent, BatchOptions, BatchReport, FailedItem, LoadTask};
pub use records::{clean_record, load_record, CleanReport, LoadAction, LoadOutcome};
