pub mod credit;
pub mod lambda;

pub use credit::{Batch, BatchReport, CreditPolicy, EpisodeSignal, issue_update};
pub use lambda::compute_errors;
