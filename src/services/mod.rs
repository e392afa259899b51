pub mod dependency_resolution;
pub mod submission;
pub mod transaction_applier;
