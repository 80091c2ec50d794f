//! Golden sample library: persistent reference images plus the matcher that
//! compares captures against them and promotes better references on success.

pub mod matcher;
pub mod store;

pub use matcher::{match_and_promote, MatchOutcome};
pub use store::{GoldenSample, GoldenStore, SampleRole, BEST_NAME};
