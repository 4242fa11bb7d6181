pub mod aggregator;

pub use aggregator::{aggregate, build_source_records};
