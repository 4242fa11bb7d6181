pub mod market_index;
pub mod sentiment;

pub use market_index::{compute_index, IndexMember};
