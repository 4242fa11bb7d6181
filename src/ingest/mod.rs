pub mod filter;
pub mod lot_size;
pub mod reconcile;

pub use filter::{filter_observations, FilterStats};
pub use reconcile::{reconcile_listings, reconcile_sales, KnownListing, ReconcileCounts};
