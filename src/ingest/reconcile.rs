use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::LISTING_PRICE_TOLERANCE;
use crate::types::RawObservation;

/// A previously seen listing: its reconciliation key and last known total price.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownListing {
    pub key: String,
    pub price: f64,
}

impl KnownListing {
    pub fn from_observation(obs: &RawObservation) -> Option<Self> {
        Some(Self {
            key: listing_key(obs)?,
            price: obs.total_price()?,
        })
    }
}

#[derive(Debug, Default)]
pub struct ListingReconciliation {
    pub new: Vec<RawObservation>,
    pub updated: Vec<RawObservation>,
    pub duplicate: Vec<RawObservation>,
}

impl ListingReconciliation {
    pub fn counts(&self) -> ReconcileCounts {
        ReconcileCounts {
            new_listings: self.new.len(),
            updated_listings: self.updated.len(),
            duplicate_listings: self.duplicate.len(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct SaleReconciliation {
    pub new: Vec<RawObservation>,
    pub duplicate: Vec<RawObservation>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReconcileCounts {
    pub new_listings: usize,
    pub updated_listings: usize,
    pub duplicate_listings: usize,
    pub new_sales: usize,
    pub duplicate_sales: usize,
}

impl ReconcileCounts {
    pub fn merge(&mut self, other: &ReconcileCounts) {
        self.new_listings += other.new_listings;
        self.updated_listings += other.updated_listings;
        self.duplicate_listings += other.duplicate_listings;
        self.new_sales += other.new_sales;
        self.duplicate_sales += other.duplicate_sales;
    }
}

/// `seller|quantity|marketplace[|native_id]`. None when the quantity is unusable.
pub fn listing_key(obs: &RawObservation) -> Option<String> {
    let quantity = obs.quantity.filter(|q| *q > 0)?;
    let mut key = format!(
        "{}|{}|{}",
        obs.seller.as_deref().unwrap_or("").trim().to_lowercase(),
        quantity,
        obs.marketplace_key(),
    );
    if let Some(id) = obs.native_id.as_deref().filter(|s| !s.is_empty()) {
        key.push('|');
        key.push_str(id);
    }
    Some(key)
}

/// `seller|price|quantity|date|marketplace[|native_id]`. An undated sale is
/// keyed on `run_date`, the day it is counted for. None when price or
/// quantity is unusable.
pub fn sale_key(obs: &RawObservation, run_date: NaiveDate) -> Option<String> {
    let quantity = obs.quantity.filter(|q| *q > 0)?;
    let price = obs.total_price().filter(|p| p.is_finite())?;
    let mut key = format!(
        "{}|{:.2}|{}|{}|{}",
        obs.seller.as_deref().unwrap_or("").trim().to_lowercase(),
        price,
        quantity,
        obs.sold_on.unwrap_or(run_date),
        obs.marketplace_key(),
    );
    if let Some(id) = obs.native_id.as_deref().filter(|s| !s.is_empty()) {
        key.push('|');
        key.push_str(id);
    }
    Some(key)
}

/// Classify incoming listings against previously seen ones.
///
/// Same key with a price moved by more than the tolerance is `updated`, same
/// key and price is `duplicate`, unknown key is `new`. Records without a usable
/// key are passed through as `new`. Listings accepted from this batch join the
/// lookup, so a second copy inside the batch is also caught.
pub fn reconcile_listings(
    incoming: Vec<RawObservation>,
    existing: &[KnownListing],
) -> ListingReconciliation {
    let mut seen: HashMap<String, f64> = existing
        .iter()
        .map(|k| (k.key.clone(), k.price))
        .collect();
    let mut out = ListingReconciliation::default();

    for obs in incoming {
        let (Some(key), Some(price)) = (listing_key(&obs), obs.total_price()) else {
            out.new.push(obs);
            continue;
        };
        match seen.get(&key) {
            Some(&known) if (price - known).abs() > LISTING_PRICE_TOLERANCE => {
                seen.insert(key, price);
                out.updated.push(obs);
            }
            Some(_) => out.duplicate.push(obs),
            None => {
                seen.insert(key, price);
                out.new.push(obs);
            }
        }
    }

    out
}

/// Sales are immutable: any key match is an exact duplicate.
pub fn reconcile_sales(
    incoming: Vec<RawObservation>,
    existing_keys: &HashSet<String>,
    run_date: NaiveDate,
) -> SaleReconciliation {
    let mut batch_keys: HashSet<String> = HashSet::new();
    let mut out = SaleReconciliation::default();

    for obs in incoming {
        let Some(key) = sale_key(&obs, run_date) else {
            out.new.push(obs);
            continue;
        };
        if existing_keys.contains(&key) || !batch_keys.insert(key) {
            out.duplicate.push(obs);
        } else {
            out.new.push(obs);
        }
    }

    out
}
