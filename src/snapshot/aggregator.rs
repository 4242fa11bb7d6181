use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;

use crate::ingest::lot_size::{lot_size_of, unit_price};
use crate::ingest::reconcile::{listing_key, ListingReconciliation};
use crate::metrics::smoothing::round2;
use crate::types::{DailySnapshot, RawObservation, SourceSummary};

/// Band widths around the floor, as fractions of the floor price.
const BAND_10PCT: f64 = 0.10;
const BAND_20PCT: f64 = 0.20;
const BAND_EPSILON: f64 = 1e-9;

/// One active listing after lot normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    /// Reconciliation key; None for records that could not be keyed.
    pub key: Option<String>,
    /// (price + shipping) / lot size
    pub unit_price: f64,
    /// True when the reconciler classified the listing as new today.
    pub is_new: bool,
}

/// One sale after lot normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRecord {
    pub unit_price: f64,
    /// quantity × lot size
    pub units: u32,
}

/// Everything one marketplace contributed for one (entity, date).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRecord {
    pub marketplace: String,
    // Pre-aggregated fields, present when the source only reports counts.
    pub floor_price: Option<f64>,
    pub sold_today: Option<u32>,
    pub added_today: Option<u32>,
    pub active_listings: Option<u32>,
    // Individual records.
    pub listings: Vec<ListingRecord>,
    pub sales: Vec<SaleRecord>,
}

impl SourceRecord {
    fn has_listings(&self) -> bool {
        !self.listings.is_empty() || self.active_listings.is_some_and(|n| n > 0)
    }

    /// Lowest price this source shows: the reported floor or its cheapest listing.
    fn price(&self) -> Option<f64> {
        let cheapest = self
            .listings
            .iter()
            .map(|l| l.unit_price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))));
        match (self.floor_price.filter(|p| *p > 0.0), cheapest) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Units × unit price for this source. Individual sales win; otherwise the
    /// reported sold count is valued at `fallback_price`.
    fn volume(&self, fallback_price: Option<f64>) -> Option<f64> {
        if !self.sales.is_empty() {
            return Some(self.sales.iter().map(|s| s.unit_price * s.units as f64).sum());
        }
        let sold = self.sold_today?;
        let price = self.price().or(fallback_price)?;
        Some(sold as f64 * price)
    }
}

/// Group reconciled observations and pre-aggregated summaries by marketplace.
///
/// Sales dated on another day than `date` are left out; undated sales count
/// for `date`.
pub fn build_source_records(
    date: NaiveDate,
    listings: ListingReconciliation,
    new_sales: Vec<RawObservation>,
    summaries: &[SourceSummary],
) -> Vec<SourceRecord> {
    let mut by_marketplace: BTreeMap<String, SourceRecord> = BTreeMap::new();

    let tagged = listings
        .new
        .into_iter()
        .map(|o| (o, true))
        .chain(listings.updated.into_iter().map(|o| (o, false)))
        .chain(listings.duplicate.into_iter().map(|o| (o, false)));
    for (obs, is_new) in tagged {
        let Some(price) = unit_price(&obs) else { continue };
        let source = source_entry(&mut by_marketplace, obs.marketplace_key());
        source.listings.push(ListingRecord {
            key: listing_key(&obs),
            unit_price: price,
            is_new,
        });
    }

    for obs in new_sales {
        if obs.sold_on.is_some_and(|d| d != date) {
            continue;
        }
        let (Some(price), Some(qty)) = (unit_price(&obs), obs.quantity.filter(|q| *q > 0)) else {
            continue;
        };
        let units = u32::try_from(qty)
            .unwrap_or(u32::MAX)
            .saturating_mul(lot_size_of(&obs));
        let source = source_entry(&mut by_marketplace, obs.marketplace_key());
        source.sales.push(SaleRecord {
            unit_price: price,
            units,
        });
    }

    for summary in summaries {
        let source = source_entry(&mut by_marketplace, summary.marketplace.trim().to_lowercase());
        source.floor_price = summary.floor_price.filter(|p| *p > 0.0);
        source.sold_today = summary.sold_today;
        source.added_today = summary.added_today;
        source.active_listings = summary.active_listings;
    }

    by_marketplace.into_values().collect()
}

fn source_entry(map: &mut BTreeMap<String, SourceRecord>, marketplace: String) -> &mut SourceRecord {
    map.entry(marketplace.clone()).or_insert_with(|| SourceRecord {
        marketplace,
        ..Default::default()
    })
}

/// Merge every source's records for one (entity, date) into the raw tier of a
/// daily snapshot. Rolling fields are left empty for the rolling metrics engine.
pub fn aggregate(entity_id: &str, date: NaiveDate, sources: &[SourceRecord]) -> DailySnapshot {
    let mut snap = DailySnapshot::empty(entity_id, date);

    // Floor: sources that currently show listings outrank those that don't.
    let with_listings: Vec<&SourceRecord> = sources.iter().filter(|s| s.has_listings()).collect();
    let floor = if with_listings.is_empty() {
        min_price(sources.iter())
    } else {
        min_price(with_listings.into_iter())
    };
    snap.floor_price = floor.map(round2);

    // Units sold: individual sales are ground truth.
    let has_sales = sources.iter().any(|s| !s.sales.is_empty());
    snap.boxes_sold_today = if has_sales {
        Some(
            sources
                .iter()
                .flat_map(|s| &s.sales)
                .fold(0u32, |acc, s| acc.saturating_add(s.units)),
        )
    } else {
        sources.iter().filter_map(|s| s.sold_today).max()
    };

    // Listings: union of individual records, de-duplicated by key across sources.
    let listings = union_listings(sources);
    if listings.is_empty() {
        snap.boxes_added_today = sources
            .iter()
            .filter_map(|s| s.added_today)
            .fold(None, |acc, n| Some(acc.unwrap_or(0u32).saturating_add(n)));
        let reported = sources.iter().filter_map(|s| s.active_listings).max();
        snap.active_listings_count = reported;
        snap.listings_within_20pct = reported;
    } else {
        snap.boxes_added_today = Some(listings.iter().filter(|l| l.is_new).count() as u32);
        snap.total_listings = Some(listings.len() as u32);
        if let Some(floor) = floor {
            let within_10 = count_within(&listings, floor, BAND_10PCT);
            let within_20 = count_within(&listings, floor, BAND_20PCT);
            snap.listings_within_10pct = Some(within_10);
            snap.listings_within_20pct = Some(within_20);
            snap.active_listings_count = Some(within_20);
        }
    }

    // Blended volume across every contributing source.
    let volumes: Vec<f64> = sources.iter().filter_map(|s| s.volume(floor)).collect();
    snap.daily_volume_usd = if volumes.is_empty() {
        snap.boxes_sold_today.map(|_| 0.0)
    } else {
        Some(round2(volumes.iter().sum()))
    };

    snap
}

fn min_price<'a>(sources: impl Iterator<Item = &'a SourceRecord>) -> Option<f64> {
    sources
        .filter_map(|s| s.price())
        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))))
}

fn union_listings(sources: &[SourceRecord]) -> Vec<&ListingRecord> {
    let mut keys: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for listing in sources.iter().flat_map(|s| &s.listings) {
        match listing.key.as_deref() {
            Some(key) if !keys.insert(key) => continue,
            _ => out.push(listing),
        }
    }
    out
}

fn count_within(listings: &[&ListingRecord], floor: f64, band: f64) -> u32 {
    let ceiling = floor * (1.0 + band) + BAND_EPSILON;
    listings.iter().filter(|l| l.unit_price <= ceiling).count() as u32
}
