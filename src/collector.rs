use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::state::IdentifierAliases;
use crate::types::{Entity, RawObservation, SourceSummary};

/// One run's input as written by the external collectors.
#[derive(Debug, Default, Deserialize)]
pub struct Batch {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub observations: Vec<RawObservation>,
    #[serde(default)]
    pub source_summaries: Vec<SourceSummary>,
}

#[derive(Debug, Default)]
pub struct CollectStats {
    pub entities: usize,
    pub observations: usize,
    pub source_summaries: usize,
    /// References rewritten from a legacy id to its canonical id.
    pub remapped: usize,
    /// Observations/summaries whose entity is neither in the batch nor stored.
    pub dropped_unknown: usize,
}

/// Observations and summaries for one entity.
#[derive(Debug, Default, Clone)]
pub struct EntityBatch {
    pub observations: Vec<RawObservation>,
    pub summaries: Vec<SourceSummary>,
}

impl EntityBatch {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.summaries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct GroupedBatch {
    /// Batch entities, canonicalized and de-duplicated by id.
    pub entities: Vec<Entity>,
    /// canonical entity id → inputs
    pub per_entity: HashMap<String, EntityBatch>,
    pub stats: CollectStats,
}

pub fn parse_batch(raw: &str) -> Result<Batch> {
    serde_json::from_str(raw).map_err(|e| AppError::Batch(format!("invalid batch document: {e}")))
}

pub async fn load_batch(path: impl AsRef<Path>) -> Result<Batch> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::Batch(format!("cannot read {}: {e}", path.display())))?;
    let batch = parse_batch(&raw)?;
    info!(
        path = %path.display(),
        entities = batch.entities.len(),
        observations = batch.observations.len(),
        source_summaries = batch.source_summaries.len(),
        "Batch loaded"
    );
    Ok(batch)
}

/// Canonicalize every entity reference and bucket the batch by entity.
///
/// `stored_ids` are the entities already known to the store; a reference
/// that resolves to neither a batch entity nor a stored one is dropped.
pub fn group_batch(
    batch: Batch,
    aliases: &IdentifierAliases,
    stored_ids: &HashSet<String>,
) -> GroupedBatch {
    let mut stats = CollectStats {
        observations: batch.observations.len(),
        source_summaries: batch.source_summaries.len(),
        ..Default::default()
    };

    let mut canonicalize = |id: &str| -> String {
        let canonical = aliases.canonical(id.trim());
        if canonical != id.trim() {
            stats.remapped += 1;
        }
        canonical.to_string()
    };

    let mut entities: BTreeMap<String, Entity> = BTreeMap::new();
    for mut entity in batch.entities {
        entity.id = canonicalize(&entity.id);
        entities.insert(entity.id.clone(), entity);
    }

    let mut per_entity: HashMap<String, EntityBatch> = HashMap::new();
    let mut unknown: BTreeMap<String, usize> = BTreeMap::new();

    for mut obs in batch.observations {
        obs.entity_id = canonicalize(&obs.entity_id);
        if !entities.contains_key(&obs.entity_id) && !stored_ids.contains(&obs.entity_id) {
            *unknown.entry(obs.entity_id).or_default() += 1;
            continue;
        }
        per_entity.entry(obs.entity_id.clone()).or_default().observations.push(obs);
    }
    for mut summary in batch.source_summaries {
        summary.entity_id = canonicalize(&summary.entity_id);
        if !entities.contains_key(&summary.entity_id) && !stored_ids.contains(&summary.entity_id) {
            *unknown.entry(summary.entity_id).or_default() += 1;
            continue;
        }
        per_entity.entry(summary.entity_id.clone()).or_default().summaries.push(summary);
    }

    for (entity_id, count) in &unknown {
        warn!(entity_id = %entity_id, count, "Dropping records for unknown entity");
        stats.dropped_unknown += count;
    }

    stats.entities = entities.len();
    GroupedBatch {
        entities: entities.into_values().collect(),
        per_entity,
        stats,
    }
}
