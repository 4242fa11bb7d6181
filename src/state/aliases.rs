use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{AppError, Result};

/// Legacy identifier ↔ canonical entity id table.
///
/// Loaded once at startup and handed to whoever needs to canonicalize
/// ids. Lookups in both directions are O(1).
#[derive(Debug, Default, Clone)]
pub struct IdentifierAliases {
    /// legacy → canonical
    to_canonical: HashMap<String, String>,
    /// canonical → legacy ids, sorted
    to_legacy: HashMap<String, Vec<String>>,
}

impl IdentifierAliases {
    /// Build from `(legacy, canonical)` pairs. Self-mappings, chains
    /// (a canonical id that is itself a legacy id) and conflicting
    /// duplicates are rejected.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut to_canonical: HashMap<String, String> = HashMap::new();
        for (legacy, canonical) in pairs {
            let legacy = legacy.as_ref().trim().to_string();
            let canonical = canonical.as_ref().trim().to_string();
            if legacy.is_empty() || canonical.is_empty() {
                return Err(AppError::Config("alias entries must be non-empty".to_string()));
            }
            if legacy == canonical {
                return Err(AppError::Config(format!("alias {legacy:?} maps to itself")));
            }
            if let Some(prev) = to_canonical.get(&legacy) {
                if *prev != canonical {
                    return Err(AppError::Config(format!(
                        "alias {legacy:?} maps to both {prev:?} and {canonical:?}"
                    )));
                }
            }
            to_canonical.insert(legacy, canonical);
        }

        if let Some((legacy, canonical)) = to_canonical
            .iter()
            .find(|(_, canonical)| to_canonical.contains_key(*canonical))
        {
            return Err(AppError::Config(format!(
                "alias chain: {legacy:?} -> {canonical:?} -> {:?}",
                to_canonical[canonical]
            )));
        }

        let mut to_legacy: HashMap<String, Vec<String>> = HashMap::new();
        for (legacy, canonical) in &to_canonical {
            to_legacy.entry(canonical.clone()).or_default().push(legacy.clone());
        }
        for list in to_legacy.values_mut() {
            list.sort();
        }

        Ok(Self {
            to_canonical,
            to_legacy,
        })
    }

    /// Reads `{"legacy-id": "canonical-id", ...}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let table: BTreeMap<String, String> = serde_json::from_str(&raw)?;
        Self::from_pairs(table)
    }

    /// Canonical id for `id`; unmapped ids are already canonical.
    pub fn canonical<'a>(&'a self, id: &'a str) -> &'a str {
        self.to_canonical.get(id).map(String::as_str).unwrap_or(id)
    }

    pub fn aliases_of(&self, canonical: &str) -> &[String] {
        self.to_legacy.get(canonical).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.to_canonical.len()
    }
}
