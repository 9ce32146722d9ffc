//! Batched, best-effort local existence checks
//!
//! Used only for paths whose tracking status is ambiguous. A failed check never
//! raises: affected paths come back as [`Existence::Unknown`] and the caller must
//! treat them as if the file exists.

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::model::Existence;
use crate::store::LocalStore;

/// Existence results keyed by path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResults {
    results: HashMap<String, Existence>,
}

impl ProbeResults {
    /// Result for `path`; paths never probed are `Unknown`
    pub fn get(&self, path: &str) -> Existence {
        self.results.get(path).copied().unwrap_or(Existence::Unknown)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn unknown_count(&self) -> usize {
        self.results
            .values()
            .filter(|e| matches!(e, Existence::Unknown))
            .count()
    }
}

impl FromIterator<(String, Existence)> for ProbeResults {
    fn from_iter<I: IntoIterator<Item = (String, Existence)>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

/// Issue a single batched existence check against the local store
pub async fn probe(local: &dyn LocalStore, paths: &BTreeSet<String>) -> ProbeResults {
    if paths.is_empty() {
        return ProbeResults::default();
    }

    let request: Vec<String> = paths.iter().cloned().collect();
    debug!("Probing existence of {} paths", request.len());

    match local.stat_batch(&request).await {
        Ok(mut found) => {
            let results: ProbeResults = request
                .into_iter()
                .map(|path| {
                    let existence = found.remove(&path).unwrap_or(Existence::Unknown);
                    (path, existence)
                })
                .collect();
            let unknown = results.unknown_count();
            if unknown > 0 {
                warn!(
                    "Existence probe returned no answer for {} of {} paths; \
                     treating them as present",
                    unknown,
                    results.len()
                );
            }
            results
        }
        Err(e) => {
            warn!(
                "Existence probe failed for {} paths, treating all as present: {}",
                request.len(),
                e
            );
            request
                .into_iter()
                .map(|path| (path, Existence::Unknown))
                .collect()
        }
    }
}
