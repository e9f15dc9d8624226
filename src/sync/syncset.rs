// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Aggregation of per-constraint sync entries into the Config sync list.

use crate::error::OperatorError;
use crate::kubernetes::unstructured::get_nested_string_slice;
use crate::sync::discovery::{DiscoveryCache, DiscoverySource};
use crate::types::SyncOnlyEntry;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::warn;

/// Outcome of resolving one constraint's match kinds. `entries` holds every
/// pair that resolved even when `error` is set.
#[derive(Debug, Default)]
pub struct SyncOnlyResolution {
    pub entries: Vec<SyncOnlyEntry>,
    pub error: Option<OperatorError>,
}

/// Resolve every (group, kind) pair declared by `match_kinds` to a sync entry.
///
/// Each block contributes the cartesian product of its `apiGroups` and
/// `kinds`. A failed pair does not stop the others; its error is collected.
/// Blocks that do not have the expected shape are skipped.
pub async fn resolve_sync_only_entries<S: DiscoverySource>(
    cache: &mut DiscoveryCache<S>,
    match_kinds: &[Value],
) -> SyncOnlyResolution {
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    // Set once discovery itself fails; further pairs are served from cache only
    let mut unreachable = false;

    for block in match_kinds {
        let (groups, kinds) = match parse_match_kind(block) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping malformed match kind {}: {}", block, e);
                continue;
            }
        };

        for group in &groups {
            for kind in &kinds {
                let resolved = if unreachable {
                    cache.lookup(kind, group)
                } else {
                    match cache.resolve_version(kind, group).await {
                        Ok(version) => Some(version),
                        Err(e) => {
                            unreachable = !e.is_not_found_discovery();
                            errors.push(e);
                            None
                        }
                    }
                };
                if let Some(version) = resolved {
                    entries.push(SyncOnlyEntry {
                        group: group.clone(),
                        version,
                        kind: kind.clone(),
                    });
                }
            }
        }
    }

    SyncOnlyResolution {
        entries,
        error: OperatorError::aggregate(errors),
    }
}

fn parse_match_kind(block: &Value) -> crate::error::Result<(Vec<String>, Vec<String>)> {
    if !block.is_object() {
        return Err(OperatorError::MalformedObject(
            "match kind is not an object".to_string(),
        ));
    }
    let groups = get_nested_string_slice(block, &["apiGroups"])?.unwrap_or_default();
    let kinds = get_nested_string_slice(block, &["kinds"])?.unwrap_or_default();
    Ok((groups, kinds))
}

/// Deduplicate the entries of all sources and order them by the
/// concatenation of group, kind and version.
pub fn recompute_union<'a, I>(sources: I) -> Vec<SyncOnlyEntry>
where
    I: IntoIterator<Item = &'a Vec<SyncOnlyEntry>>,
{
    let unique: BTreeSet<&SyncOnlyEntry> = sources.into_iter().flatten().collect();
    let mut union: Vec<SyncOnlyEntry> = unique.into_iter().cloned().collect();
    union.sort_by(compare_entries);
    union
}

fn compare_entries(a: &SyncOnlyEntry, b: &SyncOnlyEntry) -> Ordering {
    let key = |e: &SyncOnlyEntry| format!("{}{}{}", e.group, e.kind, e.version);
    key(a)
        .cmp(&key(b))
        .then_with(|| (&a.group, &a.kind, &a.version).cmp(&(&b.group, &b.kind, &b.version)))
}

/// Sync entries contributed by each source, keyed by source identity.
#[derive(Debug, Default)]
pub struct SyncSet {
    sources: BTreeMap<String, Vec<SyncOnlyEntry>>,
}

impl SyncSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the entries of `source`. Returns whether anything changed.
    pub fn update_source(&mut self, source: &str, entries: Vec<SyncOnlyEntry>) -> bool {
        match self.sources.get(source) {
            Some(current) if *current == entries => false,
            _ => {
                self.sources.insert(source.to_string(), entries);
                true
            }
        }
    }

    /// Forget `source`. Returns whether it was known.
    pub fn remove_source(&mut self, source: &str) -> bool {
        self.sources.remove(source).is_some()
    }

    /// Drop every source not in `live`, returning how many were dropped.
    pub fn retain_sources(&mut self, live: &HashSet<String>) -> usize {
        let before = self.sources.len();
        self.sources.retain(|id, _| live.contains(id));
        before - self.sources.len()
    }

    pub fn contains_source(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }

    pub fn union(&self) -> Vec<SyncOnlyEntry> {
        recompute_union(self.sources.values())
    }
}
