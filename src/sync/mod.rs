// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Discovery-backed computation of the Config sync list.

pub mod discovery;
pub mod syncset;

pub use discovery::{DiscoveryCache, DiscoverySource};
pub use syncset::{recompute_union, resolve_sync_only_entries, SyncOnlyResolution, SyncSet};
