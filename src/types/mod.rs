// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resources read and written by the operator.

pub mod config;
pub mod gatekeeper;

pub use config::{ConfigResource, ConfigSpec, MatchEntry, SyncOnlyEntry};
pub use gatekeeper::{AuditFromCacheMode, Gatekeeper, GatekeeperSpec};
