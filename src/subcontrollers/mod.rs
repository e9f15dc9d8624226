// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Loops started and stopped by the Gatekeeper reconciler once their CRDs
//! are served.

pub mod config;
pub mod constraint_status;
pub mod supervisor;

pub use config::ConfigController;
pub use constraint_status::ConstraintStatusController;
pub use supervisor::{Launcher, ReconcileTrigger, RunState, SubControllerKind, Supervisor};
