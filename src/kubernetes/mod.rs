// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD readiness, manifest application, ownership
//! and untyped object access.

pub mod applier;
pub mod crd;
pub mod ownership;
pub mod unstructured;

pub use applier::ManifestApplier;
pub use crd::{crd_names_accepted, wait_for_crd};
pub use ownership::{add_owner_reference, Ownership};
