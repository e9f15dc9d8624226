// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Owner reference bookkeeping.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

/// Who, if anyone, owns an object relative to a given owner UID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Unowned,
    OwnedByUs,
    OwnedByOther,
}

impl Ownership {
    pub fn of(meta: &ObjectMeta, owner_uid: &str) -> Self {
        match meta.owner_references.as_deref() {
            None | Some([]) => Ownership::Unowned,
            Some(refs) if refs.iter().any(|r| r.uid == owner_uid) => Ownership::OwnedByUs,
            Some(_) => Ownership::OwnedByOther,
        }
    }

    pub fn is_ours(self) -> bool {
        self == Ownership::OwnedByUs
    }
}

/// Add `owner` unless a reference with the same UID is already present.
/// Returns whether the metadata changed.
pub fn add_owner_reference(meta: &mut ObjectMeta, owner: OwnerReference) -> bool {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    if refs.iter().any(|r| r.uid == owner.uid) {
        return false;
    }
    refs.push(owner);
    true
}
