// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The CRD backing a sub-controller has not been accepted yet.
    #[error("CRD not ready: {0}")]
    CrdNotReady(String),

    /// Discovery has no version for the requested group and kind.
    #[error("no discovery mapping for kind {kind:?} in group {group:?}")]
    NotFoundDiscovery { group: String, kind: String },

    #[error("{}", join_errors(.0))]
    Aggregate(Vec<OperatorError>),

    #[error("Malformed object: {0}")]
    MalformedObject(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Sub-controller failed: {0}")]
    SubController(String),
}

fn join_errors(errors: &[OperatorError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl OperatorError {
    pub fn is_crd_not_ready(&self) -> bool {
        match self {
            OperatorError::CrdNotReady(_) => true,
            OperatorError::Aggregate(errors) => {
                !errors.is_empty() && errors.iter().all(OperatorError::is_crd_not_ready)
            }
            _ => false,
        }
    }

    /// True when every underlying error is a discovery miss. Such errors are
    /// worth a short retry; anything else is not.
    pub fn is_not_found_discovery(&self) -> bool {
        match self {
            OperatorError::NotFoundDiscovery { .. } => true,
            OperatorError::Aggregate(errors) => {
                !errors.is_empty() && errors.iter().all(OperatorError::is_not_found_discovery)
            }
            _ => false,
        }
    }

    /// Collapses a list of errors: none yields `None`, one is returned as is.
    pub fn aggregate(mut errors: Vec<OperatorError>) -> Option<OperatorError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(OperatorError::Aggregate(errors)),
        }
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found(kind: &str) -> OperatorError {
        OperatorError::NotFoundDiscovery {
            group: String::new(),
            kind: kind.to_string(),
        }
    }

    #[test]
    fn test_aggregate_of_discovery_misses_is_not_found() {
        let err = OperatorError::Aggregate(vec![not_found("Pod"), not_found("Service")]);
        assert!(err.is_not_found_discovery());
        assert!(!err.is_crd_not_ready());
    }

    #[test]
    fn test_mixed_aggregate_is_not_soft() {
        let err = OperatorError::Aggregate(vec![
            not_found("Pod"),
            OperatorError::MalformedObject("bad".to_string()),
        ]);
        assert!(!err.is_not_found_discovery());
    }

    #[test]
    fn test_aggregate_message_joins_errors() {
        let err = OperatorError::Aggregate(vec![
            OperatorError::CrdNotReady("a".to_string()),
            OperatorError::CrdNotReady("b".to_string()),
        ]);
        assert_eq!(err.to_string(), "CRD not ready: a; CRD not ready: b");
        assert!(err.is_crd_not_ready());
    }

    #[test]
    fn test_aggregate_collapses_single_error() {
        assert!(OperatorError::aggregate(vec![]).is_none());

        let single = OperatorError::aggregate(vec![not_found("Pod")]);
        assert!(matches!(single, Some(OperatorError::NotFoundDiscovery { .. })));

        let many = OperatorError::aggregate(vec![not_found("Pod"), not_found("Ingress")]);
        assert!(matches!(many, Some(OperatorError::Aggregate(ref v)) if v.len() == 2));
    }
}
