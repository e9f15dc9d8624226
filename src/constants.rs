// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The only Gatekeeper instance the operator acts on
pub const GATEKEEPER_NAME: &str = "gatekeeper";

/// Namespace used when nothing else is configured
pub const DEFAULT_NAMESPACE: &str = "gatekeeper-system";

/// Name of the singleton Config resource
pub const CONFIG_NAME: &str = "config";

/// Names of the CRDs the operator depends on
pub mod crd {
    pub const GATEKEEPER: &str = "gatekeepers.operator.gatekeeper.sh";
    pub const CONFIG: &str = "configs.config.gatekeeper.sh";
    pub const CONSTRAINT_POD_STATUS: &str = "constraintpodstatuses.status.gatekeeper.sh";

    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Constraint and status resources served by the Gatekeeper deployment
pub mod constraints {
    pub const GROUP: &str = "constraints.gatekeeper.sh";
    pub const VERSION: &str = "v1beta1";

    pub const STATUS_GROUP: &str = "status.gatekeeper.sh";
    pub const STATUS_VERSION: &str = "v1beta1";
    pub const POD_STATUS_KIND: &str = "ConstraintPodStatus";
    pub const POD_STATUS_PLURAL: &str = "constraintpodstatuses";

    pub const KIND_LABEL: &str = "internal.gatekeeper.sh/constraint-kind";
    pub const NAME_LABEL: &str = "internal.gatekeeper.sh/constraint-name";

    /// Operation tag marking a status record as produced by audit
    pub const AUDIT_OPERATION: &str = "audit";
}

/// Requeue and retry delays
pub mod timing {
    use std::time::Duration;

    pub const CRD_NOT_READY_REQUEUE: Duration = Duration::from_secs(3);
    pub const DEPLOYMENT_PENDING_REQUEUE: Duration = Duration::from_secs(5);
    pub const DISCOVERY_MISS_RETRY: Duration = Duration::from_secs(10);
    pub const ERROR_REQUEUE: Duration = Duration::from_secs(60);

    /// How long discovery results are trusted before a refresh
    pub const DISCOVERY_TTL: Duration = Duration::from_secs(10 * 60);

    /// Interval between progress logs while waiting for a sub-controller to stop
    pub const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);
}

/// Buffer of the channel sub-controllers use to wake the primary loop
pub const TRIGGER_CHANNEL_CAPACITY: usize = 1024;

/// Default namespace exemptions written into the Config resource
pub mod defaults {
    pub const EXCLUDED_NAMESPACES: &[&str] = &[
        "kube-*",
        "multicluster-engine",
        "hypershift",
        "hive",
        "rhacs-operator",
        "open-cluster-*",
        "openshift-*",
    ];

    pub const PROCESSES: &[&str] = &["webhook", "mutation-webhook"];
}
