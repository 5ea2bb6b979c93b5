//! OpenStackLoadBalanceService CRD
//!
//! Singleton-style switch: while at least one object of this kind exists in
//! the cluster, the engine mirrors MetalLB VIPs onto Neutron ports.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "openstack.neutron-k8s-sync.io",
    version = "v1alpha1",
    kind = "OpenStackLoadBalanceService",
    namespaced,
    status = "OpenStackLoadBalanceServiceStatus",
    printcolumn = r#"{"name":"AGE", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackLoadBalanceServiceSpec {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackLoadBalanceServiceStatus {}
