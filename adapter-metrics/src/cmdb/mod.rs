// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod cache;
pub mod client;
pub mod refresh;

pub const K8S_POD: &str = "k8s_pod";
pub const BK_NODE: &str = "bk_node";
pub const K8S_CLUSTER: &str = "k8s_cluster";
pub const K8S_NAMESPACE: &str = "k8s_namespace";
pub const K8S_WORKLOAD: &str = "k8s_workload";

// The CMDB grouping object that links namespaces and clusters to a business.
pub const SET_OBJECT: &str = "set";

// Every object type whose instance table is refreshed in bulk.
pub const OBJECT_CATALOG: &[&str] = &[
  K8S_POD,
  K8S_CLUSTER,
  BK_NODE,
  K8S_WORKLOAD,
  K8S_NAMESPACE,
  "bk_switch",
  "bk_router",
  "bk_firewall",
  "bk_loadbalance",
  "hard_server",
  "vmware_ds",
  "vmware_vm",
  "vmware_esxi",
  "qcloud_cvm",
  "aliyun_ecs",
  "mo_server",
  "mo_host",
  "mo_cloud",
  "mo_ds",
];

// Object types whose set associations are resolved to business ids during the bulk refresh.
pub const SET_BIZ_OBJECTS: &[&str] = &[K8S_NAMESPACE, K8S_CLUSTER];

//
// ObjectType
//

// The enrichment branch selected by a bk_obj_id. Anything that is not one of the Kubernetes
// objects with dedicated join logic goes through the generic path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectType {
  K8sPod,
  BkNode,
  K8sCluster,
  K8sNamespace,
  K8sWorkload,
  Other,
}

impl ObjectType {
  #[must_use]
  pub fn from_obj_id(obj_id: &str) -> Self {
    match obj_id {
      K8S_POD => Self::K8sPod,
      BK_NODE => Self::BkNode,
      K8S_CLUSTER => Self::K8sCluster,
      K8S_NAMESPACE => Self::K8sNamespace,
      K8S_WORKLOAD => Self::K8sWorkload,
      _ => Self::Other,
    }
  }

  #[must_use]
  pub const fn obj_id(self) -> Option<&'static str> {
    match self {
      Self::K8sPod => Some(K8S_POD),
      Self::BkNode => Some(BK_NODE),
      Self::K8sCluster => Some(K8S_CLUSTER),
      Self::K8sNamespace => Some(K8S_NAMESPACE),
      Self::K8sWorkload => Some(K8S_WORKLOAD),
      Self::Other => None,
    }
  }
}
