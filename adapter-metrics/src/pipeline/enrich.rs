// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./enrich_test.rs"]
mod enrich_test;

use super::dimensions::{DimensionSet, LabelSet, NODE_DIMENSIONS, POD_DIMENSIONS};
use super::protocol;
use crate::cmdb::cache::Resolve;
use crate::cmdb::{BK_NODE, K8S_CLUSTER, K8S_NAMESPACE, K8S_POD, ObjectType};
use std::sync::Arc;

//
// DropReason
//

// Why a series was not enriched. Only used for logging, the drop counter is labeled by protocol
// and metric name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
  MissingLabel(&'static str),
  DataId,
  InstId,
  ClusterId,
  WorkloadId,
  NodeId,
  NamespaceId,
  BizId,
}

type Result<T> = std::result::Result<T, DropReason>;

fn required<'a>(dimensions: &'a DimensionSet, key: &'static str) -> Result<&'a str> {
  dimensions
    .get_str(key)
    .filter(|value| !value.is_empty())
    .ok_or(DropReason::MissingLabel(key))
}

fn non_zero(id: i64, reason: DropReason) -> Result<i64> {
  if id == 0 { Err(reason) } else { Ok(id) }
}

//
// Enricher
//

// Joins a series' labels against the CMDB into the dimension set of its samples.
pub struct Enricher {
  resolver: Arc<dyn Resolve>,
}

impl Enricher {
  pub fn new(resolver: Arc<dyn Resolve>) -> Self {
    Self { resolver }
  }

  pub async fn enrich(&self, labels: &LabelSet) -> Result<DimensionSet> {
    let mut dimensions = DimensionSet::from_labels(labels);

    let obj_id = required(&dimensions, "bk_obj_id")?.to_string();
    let protocol = required(&dimensions, protocol::LABEL)?.to_string();
    if protocol == protocol::VECTOR {
      return Ok(dimensions);
    }

    if dimensions.get_str("bk_data_id").is_none_or(str::is_empty) {
      let data_id = self
        .resolver
        .resolve_data_id(&obj_id)
        .await
        .ok_or(DropReason::DataId)?;
      dimensions.insert("bk_data_id", data_id);
    }

    match ObjectType::from_obj_id(&obj_id) {
      ObjectType::K8sPod => self.enrich_pod(&mut dimensions).await?,
      ObjectType::BkNode => self.enrich_node(&mut dimensions).await?,
      _ => {},
    }

    if protocol == protocol::SNMP {
      if let Some(inst_name) = dimensions.remove("bk_inst_name") {
        dimensions.insert("instance_name", inst_name);
      }
    } else if protocol == protocol::IPMI
      && let Some(inst_name) = dimensions.get("bk_inst_name").cloned()
    {
      dimensions.insert("instance_name", inst_name);
    }

    let inst_id = if dimensions.contains_key("bk_inst_id") {
      dimensions.id("bk_inst_id")
    } else {
      match dimensions.get_str("instance_name") {
        Some(inst_name) => self.resolver.resolve_inst_id(&obj_id, inst_name).await,
        None => 0,
      }
    };
    dimensions.insert("bk_inst_id", non_zero(inst_id, DropReason::InstId)?);

    let biz_id = if dimensions.contains_key("bk_biz_id") {
      dimensions.id("bk_biz_id")
    } else {
      self.resolver.resolve_biz_id(&obj_id, inst_id).await
    };
    if biz_id != 0 {
      dimensions.insert("bk_biz_id", biz_id);
    } else if protocol != protocol::CLOUD {
      return Err(DropReason::BizId);
    }

    dimensions.rename_reserved();
    Ok(dimensions)
  }

  async fn enrich_pod(&self, dimensions: &mut DimensionSet) -> Result<()> {
    let instance_name = required(dimensions, "instance_name")?.to_string();
    let cluster_name = required(dimensions, "cluster_name")?.to_string();

    let pod_id = non_zero(
      self.resolver.resolve_inst_id(K8S_POD, &instance_name).await,
      DropReason::InstId,
    )?;
    dimensions.insert("pod_id", pod_id);
    dimensions.insert("bk_inst_id", pod_id);

    let cluster_id = non_zero(
      self.resolver.resolve_inst_id(K8S_CLUSTER, &cluster_name).await,
      DropReason::ClusterId,
    )?;
    dimensions.insert("cluster", cluster_id);

    let workload_id = non_zero(
      self.resolver.resolve_workload_id(pod_id).await,
      DropReason::WorkloadId,
    )?;
    dimensions.insert("workload", workload_id);

    if let Some(node) = dimensions.get_str("node").map(ToString::to_string) {
      let node_id = non_zero(
        self.resolver.resolve_inst_id(BK_NODE, &node).await,
        DropReason::NodeId,
      )?;
      dimensions.insert("node_id", node_id);
    }

    let namespace = required(dimensions, "namespace")?;
    let namespace_name = format!("{namespace} ({cluster_name})");
    let namespace_id = non_zero(
      self
        .resolver
        .resolve_inst_id(K8S_NAMESPACE, &namespace_name)
        .await,
      DropReason::NamespaceId,
    )?;
    dimensions.insert("namespace_id", namespace_id);

    if let Some(biz_id) = self.resolver.set_biz_id(K8S_NAMESPACE, namespace_id) {
      dimensions.insert("bk_biz_id", non_zero(biz_id, DropReason::BizId)?);
    }

    dimensions.retain_whitelisted(POD_DIMENSIONS);
    Ok(())
  }

  async fn enrich_node(&self, dimensions: &mut DimensionSet) -> Result<()> {
    let cluster = required(dimensions, "cluster")?.to_string();
    let cluster_id = non_zero(
      self.resolver.resolve_inst_id(K8S_CLUSTER, &cluster).await,
      DropReason::ClusterId,
    )?;
    dimensions.insert("cluster", cluster_id);

    if let Some(node) = dimensions.get_str("node").map(ToString::to_string) {
      let node_id = self.resolver.resolve_inst_id(BK_NODE, &node).await;
      dimensions.insert("node_id", node_id);
    }

    if let Some(biz_id) = self.resolver.set_biz_id(K8S_CLUSTER, cluster_id) {
      dimensions.insert("bk_biz_id", non_zero(biz_id, DropReason::BizId)?);
    }

    dimensions.retain_whitelisted(NODE_DIMENSIONS);
    Ok(())
  }
}
