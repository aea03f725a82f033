// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./classifier_test.rs"]
mod classifier_test;

use super::dimensions::LabelSet;
use crate::cmdb::{BK_NODE, K8S_CLUSTER, K8S_POD, ObjectType};
use anyhow::Context;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

//
// Catalog file
//

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogEntry {
  Name(String),
  Renamed(BTreeMap<String, String>),
}

#[derive(Deserialize, Default)]
struct CatalogFile {
  #[serde(default, rename = "K8sClusterMetrics")]
  cluster: Vec<CatalogEntry>,
  #[serde(default, rename = "K8sNodeMetrics")]
  node: Vec<CatalogEntry>,
  #[serde(default, rename = "K8sPodMetrics")]
  pod: Vec<CatalogEntry>,
}

fn entries_to_map(entries: Vec<CatalogEntry>) -> HashMap<String, String> {
  entries
    .into_iter()
    .flat_map(|entry| match entry {
      CatalogEntry::Name(name) => vec![(name.clone(), name)],
      CatalogEntry::Renamed(renamed) => renamed.into_iter().collect(),
    })
    .collect()
}

//
// Classification
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
  pub object_type: ObjectType,
  pub canonical_name: String,
}

//
// MetricsCatalog
//

// Raw collector metric name -> canonical name, per Kubernetes object level.
#[derive(Debug, Default)]
pub struct MetricsCatalog {
  cluster: HashMap<String, String>,
  node: HashMap<String, String>,
  pod: HashMap<String, String>,
}

impl MetricsCatalog {
  pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
    let file: Option<CatalogFile> = serde_yaml::from_str(yaml)?;
    let file = file.unwrap_or_default();
    Ok(Self {
      cluster: entries_to_map(file.cluster),
      node: entries_to_map(file.node),
      pod: entries_to_map(file.pod),
    })
  }

  // Load the catalog file. A missing or invalid file leaves Kubernetes metrics unclassifiable but
  // does not stop the process.
  #[must_use]
  pub fn load(path: &Path) -> Self {
    let result = std::fs::read_to_string(path)
      .with_context(|| format!("failed to read {}", path.display()))
      .and_then(|yaml| Self::from_yaml(&yaml).context("failed to parse metrics catalog"));
    match result {
      Ok(catalog) => {
        log::info!(
          "loaded metrics catalog {}: {} cluster, {} node, {} pod metrics",
          path.display(),
          catalog.cluster.len(),
          catalog.node.len(),
          catalog.pod.len()
        );
        catalog
      },
      Err(e) => {
        log::error!("{e:#}, no kubernetes metrics will be classified");
        Self::default()
      },
    }
  }

  // Classify a Kubernetes series by its metric name and inject the object identity labels used by
  // enrichment. Returns None when the name is unknown or a required label is missing, in which
  // case the labels are left untouched.
  pub fn classify(&self, labels: &mut LabelSet) -> Option<Classification> {
    let name = labels.get("__name__")?;
    let cluster = labels.get("cluster")?.clone();

    let (object_type, obj_id, canonical_name, instance_name) =
      if let Some(canonical_name) = self.cluster.get(name) {
        (
          ObjectType::K8sCluster,
          K8S_CLUSTER,
          canonical_name,
          cluster.clone(),
        )
      } else if let Some(canonical_name) = self.node.get(name) {
        (
          ObjectType::BkNode,
          BK_NODE,
          canonical_name,
          labels.get("node")?.clone(),
        )
      } else if let Some(canonical_name) = self.pod.get(name) {
        labels.get("pod")?;
        (
          ObjectType::K8sPod,
          K8S_POD,
          canonical_name,
          labels.get("uid")?.clone(),
        )
      } else {
        return None;
      };

    let canonical_name = canonical_name.clone();
    labels.insert("bk_obj_id".to_string(), obj_id.to_string());
    labels.insert("instance_name".to_string(), instance_name);
    labels.insert("cluster_name".to_string(), cluster);
    Some(Classification {
      object_type,
      canonical_name,
    })
  }
}
