// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{Classification, MetricsCatalog};
use crate::cmdb::ObjectType;
use crate::pipeline::dimensions::LabelSet;
use pretty_assertions::assert_eq;
use std::io::Write;

const CATALOG: &str = r"
K8sClusterMetrics:
  - cluster_pod_count
K8sNodeMetrics:
  - node_cpu_utilization
  - node_mem_raw: node_mem_utilization
K8sPodMetrics:
  - pod_cpu_utilization
";

fn labels(pairs: &[(&str, &str)]) -> LabelSet {
  pairs
    .iter()
    .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
    .collect()
}

#[test]
fn pod_metric() {
  let catalog = MetricsCatalog::from_yaml(CATALOG).unwrap();
  let mut pod = labels(&[
    ("__name__", "pod_cpu_utilization"),
    ("cluster", "c1"),
    ("node", "n1"),
    ("pod", "p1"),
    ("uid", "u1"),
  ]);
  assert_eq!(
    Some(Classification {
      object_type: ObjectType::K8sPod,
      canonical_name: "pod_cpu_utilization".to_string(),
    }),
    catalog.classify(&mut pod)
  );
  assert_eq!("k8s_pod", pod["bk_obj_id"]);
  assert_eq!("u1", pod["instance_name"]);
  assert_eq!("c1", pod["cluster_name"]);
}

#[test]
fn pod_metric_without_pod_label() {
  let catalog = MetricsCatalog::from_yaml(CATALOG).unwrap();
  let mut pod = labels(&[
    ("__name__", "pod_cpu_utilization"),
    ("cluster", "c1"),
    ("node", "n1"),
    ("uid", "u1"),
  ]);
  let before = pod.clone();
  assert_eq!(None, catalog.classify(&mut pod));
  assert_eq!(before, pod);
}

#[test]
fn node_metric() {
  let catalog = MetricsCatalog::from_yaml(CATALOG).unwrap();
  let mut node = labels(&[("__name__", "node_mem_raw"), ("cluster", "c1"), ("node", "n1")]);
  assert_eq!(
    Some(Classification {
      object_type: ObjectType::BkNode,
      canonical_name: "node_mem_utilization".to_string(),
    }),
    catalog.classify(&mut node)
  );
  assert_eq!("bk_node", node["bk_obj_id"]);
  assert_eq!("n1", node["instance_name"]);

  let mut missing_node = labels(&[("__name__", "node_cpu_utilization"), ("cluster", "c1")]);
  assert_eq!(None, catalog.classify(&mut missing_node));
  let mut missing_cluster = labels(&[("__name__", "node_cpu_utilization"), ("node", "n1")]);
  assert_eq!(None, catalog.classify(&mut missing_cluster));
}

#[test]
fn cluster_metric() {
  let catalog = MetricsCatalog::from_yaml(CATALOG).unwrap();
  let mut cluster = labels(&[("__name__", "cluster_pod_count"), ("cluster", "c1")]);
  assert_eq!(
    Some(ObjectType::K8sCluster),
    catalog
      .classify(&mut cluster)
      .map(|classification| classification.object_type)
  );
  assert_eq!("k8s_cluster", cluster["bk_obj_id"]);
  assert_eq!("c1", cluster["instance_name"]);
}

#[test]
fn unknown_metric() {
  let catalog = MetricsCatalog::from_yaml(CATALOG).unwrap();
  let mut unknown = labels(&[("__name__", "up"), ("cluster", "c1"), ("node", "n1")]);
  assert_eq!(None, catalog.classify(&mut unknown));
}

#[test]
fn load_from_file() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  file.write_all(CATALOG.as_bytes()).unwrap();
  let catalog = MetricsCatalog::load(file.path());
  let mut pod = labels(&[
    ("__name__", "pod_cpu_utilization"),
    ("cluster", "c1"),
    ("pod", "p1"),
    ("uid", "u1"),
  ]);
  assert!(catalog.classify(&mut pod).is_some());

  let missing = MetricsCatalog::load(std::path::Path::new("/nonexistent/metrics.yaml"));
  assert_eq!(None, missing.classify(&mut pod));
}
