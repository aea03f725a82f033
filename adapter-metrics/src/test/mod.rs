// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::cmdb::cache::{CacheValue, CmdbCache, keys};
use crate::cmdb::client::MockCmdbClient;
use crate::cmdb::{BK_NODE, K8S_CLUSTER, K8S_NAMESPACE, K8S_POD};
use crate::pipeline::dimensions::LabelSet;
use bd_proto::protos::prometheus::prompb::remote::WriteRequest;
use bd_proto::protos::prometheus::prompb::types::{Label, Sample, TimeSeries};
use bd_server_stats::stats::Scope;
use protobuf::Message;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const POD_CPU_LABELS: &[(&str, &str)] = &[
  ("__name__", "pod_cpu_utilization"),
  ("protocol", "kubernetes"),
  ("node", "n1"),
  ("cluster", "c1"),
  ("pod", "p1"),
  ("uid", "u1"),
  ("namespace", "ns1"),
];

pub const POD_CPU_CATALOG: &str = r"
K8sPodMetrics:
  - pod_cpu_utilization
K8sNodeMetrics:
  - node_cpu_utilization
";

#[must_use]
pub fn make_labels(pairs: &[(&str, &str)]) -> LabelSet {
  pairs
    .iter()
    .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
    .collect()
}

#[must_use]
pub fn make_label(name: &str, value: &str) -> Label {
  Label {
    name: name.to_string().into(),
    value: value.to_string().into(),
    ..Default::default()
  }
}

// A series with the given labels and (value, timestamp in ms) samples.
#[must_use]
pub fn make_timeseries(labels: &[(&str, &str)], samples: &[(f64, i64)]) -> TimeSeries {
  TimeSeries {
    labels: labels
      .iter()
      .map(|(name, value)| make_label(name, value))
      .collect(),
    samples: samples
      .iter()
      .map(|(value, timestamp)| Sample {
        value: *value,
        timestamp: *timestamp,
        ..Default::default()
      })
      .collect(),
    ..Default::default()
  }
}

#[must_use]
pub fn make_write_request(timeseries: Vec<TimeSeries>) -> WriteRequest {
  WriteRequest {
    timeseries,
    ..Default::default()
  }
}

// Snappy compressed protobuf body as sent by a remote write client.
#[must_use]
pub fn make_remote_write_body(write_request: &WriteRequest) -> Vec<u8> {
  let encoded = write_request.write_to_bytes().unwrap();
  snap::raw::Encoder::new().compress_vec(&encoded).unwrap()
}

// A cache holding everything needed to enrich the pod cpu series without calling the CMDB:
// pod 42, cluster 7, workload 5, node 3, namespace 9, business 100, data id 2001.
#[must_use]
pub fn make_seeded_cache(client: MockCmdbClient, scope: &Scope) -> Arc<CmdbCache> {
  let cache = Arc::new(CmdbCache::new(
    Arc::new(client),
    Duration::from_secs(300),
    scope,
  ));
  let store = cache.store();
  store.insert(
    keys::data_id(K8S_POD),
    CacheValue::DataId("2001".to_string()),
  );
  store.insert(keys::inst_id(K8S_POD, "u1"), CacheValue::Id(42));
  store.insert(keys::inst_id(K8S_CLUSTER, "c1"), CacheValue::Id(7));
  store.insert(keys::inst_id(BK_NODE, "n1"), CacheValue::Id(3));
  store.insert(keys::inst_id(K8S_NAMESPACE, "ns1 (c1)"), CacheValue::Id(9));
  store.insert_snapshot(
    keys::POD_WORKLOAD_SNAPSHOT.to_string(),
    CacheValue::IdMap(Arc::new(HashMap::from([(42, 5)]))),
  );
  store.insert_snapshot(
    keys::set_biz_snapshot(K8S_NAMESPACE),
    CacheValue::IdMap(Arc::new(HashMap::from([(9, 100)]))),
  );
  cache
}
