// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{DropReason, Enricher};
use crate::cmdb::cache::{CacheValue, CmdbCache, keys};
use crate::cmdb::client::{CmdbError, MockCmdbClient};
use crate::pipeline::dimensions::{DimensionSet, DimensionValue};
use crate::test::{POD_CPU_LABELS, make_labels, make_seeded_cache};
use bd_server_stats::stats::Collector;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;

fn pod_labels() -> Vec<(&'static str, &'static str)> {
  let mut labels = POD_CPU_LABELS.to_vec();
  labels.extend([
    ("bk_obj_id", "k8s_pod"),
    ("instance_name", "u1"),
    ("cluster_name", "c1"),
  ]);
  labels
}

fn make_enricher(cache: Arc<CmdbCache>) -> Enricher {
  Enricher::new(cache)
}

#[tokio::test]
async fn pod_enrichment() {
  let cache = make_seeded_cache(MockCmdbClient::new(), &Collector::default().scope("test"));
  let enricher = make_enricher(cache);

  let dimensions = enricher.enrich(&make_labels(&pod_labels())).await.unwrap();
  assert_eq!(
    [
      ("bk_biz_id", DimensionValue::Int(100)),
      ("bk_data_id", DimensionValue::from("2001")),
      ("bk_inst_id", DimensionValue::Int(42)),
      ("bk_obj_id", DimensionValue::from("k8s_pod")),
      ("cluster", DimensionValue::Int(7)),
      ("instance_name", DimensionValue::from("u1")),
      ("namespace_id", DimensionValue::Int(9)),
      ("node_id", DimensionValue::Int(3)),
      ("pod_id", DimensionValue::Int(42)),
      ("workload", DimensionValue::Int(5)),
    ]
    .into_iter()
    .collect::<DimensionSet>(),
    dimensions
  );
}

#[tokio::test]
async fn pod_without_workload_relation() {
  let cache = make_seeded_cache(MockCmdbClient::new(), &Collector::default().scope("test"));
  cache.store().insert_snapshot(
    keys::POD_WORKLOAD_SNAPSHOT.to_string(),
    CacheValue::IdMap(Arc::new(HashMap::new())),
  );
  let enricher = make_enricher(cache);

  assert_eq!(
    Err(DropReason::WorkloadId),
    enricher.enrich(&make_labels(&pod_labels())).await
  );
}

#[tokio::test]
async fn pod_with_unknown_namespace_business() {
  let cache = make_seeded_cache(MockCmdbClient::new(), &Collector::default().scope("test"));
  cache.store().insert_snapshot(
    keys::set_biz_snapshot("k8s_namespace"),
    CacheValue::IdMap(Arc::new(HashMap::new())),
  );
  let enricher = make_enricher(cache);

  assert_eq!(
    Err(DropReason::BizId),
    enricher.enrich(&make_labels(&pod_labels())).await
  );
}

#[tokio::test]
async fn pod_without_namespace() {
  let cache = make_seeded_cache(MockCmdbClient::new(), &Collector::default().scope("test"));
  let enricher = make_enricher(cache);
  let mut labels = make_labels(&pod_labels());
  labels.remove("namespace");

  assert_eq!(
    Err(DropReason::MissingLabel("namespace")),
    enricher.enrich(&labels).await
  );
}

#[tokio::test]
async fn missing_protocol_or_object() {
  let enricher = make_enricher(make_seeded_cache(
    MockCmdbClient::new(),
    &Collector::default().scope("test"),
  ));
  assert_eq!(
    Err(DropReason::MissingLabel("protocol")),
    enricher
      .enrich(&make_labels(&[("bk_obj_id", "bk_switch")]))
      .await
  );
  assert_eq!(
    Err(DropReason::MissingLabel("bk_obj_id")),
    enricher
      .enrich(&make_labels(&[("protocol", "snmp"), ("bk_obj_id", "")]))
      .await
  );
}

#[tokio::test]
async fn vector_is_not_enriched() {
  // No expectations, any lookup fails the test.
  let enricher = make_enricher(Arc::new(CmdbCache::new(
    Arc::new(MockCmdbClient::new()),
    std::time::Duration::from_secs(300),
    &Collector::default().scope("test"),
  )));
  let labels = make_labels(&[
    ("__name__", "link_latency"),
    ("protocol", "vector"),
    ("bk_obj_id", "bk_switch"),
    ("bk_biz_id", "2"),
  ]);

  assert_eq!(
    DimensionSet::from_labels(&labels),
    enricher.enrich(&labels).await.unwrap()
  );
}

#[tokio::test]
async fn snmp_enrichment() {
  let mut client = MockCmdbClient::new();
  client
    .expect_get_data_id()
    .times(1)
    .returning(|_| Ok("1500123".to_string()));
  client
    .expect_get_inst_id()
    .withf(|obj_id, inst_name| obj_id == "bk_switch" && inst_name == "sw1")
    .times(1)
    .returning(|_, _| Ok(11));
  client
    .expect_get_biz_id()
    .withf(|obj_id, inst_id| obj_id == "bk_switch" && *inst_id == 11)
    .times(1)
    .returning(|_, _| Ok(2));
  let enricher = make_enricher(Arc::new(CmdbCache::new(
    Arc::new(client),
    std::time::Duration::from_secs(300),
    &Collector::default().scope("test"),
  )));

  let dimensions = enricher
    .enrich(&make_labels(&[
      ("__name__", "ifInOctets"),
      ("protocol", "snmp"),
      ("bk_obj_id", "bk_switch"),
      ("bk_inst_name", "sw1"),
      ("instance_name", "10.0.0.1:161"),
      ("name", "eth0"),
      ("job", "snmp"),
    ]))
    .await
    .unwrap();

  assert_eq!(
    [
      ("__name__", DimensionValue::from("eth0")),
      ("bk_biz_id", DimensionValue::Int(2)),
      ("bk_data_id", DimensionValue::from("1500123")),
      ("bk_inst_id", DimensionValue::Int(11)),
      ("bk_obj_id", DimensionValue::from("bk_switch")),
      ("instance_name", DimensionValue::from("sw1")),
      ("protocol", DimensionValue::from("snmp")),
    ]
    .into_iter()
    .collect::<DimensionSet>(),
    dimensions
  );
}

#[tokio::test]
async fn ipmi_keeps_instance_name_label() {
  let mut client = MockCmdbClient::new();
  client
    .expect_get_inst_id()
    .withf(|_, inst_name| inst_name == "server1")
    .returning(|_, _| Ok(12));
  client.expect_get_biz_id().returning(|_, _| Ok(3));
  let enricher = make_enricher(Arc::new(CmdbCache::new(
    Arc::new(client),
    std::time::Duration::from_secs(300),
    &Collector::default().scope("test"),
  )));

  let dimensions = enricher
    .enrich(&make_labels(&[
      ("protocol", "ipmi"),
      ("bk_obj_id", "hard_server"),
      ("bk_data_id", "77"),
      ("bk_inst_name", "server1"),
    ]))
    .await
    .unwrap();
  assert_eq!(Some("server1"), dimensions.get_str("bk_inst_name"));
  assert_eq!(Some("server1"), dimensions.get_str("instance_name"));
  assert_eq!(12, dimensions.id("bk_inst_id"));
}

#[tokio::test]
async fn presupplied_ids_win() {
  // No expectations, the pre-supplied ids must be used.
  let enricher = make_enricher(Arc::new(CmdbCache::new(
    Arc::new(MockCmdbClient::new()),
    std::time::Duration::from_secs(300),
    &Collector::default().scope("test"),
  )));
  let dimensions = enricher
    .enrich(&make_labels(&[
      ("protocol", "snmp"),
      ("source", "automate"),
      ("bk_obj_id", "bk_router"),
      ("bk_data_id", "88"),
      ("bk_inst_id", "21"),
      ("bk_biz_id", "4"),
    ]))
    .await
    .unwrap();
  assert_eq!(Some(&DimensionValue::Int(21)), dimensions.get("bk_inst_id"));
  assert_eq!(Some(&DimensionValue::Int(4)), dimensions.get("bk_biz_id"));

  assert_eq!(
    Err(DropReason::InstId),
    enricher
      .enrich(&make_labels(&[
        ("protocol", "snmp"),
        ("bk_obj_id", "bk_router"),
        ("bk_data_id", "88"),
        ("bk_inst_id", "not a number"),
      ]))
      .await
  );
}

#[tokio::test]
async fn business_required_except_for_cloud() {
  let mut client = MockCmdbClient::new();
  client
    .expect_get_biz_id()
    .returning(|_, _| Err(CmdbError::Response("unknown".to_string())));
  let enricher = make_enricher(Arc::new(CmdbCache::new(
    Arc::new(client),
    std::time::Duration::from_secs(300),
    &Collector::default().scope("test"),
  )));

  let labels = |protocol| {
    make_labels(&[
      ("protocol", protocol),
      ("bk_obj_id", "qcloud_cvm"),
      ("bk_data_id", "99"),
      ("bk_inst_id", "31"),
    ])
  };
  assert_eq!(
    Err(DropReason::BizId),
    enricher.enrich(&labels("snmp")).await
  );
  let dimensions = enricher.enrich(&labels("cloud")).await.unwrap();
  assert_eq!(None, dimensions.get("bk_biz_id"));
  assert_eq!(31, dimensions.id("bk_inst_id"));
}

#[tokio::test]
async fn node_enrichment() {
  let mut client = MockCmdbClient::new();
  client
    .expect_get_data_id()
    .returning(|_| Ok("3001".to_string()));
  let cache = make_seeded_cache(client, &Collector::default().scope("test"));
  cache.store().insert_snapshot(
    keys::set_biz_snapshot("k8s_cluster"),
    CacheValue::IdMap(Arc::new(HashMap::from([(7, 101)]))),
  );
  let enricher = make_enricher(cache);

  let dimensions = enricher
    .enrich(&make_labels(&[
      ("__name__", "node_cpu_utilization"),
      ("protocol", "kubernetes"),
      ("bk_obj_id", "bk_node"),
      ("node", "n1"),
      ("cluster", "c1"),
      ("cluster_name", "c1"),
      ("instance_name", "n1"),
      ("device", "sda"),
      ("dimision", "device"),
    ]))
    .await
    .unwrap();

  assert_eq!(
    [
      ("bk_biz_id", DimensionValue::Int(101)),
      ("bk_data_id", DimensionValue::from("3001")),
      ("bk_inst_id", DimensionValue::Int(3)),
      ("bk_obj_id", DimensionValue::from("bk_node")),
      ("cluster", DimensionValue::Int(7)),
      ("device", DimensionValue::from("sda")),
      ("instance_name", DimensionValue::from("n1")),
      ("node_id", DimensionValue::Int(3)),
    ]
    .into_iter()
    .collect::<DimensionSet>(),
    dimensions
  );
}

#[tokio::test]
async fn pod_with_unknown_node_is_dropped() {
  let mut client = MockCmdbClient::new();
  client
    .expect_get_inst_id()
    .withf(|obj_id, inst_name| obj_id == "bk_node" && inst_name == "n9")
    .times(1)
    .returning(|_, _| Ok(0));
  let enricher = make_enricher(make_seeded_cache(
    client,
    &Collector::default().scope("test"),
  ));
  let mut labels = make_labels(&pod_labels());
  labels.insert("node".to_string(), "n9".to_string());

  assert_eq!(Err(DropReason::NodeId), enricher.enrich(&labels).await);
}

#[tokio::test]
async fn node_with_unknown_node_id_is_kept() {
  let mut client = MockCmdbClient::new();
  client
    .expect_get_data_id()
    .returning(|_| Ok("3001".to_string()));
  client
    .expect_get_inst_id()
    .withf(|obj_id, inst_name| obj_id == "bk_node" && inst_name == "n9")
    .times(1)
    .returning(|_, _| Ok(0));
  let cache = make_seeded_cache(client, &Collector::default().scope("test"));
  cache.store().insert_snapshot(
    keys::set_biz_snapshot("k8s_cluster"),
    CacheValue::IdMap(Arc::new(HashMap::from([(7, 101)]))),
  );
  let enricher = make_enricher(cache);

  let dimensions = enricher
    .enrich(&make_labels(&[
      ("__name__", "node_cpu_utilization"),
      ("protocol", "kubernetes"),
      ("bk_obj_id", "bk_node"),
      ("node", "n9"),
      ("cluster", "c1"),
      ("instance_name", "n1"),
    ]))
    .await
    .unwrap();

  assert_eq!(Some(&DimensionValue::Int(0)), dimensions.get("node_id"));
  assert_eq!(Some(&DimensionValue::Int(3)), dimensions.get("bk_inst_id"));
  assert_eq!(Some(&DimensionValue::Int(101)), dimensions.get("bk_biz_id"));
}
