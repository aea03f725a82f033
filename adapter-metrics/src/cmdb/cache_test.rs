// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{CacheValue, CmdbCache, Resolve, TtlStore, keys};
use crate::cmdb::client::{CmdbError, MockCmdbClient};
use bd_server_stats::test::util::stats::Helper as StatsHelper;
use pretty_assertions::assert_eq;
use prometheus::labels;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn make_cache(client: MockCmdbClient) -> (CmdbCache, StatsHelper) {
  let stats_helper = StatsHelper::default();
  let cache = CmdbCache::new(
    Arc::new(client),
    Duration::from_secs(300),
    &stats_helper.collector().scope(""),
  );
  (cache, stats_helper)
}

#[tokio::test(start_paused = true)]
async fn store_expiry() {
  let store = TtlStore::new(Duration::from_secs(10));
  store.insert("a".to_string(), CacheValue::Id(1));
  store.insert_snapshot("b".to_string(), CacheValue::Id(2));
  assert_eq!(Some(CacheValue::Id(1)), store.get("a"));

  tokio::time::advance(Duration::from_secs(11)).await;
  assert_eq!(None, store.get("a"));
  assert_eq!(Some(CacheValue::Id(2)), store.get("b"));
  assert_eq!(1, store.len());
}

#[tokio::test]
async fn inst_id_cache_hit() {
  let mut client = MockCmdbClient::new();
  client
    .expect_get_inst_id()
    .withf(|obj_id, inst_name| obj_id == "k8s_pod" && inst_name == "u1")
    .times(1)
    .returning(|_, _| Ok(42));
  let (cache, _stats_helper) = make_cache(client);

  assert_eq!(42, cache.resolve_inst_id("k8s_pod", "u1").await);
  assert_eq!(42, cache.resolve_inst_id("k8s_pod", "u1").await);
}

#[tokio::test(start_paused = true)]
async fn failed_lookup_is_cached_until_expiry() {
  let mut client = MockCmdbClient::new();
  let mut seq = mockall::Sequence::new();
  client
    .expect_get_biz_id()
    .times(1)
    .in_sequence(&mut seq)
    .returning(|_, _| Err(CmdbError::Response("down".to_string())));
  client
    .expect_get_biz_id()
    .times(1)
    .in_sequence(&mut seq)
    .returning(|_, _| Ok(100));
  let (cache, stats_helper) = make_cache(client);

  assert_eq!(0, cache.resolve_biz_id("bk_switch", 7).await);
  assert_eq!(0, cache.resolve_biz_id("bk_switch", 7).await);
  stats_helper.assert_counter_eq(
    1,
    "cmdb_get_info_fail",
    &labels! { "bk_obj_id" => "bk_switch", "api_type" => "get_inst_biz_id" },
  );

  tokio::time::advance(Duration::from_secs(301)).await;
  assert_eq!(100, cache.resolve_biz_id("bk_switch", 7).await);
}

#[tokio::test]
async fn inst_id_from_snapshot() {
  let mut client = MockCmdbClient::new();
  client
    .expect_get_inst_id()
    .withf(|_, inst_name| inst_name == "new")
    .times(1)
    .returning(|_, _| Ok(5));
  let (cache, _stats_helper) = make_cache(client);
  cache.store().insert_snapshot(
    keys::inst_name_snapshot("bk_switch"),
    CacheValue::NameMap(Arc::new(HashMap::from([("sw1".to_string(), 3)]))),
  );

  assert_eq!(3, cache.resolve_inst_id("bk_switch", "sw1").await);
  assert_eq!(5, cache.resolve_inst_id("bk_switch", "new").await);
}

#[tokio::test]
async fn data_id() {
  let mut client = MockCmdbClient::new();
  client
    .expect_get_data_id()
    .withf(|obj_id| obj_id == "k8s_pod")
    .times(1)
    .returning(|_| Ok("2001".to_string()));
  client
    .expect_get_data_id()
    .withf(|obj_id| obj_id == "bk_switch")
    .times(1)
    .returning(|_| Err(CmdbError::Response("no table".to_string())));
  let (cache, stats_helper) = make_cache(client);

  assert_eq!(Some("2001".to_string()), cache.resolve_data_id("k8s_pod").await);
  assert_eq!(Some("2001".to_string()), cache.resolve_data_id("k8s_pod").await);
  assert_eq!(None, cache.resolve_data_id("bk_switch").await);
  assert_eq!(None, cache.resolve_data_id("bk_switch").await);

  stats_helper.assert_counter_eq(1, "weops_get_data_id_fail", &labels! {});
  stats_helper.assert_counter_eq(
    1,
    "weops_get_obj_data_id_fail",
    &labels! { "bk_obj_id" => "bk_switch" },
  );
}

#[tokio::test]
async fn workload_prefers_snapshot() {
  let mut client = MockCmdbClient::new();
  client
    .expect_get_workload_id()
    .times(1)
    .returning(|_| Ok(8));
  let (cache, _stats_helper) = make_cache(client);

  // Without a relation table the single lookup is used.
  assert_eq!(8, cache.resolve_workload_id(1).await);

  cache.store().insert_snapshot(
    keys::POD_WORKLOAD_SNAPSHOT.to_string(),
    CacheValue::IdMap(Arc::new(HashMap::from([(42, 5)]))),
  );
  assert_eq!(5, cache.resolve_workload_id(42).await);
  assert_eq!(0, cache.resolve_workload_id(43).await);
}

#[tokio::test]
async fn set_biz_id() {
  let (cache, _stats_helper) = make_cache(MockCmdbClient::new());
  assert_eq!(None, cache.set_biz_id("k8s_namespace", 9));

  cache.store().insert_snapshot(
    keys::set_biz_snapshot("k8s_namespace"),
    CacheValue::IdMap(Arc::new(HashMap::from([(9, 100)]))),
  );
  assert_eq!(Some(100), cache.set_biz_id("k8s_namespace", 9));
  assert_eq!(Some(0), cache.set_biz_id("k8s_namespace", 10));
}
