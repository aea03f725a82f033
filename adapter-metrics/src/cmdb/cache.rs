// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./cache_test.rs"]
mod cache_test;

use super::client::{ApiType, CmdbClient, CmdbError};
use async_trait::async_trait;
use bd_log::warn_every;
use bd_server_stats::stats::Scope;
use dashmap::DashMap;
use prometheus::{IntCounter, IntCounterVec};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::ext::NumericalDuration;
use tokio::time::Instant;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

//
// keys
//

pub mod keys {
  pub const POD_WORKLOAD_SNAPSHOT: &str = "pod_workload_rel_map";

  #[must_use]
  pub fn data_id(obj_id: &str) -> String {
    format!("bk_data_id_{obj_id}")
  }

  #[must_use]
  pub fn inst_id(obj_id: &str, inst_name: &str) -> String {
    format!("{obj_id}@@{inst_name}")
  }

  // Kept apart from inst_id keys so a numeric instance name can never collide with a biz lookup.
  #[must_use]
  pub fn biz_id(obj_id: &str, inst_id: i64) -> String {
    format!("{obj_id}_biz@@{inst_id}")
  }

  #[must_use]
  pub fn workload_id(pod_id: i64) -> String {
    format!("workload@@{pod_id}")
  }

  #[must_use]
  pub fn inst_name_snapshot(obj_id: &str) -> String {
    format!("{obj_id}_inst_name_id")
  }

  #[must_use]
  pub fn set_biz_snapshot(obj_id: &str) -> String {
    format!("{obj_id}_set_id_biz_id")
  }
}

//
// CacheValue
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheValue {
  DataId(String),
  Id(i64),
  // inst_id -> id, used for set to business and pod to workload tables.
  IdMap(Arc<HashMap<i64, i64>>),
  // inst_name -> inst_id.
  NameMap(Arc<HashMap<String, i64>>),
}

impl CacheValue {
  fn as_id(&self) -> Option<i64> {
    match self {
      Self::Id(id) => Some(*id),
      _ => None,
    }
  }

  fn as_data_id(&self) -> Option<&str> {
    match self {
      Self::DataId(data_id) => Some(data_id),
      _ => None,
    }
  }

  pub(super) fn as_id_map(&self) -> Option<&HashMap<i64, i64>> {
    match self {
      Self::IdMap(map) => Some(map),
      _ => None,
    }
  }

  fn as_name_map(&self) -> Option<&HashMap<String, i64>> {
    match self {
      Self::NameMap(map) => Some(map),
      _ => None,
    }
  }
}

//
// TtlStore
//

struct CacheEntry {
  value: CacheValue,
  expires_at: Option<Instant>,
}

impl CacheEntry {
  fn is_live(&self, now: Instant) -> bool {
    self.expires_at.is_none_or(|expires_at| expires_at > now)
  }
}

// Concurrent key/value store with per entry expiry. Expired entries are removed when they are
// next read, there is no background sweep. Snapshot entries never expire and are only replaced
// by the next successful snapshot.
pub struct TtlStore {
  entries: DashMap<String, CacheEntry>,
  ttl: Duration,
}

impl TtlStore {
  #[must_use]
  pub fn new(ttl: Duration) -> Self {
    Self {
      entries: DashMap::default(),
      ttl,
    }
  }

  #[must_use]
  pub fn get(&self, key: &str) -> Option<CacheValue> {
    let now = Instant::now();
    {
      let entry = self.entries.get(key)?;
      if entry.is_live(now) {
        return Some(entry.value.clone());
      }
    }
    self.entries.remove_if(key, |_, entry| !entry.is_live(now));
    None
  }

  pub fn insert(&self, key: String, value: CacheValue) {
    self.entries.insert(
      key,
      CacheEntry {
        value,
        expires_at: Some(Instant::now() + self.ttl),
      },
    );
  }

  pub fn insert_snapshot(&self, key: String, value: CacheValue) {
    self.entries.insert(
      key,
      CacheEntry {
        value,
        expires_at: None,
      },
    );
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

//
// Resolve
//

// Identifier resolution used by enrichment. Zero and None mean unresolved.
#[async_trait]
pub trait Resolve: Send + Sync {
  async fn resolve_data_id(&self, obj_id: &str) -> Option<String>;

  async fn resolve_inst_id(&self, obj_id: &str, inst_name: &str) -> i64;

  async fn resolve_biz_id(&self, obj_id: &str, inst_id: i64) -> i64;

  async fn resolve_workload_id(&self, pod_id: i64) -> i64;

  // Look up the business of an instance in the bulk set table of obj_id. Returns None when no
  // snapshot has been loaded yet and Some(0) when the instance is not in the snapshot.
  fn set_biz_id(&self, obj_id: &str, inst_id: i64) -> Option<i64>;
}

//
// Stats
//

struct Stats {
  get_info_fail: IntCounterVec,
  get_data_id_fail: IntCounter,
  get_obj_data_id_fail: IntCounterVec,
}

impl Stats {
  fn new(scope: &Scope) -> Self {
    Self {
      get_info_fail: scope.counter_vec("cmdb_get_info_fail", &["bk_obj_id", "api_type"]),
      get_data_id_fail: scope.counter("weops_get_data_id_fail"),
      get_obj_data_id_fail: scope.counter_vec("weops_get_obj_data_id_fail", &["bk_obj_id"]),
    }
  }
}

//
// CmdbCache
//

pub struct CmdbCache {
  store: TtlStore,
  client: Arc<dyn CmdbClient>,
  stats: Stats,
}

impl CmdbCache {
  pub fn new(client: Arc<dyn CmdbClient>, ttl: Duration, scope: &Scope) -> Self {
    Self {
      store: TtlStore::new(ttl),
      client,
      stats: Stats::new(scope),
    }
  }

  #[must_use]
  pub const fn store(&self) -> &TtlStore {
    &self.store
  }

  pub(crate) fn client(&self) -> &dyn CmdbClient {
    self.client.as_ref()
  }

  pub(crate) fn record_failure(&self, obj_id: &str, api: ApiType, error: Option<&CmdbError>) {
    self
      .stats
      .get_info_fail
      .with_label_values(&[obj_id, api.as_str()])
      .inc();
    match error {
      Some(e) => warn_every!(
        1.minutes(),
        "cmdb {} lookup failed for {}: {}",
        api.as_str(),
        obj_id,
        e
      ),
      None => log::debug!("cmdb {} lookup for {obj_id} returned nothing", api.as_str()),
    }
  }

  // Serve an id from the cache or perform the lookup and remember the result, including zero, for
  // one TTL. The lookup is only created on a miss.
  async fn lazy_id<F, Fut>(&self, key: String, obj_id: &str, api: ApiType, lookup: F) -> i64
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = super::client::Result<i64>>,
  {
    if let Some(id) = self.store.get(&key).and_then(|value| value.as_id()) {
      log::trace!("cache hit for {key}");
      return id;
    }

    let id = match lookup().await {
      Ok(id) => {
        if id == 0 {
          self.record_failure(obj_id, api, None);
        }
        id
      },
      Err(e) => {
        self.record_failure(obj_id, api, Some(&e));
        0
      },
    };
    self.store.insert(key, CacheValue::Id(id));
    id
  }
}

#[async_trait]
impl Resolve for CmdbCache {
  async fn resolve_data_id(&self, obj_id: &str) -> Option<String> {
    let key = keys::data_id(obj_id);
    if let Some(value) = self.store.get(&key) {
      return value
        .as_data_id()
        .filter(|data_id| !data_id.is_empty())
        .map(ToString::to_string);
    }

    let data_id = match self.client.get_data_id(obj_id).await {
      Ok(data_id) => data_id,
      Err(e) => {
        warn_every!(1.minutes(), "cmdb data id lookup failed for {}: {}", obj_id, e);
        String::new()
      },
    };
    if data_id.is_empty() {
      self.stats.get_data_id_fail.inc();
      self
        .stats
        .get_obj_data_id_fail
        .with_label_values(&[obj_id])
        .inc();
      self
        .stats
        .get_info_fail
        .with_label_values(&[obj_id, ApiType::DataId.as_str()])
        .inc();
    }
    self.store.insert(key, CacheValue::DataId(data_id.clone()));
    Some(data_id).filter(|data_id| !data_id.is_empty())
  }

  async fn resolve_inst_id(&self, obj_id: &str, inst_name: &str) -> i64 {
    let key = keys::inst_id(obj_id, inst_name);
    if let Some(id) = self.store.get(&key).and_then(|value| value.as_id()) {
      return id;
    }

    // Instances created after the last bulk refresh fall through to a single lookup.
    if let Some(id) = self
      .store
      .get(&keys::inst_name_snapshot(obj_id))
      .and_then(|value| value.as_name_map().and_then(|map| map.get(inst_name).copied()))
    {
      return id;
    }

    self
      .lazy_id(key, obj_id, ApiType::InstId, || {
        self.client.get_inst_id(obj_id, inst_name)
      })
      .await
  }

  async fn resolve_biz_id(&self, obj_id: &str, inst_id: i64) -> i64 {
    self
      .lazy_id(keys::biz_id(obj_id, inst_id), obj_id, ApiType::BizId, || {
        self.client.get_biz_id(obj_id, inst_id)
      })
      .await
  }

  async fn resolve_workload_id(&self, pod_id: i64) -> i64 {
    if let Some(value) = self.store.get(keys::POD_WORKLOAD_SNAPSHOT)
      && let Some(map) = value.as_id_map()
    {
      return map.get(&pod_id).copied().unwrap_or(0);
    }

    self
      .lazy_id(
        keys::workload_id(pod_id),
        super::K8S_POD,
        ApiType::WorkloadId,
        || self.client.get_workload_id(pod_id),
      )
      .await
  }

  fn set_biz_id(&self, obj_id: &str, inst_id: i64) -> Option<i64> {
    let value = self.store.get(&keys::set_biz_snapshot(obj_id))?;
    let map = value.as_id_map()?;
    Some(map.get(&inst_id).copied().unwrap_or(0))
  }
}
