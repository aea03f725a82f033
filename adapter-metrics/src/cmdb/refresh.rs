// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./refresh_test.rs"]
mod refresh_test;

use super::cache::{CacheValue, CmdbCache, keys};
use super::client::{ApiType, Association, Result};
use super::{K8S_POD, K8S_WORKLOAD, OBJECT_CATALOG, SET_BIZ_OBJECTS, SET_OBJECT};
use bd_server_stats::stats::Scope;
use bd_shutdown::ComponentShutdown;
use bd_time::TimeDurationExt;
use futures::future::join_all;
use itertools::Itertools;
use parking_lot::Mutex;
use prometheus::{IntCounter, IntCounterVec};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

const DEFAULT_PAGE_SIZE: u64 = 500;

// set id -> biz id, shared by the namespace and cluster tasks of one refresh.
type SetBizMemo = Mutex<HashMap<i64, i64>>;

//
// Stats
//

struct Stats {
  refresh_total: IntCounter,
  refresh_failed: IntCounterVec,
}

impl Stats {
  fn new(scope: &Scope) -> Self {
    Self {
      refresh_total: scope.counter("cmdb_refresh_total"),
      refresh_failed: scope.counter_vec("cmdb_refresh_failed", &["bk_obj_id"]),
    }
  }
}

//
// RefreshJob
//

// Periodically replaces the bulk snapshots in the cache: the name -> id table of every known
// object, the set -> business tables of namespaces and clusters, and the pod -> workload table.
pub struct RefreshJob {
  cache: Arc<CmdbCache>,
  objects: Vec<String>,
  page_size: u64,
  stats: Stats,
}

impl RefreshJob {
  pub fn new(cache: Arc<CmdbCache>, scope: &Scope) -> Self {
    Self::new_with_objects(
      cache,
      OBJECT_CATALOG.iter().map(ToString::to_string).collect(),
      DEFAULT_PAGE_SIZE,
      scope,
    )
  }

  pub fn new_with_objects(
    cache: Arc<CmdbCache>,
    objects: Vec<String>,
    page_size: u64,
    scope: &Scope,
  ) -> Self {
    Self {
      cache,
      objects,
      page_size: page_size.max(1),
      stats: Stats::new(scope),
    }
  }

  pub async fn run(self: Arc<Self>, interval: time::Duration, mut shutdown: ComponentShutdown) {
    let mut ticker = interval.interval(MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        () = shutdown.cancelled() => {
          log::debug!("cmdb refresh job received shutdown signal");
          break;
        },
        _ = ticker.tick() => self.refresh().await,
      }
    }
  }

  // Run one refresh. Every object is refreshed by its own task and all tasks are awaited. A task
  // that fails leaves the previous snapshot of its object in place.
  pub async fn refresh(self: &Arc<Self>) {
    log::debug!("starting cmdb refresh of {} objects", self.objects.len());
    let memo = Arc::new(SetBizMemo::default());
    let mut tasks = JoinSet::new();

    for obj_id in &self.objects {
      let job = self.clone();
      let obj_id = obj_id.clone();
      let memo = memo.clone();
      tasks.spawn(async move {
        let result = job.refresh_object(&obj_id, &memo).await;
        (obj_id, result)
      });
    }

    let job = self.clone();
    tasks.spawn(async move {
      (
        K8S_WORKLOAD.to_string(),
        job.refresh_pod_workloads().await,
      )
    });

    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((_, Ok(()))) => {},
        Ok((obj_id, Err(e))) => {
          log::warn!("cmdb refresh of {obj_id} failed, keeping previous snapshot: {e}");
          self
            .stats
            .refresh_failed
            .with_label_values(&[obj_id.as_str()])
            .inc();
        },
        Err(e) => log::error!("cmdb refresh task failed to complete: {e}"),
      }
    }

    self.stats.refresh_total.inc();
    log::debug!("cmdb refresh complete");
  }

  async fn refresh_object(&self, obj_id: &str, memo: &SetBizMemo) -> Result<()> {
    let instances = self.fetch_instances(obj_id).await?;
    log::debug!("loaded {} {obj_id} instances", instances.len());
    self.cache.store().insert_snapshot(
      keys::inst_name_snapshot(obj_id),
      CacheValue::NameMap(Arc::new(instances)),
    );

    if SET_BIZ_OBJECTS.contains(&obj_id) {
      let associations = self
        .cache
        .client()
        .list_associations(obj_id, SET_OBJECT)
        .await
        .inspect_err(|e| self.cache.record_failure(obj_id, ApiType::SearchAsst, Some(e)))?;
      let set_biz = self.resolve_set_biz(obj_id, &associations, memo).await;
      self.cache.store().insert_snapshot(
        keys::set_biz_snapshot(obj_id),
        CacheValue::IdMap(Arc::new(set_biz)),
      );
    }

    Ok(())
  }

  async fn fetch_instances(&self, obj_id: &str) -> Result<HashMap<String, i64>> {
    let mut instances = HashMap::new();
    let mut start = 0;
    loop {
      let page = self
        .cache
        .client()
        .list_instances(obj_id, start, self.page_size)
        .await
        .inspect_err(|e| self.cache.record_failure(obj_id, ApiType::SearchInst, Some(e)))?;
      let received = page.instances.len() as u64;
      instances.extend(
        page
          .instances
          .into_iter()
          .map(|instance| (instance.bk_inst_name, instance.bk_inst_id)),
      );
      start += received;
      if received == 0 || start >= page.count {
        return Ok(instances);
      }
    }
  }

  // Map every instance associated with a set to the business of that set. Sets already resolved
  // during this refresh are not looked up again.
  async fn resolve_set_biz(
    &self,
    obj_id: &str,
    associations: &[Association],
    memo: &SetBizMemo,
  ) -> HashMap<i64, i64> {
    let set_ids = associations
      .iter()
      .filter(|association| association.bk_asst_obj_id == SET_OBJECT)
      .map(|association| association.bk_asst_inst_id)
      .unique()
      .filter(|set_id| !memo.lock().contains_key(set_id))
      .collect_vec();

    let lookups = set_ids.into_iter().map(|set_id| async move {
      match self.cache.client().get_set_biz_id(set_id).await {
        Ok(biz_id) => {
          memo.lock().insert(set_id, biz_id);
        },
        Err(e) => self
          .cache
          .record_failure(obj_id, ApiType::SearchSet, Some(&e)),
      }
    });
    join_all(lookups).await;

    let previous = self.cache.store().get(&keys::set_biz_snapshot(obj_id));
    let previous = previous.as_ref().and_then(CacheValue::as_id_map);
    let memo = memo.lock();
    associations
      .iter()
      .filter(|association| association.bk_asst_obj_id == SET_OBJECT)
      .filter_map(|association| {
        // A set that failed to resolve keeps the business known from the last refresh.
        memo
          .get(&association.bk_asst_inst_id)
          .or_else(|| previous.and_then(|previous| previous.get(&association.bk_inst_id)))
          .map(|biz_id| (association.bk_inst_id, *biz_id))
      })
      .collect()
  }

  async fn refresh_pod_workloads(&self) -> Result<()> {
    let relations = self
      .cache
      .client()
      .list_associations(K8S_POD, K8S_WORKLOAD)
      .await
      .inspect_err(|e| self.cache.record_failure(K8S_POD, ApiType::SearchAsst, Some(e)))?;
    let pod_workloads: HashMap<i64, i64> = relations
      .into_iter()
      .map(|relation| (relation.bk_inst_id, relation.bk_asst_inst_id))
      .collect();
    log::debug!("loaded {} pod workload relations", pod_workloads.len());
    self.cache.store().insert_snapshot(
      keys::POD_WORKLOAD_SNAPSHOT.to_string(),
      CacheValue::IdMap(Arc::new(pod_workloads)),
    );
    Ok(())
  }
}
