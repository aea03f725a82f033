// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod config;

use adapter_common::bind_resolver::BindResolver;
use adapter_metrics::admin::server::AdminState;
use adapter_metrics::cmdb::cache::CmdbCache;
use adapter_metrics::cmdb::client::CmdbClient;
use adapter_metrics::cmdb::refresh::RefreshJob;
use adapter_metrics::inflow::remote_write::RemoteWriteServer;
use adapter_metrics::outflow::Producer;
use adapter_metrics::pipeline::Processor;
use anyhow::Context;
use bd_server_stats::stats::Collector;
use bd_shutdown::ComponentShutdownTrigger;
use config::Options;
use log::info;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  use adapter_common::global_initialize;

  global_initialize();
}

const PRODUCER_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

//
// ServerHooks
//

#[async_trait::async_trait]
pub trait ServerHooks {
  async fn server_started(&self, collector: Collector);
}

//
// Collaborators
//

// The external systems the server talks to.
pub struct Collaborators {
  pub bind_resolver: Arc<dyn BindResolver>,
  pub cmdb_client: Arc<dyn CmdbClient>,
  pub producer: Arc<dyn Producer>,
}

pub async fn run_server<ShutdownFuture: Future<Output = ()>>(
  options: Options,
  config_check_only: bool,
  shutdown: impl FnOnce() -> ShutdownFuture,
  shutdown_delay: Duration,
  hooks: impl ServerHooks,
  collaborators: Collaborators,
) -> anyhow::Result<()> {
  let collector = Collector::default();
  // Counters are exported under their bare names.
  let scope = collector.scope("");

  let match_rules = options.load_match_rules()?;
  let router = options.load_topic_router()?;
  let encoder = options.load_encoder()?;
  let catalog = options.load_catalog();

  if config_check_only {
    info!("--config-check-and-exit set, exiting");
    return Ok(());
  }

  let shutdown_trigger = ComponentShutdownTrigger::default();

  let cache = Arc::new(CmdbCache::new(
    collaborators.cmdb_client,
    options.cache_ttl(),
    &scope,
  ));
  let refresh_interval: time::Duration = options
    .cache_ttl()
    .try_into()
    .context("invalid cache expiration")?;
  let refresh_job = Arc::new(RefreshJob::new(cache.clone(), &scope));
  tokio::spawn(refresh_job.run(refresh_interval, shutdown_trigger.make_shutdown()));
  info!("spawned cmdb refresh job every {refresh_interval}");

  let processor = Arc::new(Processor::new(
    catalog,
    cache,
    router,
    match_rules,
    encoder,
    &scope,
  ));
  let remote_write_server = Arc::new(RemoteWriteServer::new(
    processor,
    collaborators.producer.clone(),
    &scope,
  ));
  let socket = collaborators
    .bind_resolver
    .resolve_tcp(&options.listen)
    .await
    .with_context(|| format!("couldn't bind {}", options.listen))?;
  let remote_write_shutdown = shutdown_trigger.make_shutdown();
  tokio::spawn(async move {
    if let Err(e) = remote_write_server
      .serve(socket, remote_write_shutdown)
      .await
    {
      log::error!("remote write server failed: {e}");
    }
  });

  let admin_state = AdminState::new(collector.clone());
  let bind_resolver = collaborators.bind_resolver.clone();
  let admin_listen = options.admin_listen.clone();
  let admin_shutdown = shutdown_trigger.make_shutdown();
  tokio::spawn(async move {
    if let Err(e) = admin_state
      .spawn_server(bind_resolver, &admin_listen, admin_shutdown)
      .await
    {
      log::error!("admin server failed: {e}");
    }
  });

  hooks.server_started(collector).await;

  shutdown().await;

  if !shutdown_delay.is_zero() {
    info!(
      "waiting {:?} before shutting down (--shutdown-delay set)",
      shutdown_delay
    );
    tokio::time::sleep(shutdown_delay).await;
  }
  shutdown_trigger.shutdown().await;
  collaborators.producer.flush(PRODUCER_FLUSH_TIMEOUT);
  info!("runtime terminated");
  Ok(())
}
