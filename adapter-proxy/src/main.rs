// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use adapter_common::bind_resolver::RealBindResolver;
use adapter_common::global_initialize;
use adapter_metrics::cmdb::client::HttpCmdbClient;
use adapter_metrics::outflow::kafka::KafkaProducer;
use adapter_proxy::config::Options;
use adapter_proxy::{Collaborators, ServerHooks, run_server};
use anyhow::Context;
use bd_server_stats::stats::Collector;
use clap::Parser;
use log::info;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tikv_jemallocator::Jemalloc;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::Duration;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

struct NullHooks {}

#[async_trait::async_trait]
impl ServerHooks for NullHooks {
  async fn server_started(&self, _collector: Collector) {}
}

async fn wait_for_signal() {
  let (Ok(mut sigint), Ok(mut sigterm)) = (
    signal(SignalKind::interrupt()),
    signal(SignalKind::terminate()),
  ) else {
    log::error!("couldn't install signal handlers, waiting for ctrl+c");
    let _ignored = tokio::signal::ctrl_c().await;
    return;
  };
  select! {
    _ = sigint.recv() => info!("received sigint"),
    _ = sigterm.recv() => info!("received sigterm"),
  }
}

fn main() -> anyhow::Result<()> {
  global_initialize();
  let options = Options::parse();
  info!(
    "weops-kafka-adapter {} loading",
    env!("CARGO_PKG_VERSION")
  );

  let num_threads = std::thread::available_parallelism().unwrap_or_else(|_| {
    log::warn!("could not determine number of CPUs. Defaulting to 1");
    NonZeroUsize::MIN
  });
  log::info!("running server with {num_threads} workers");
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .worker_threads(num_threads.into())
    .enable_all()
    .build()?;

  let cmdb_client = HttpCmdbClient::new(options.cmdb_base_url(), options.cmdb_timeout())
    .context("couldn't create cmdb client")?;
  let producer = KafkaProducer::new(&options.kafka_config())?;

  let config_check = options.config_check;
  let shutdown_delay = Duration::from_secs(options.shutdown_delay.into());
  runtime.block_on(async {
    run_server(
      options,
      config_check,
      wait_for_signal,
      shutdown_delay,
      NullHooks {},
      Collaborators {
        bind_resolver: Arc::new(RealBindResolver {}),
        cmdb_client: Arc::new(cmdb_client),
        producer: Arc::new(producer),
      },
    )
    .await
  })
}
