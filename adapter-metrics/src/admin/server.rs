// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./server_test.rs"]
mod server_test;

use adapter_common::bind_resolver::BindResolver;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use bd_log::SwapLogger;
use bd_server_stats::stats::Collector;
use bd_shutdown::ComponentShutdown;
use serde::Deserialize;
use std::sync::Arc;

const ENDPOINTS: &[(&str, &str)] = &[
  ("/healthcheck", "liveness"),
  ("/metrics", "adapter counters in prometheus text format"),
  ("/log_filter?filter=RUST_LOG", "POST to replace the log filter"),
];

#[derive(Deserialize)]
struct LogFilterParams {
  filter: Option<String>,
}

async fn index() -> String {
  let mut body = "weops kafka adapter admin server\n".to_string();
  for (path, description) in ENDPOINTS {
    body.push_str(&format!("\n{path}: {description}"));
  }
  body
}

async fn healthcheck() -> &'static str {
  "OK"
}

async fn prometheus_stats(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
  (
    [(CONTENT_TYPE, prometheus::TEXT_FORMAT)],
    state.collector.prometheus_output(),
  )
}

async fn swap_log_filter(Query(params): Query<LogFilterParams>) -> String {
  let Some(filter) = params.filter else {
    return "usage: /log_filter?filter=RUST_LOG".to_string();
  };
  match SwapLogger::swap(&filter) {
    Ok(()) => {
      log::info!("log filter is now: {filter}");
      "OK".to_string()
    },
    Err(e) => {
      log::warn!("rejected log filter '{filter}': {e}");
      format!("error: {e}")
    },
  }
}

//
// AdminState
//

// Operator endpoints served on their own listener, apart from remote write traffic.
pub struct AdminState {
  collector: Collector,
}

impl AdminState {
  #[must_use]
  pub fn new(collector: Collector) -> Arc<Self> {
    Arc::new(Self { collector })
  }

  fn router(self: Arc<Self>) -> Router {
    Router::new()
      .route("/", get(index))
      .route("/healthcheck", get(healthcheck))
      .route("/metrics", get(prometheus_stats))
      .route("/log_filter", post(swap_log_filter))
      .with_state(self)
  }

  pub async fn spawn_server(
    self: Arc<Self>,
    bind_resolver: Arc<dyn BindResolver>,
    bind: &str,
    mut shutdown: ComponentShutdown,
  ) -> anyhow::Result<()> {
    let socket = bind_resolver.resolve_tcp(bind).await?;
    let local_addr = socket.local_addr();
    log::info!("admin server listening on {local_addr}");
    axum::serve(socket.listen()?, self.router())
      .with_graceful_shutdown(async move { shutdown.cancelled().await })
      .await?;
    log::info!("admin server on {local_addr} stopped");
    Ok(())
  }
}
