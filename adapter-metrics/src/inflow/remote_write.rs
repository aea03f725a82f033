// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./remote_write_test.rs"]
mod remote_write_test;

use crate::outflow::{Producer, PublishError};
use crate::pipeline::{Processor, TopicBatches};
use adapter_common::bind_resolver::BoundTcpSocket;
use axum::Router;
use axum::body::HttpBody as _;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bd_log::warn_every;
use bd_proto::protos::prometheus::prompb::remote::WriteRequest;
use bd_server_stats::stats::Scope;
use bd_shutdown::ComponentShutdown;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::BodyExt;
use prometheus::IntCounter;
use std::sync::Arc;
use time::ext::NumericalDuration;

const MAX_ALLOWED_REQUEST_SIZE: u64 = 20_000_000;

//
// Stats
//

struct Stats {
  requests_total: IntCounter,
  requests_4xx: IntCounter,
  requests_5xx: IntCounter,
  objects_written: IntCounter,
  objects_failed: IntCounter,
}

impl Stats {
  fn new(scope: &Scope) -> Self {
    Self {
      requests_total: scope.counter("http_requests_total"),
      requests_4xx: scope.counter("requests_4xx"),
      requests_5xx: scope.counter("requests_5xx"),
      objects_written: scope.counter("objects_written_total"),
      objects_failed: scope.counter("objects_failed_total"),
    }
  }
}

//
// DecodeError
//

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
  #[error("protobuf decode error: {0}")]
  ProtobufDecode(#[from] protobuf::Error),
  #[error("snappy decode error: {0}")]
  SnappyDecode(#[from] snap::Error),
}

pub fn decode_body_into_write_request(body: &[u8]) -> Result<WriteRequest, DecodeError> {
  let decompressed = snap::raw::Decoder::new().decompress_vec(body)?;
  log::trace!(
    "decompressed WriteRequest from {} bytes to {} bytes",
    body.len(),
    decompressed.len()
  );
  Ok(WriteRequest::parse_from_tokio_bytes(&Bytes::from(
    decompressed,
  ))?)
}

fn make_error_response(status: StatusCode, message: String) -> Response {
  (status, message).into_response()
}

//
// RemoteWriteServer
//

// Accepts snappy compressed remote write requests, runs them through the processor and publishes
// the resulting payloads. The first publish failure aborts the rest of the request, messages that
// were already published are not rolled back.
pub struct RemoteWriteServer {
  processor: Arc<Processor>,
  producer: Arc<dyn Producer>,
  stats: Stats,
}

impl RemoteWriteServer {
  pub fn new(processor: Arc<Processor>, producer: Arc<dyn Producer>, scope: &Scope) -> Self {
    Self {
      processor,
      producer,
      stats: Stats::new(scope),
    }
  }

  pub fn router(self: Arc<Self>) -> Router {
    Router::new()
      .route("/healthcheck", get(|| async { "OK" }))
      .route("/receive", post(receive_handler))
      .with_state(self)
  }

  pub async fn serve(
    self: Arc<Self>,
    socket: BoundTcpSocket,
    mut shutdown: ComponentShutdown,
  ) -> anyhow::Result<()> {
    let local_addr = socket.local_addr();
    let listener = socket.listen()?;
    log::info!("remote write server starting at {local_addr}");
    axum::serve(listener, self.router().into_make_service())
      .with_graceful_shutdown(async move { shutdown.cancelled().await })
      .await?;
    log::info!("terminated remote write server running at {local_addr}");
    Ok(())
  }

  fn publish(&self, batches: &TopicBatches) -> Result<(), PublishError> {
    for (topic, payloads) in batches {
      for payload in payloads {
        self.stats.objects_written.inc();
        if let Err(e) = self.producer.publish(topic, payload) {
          self.stats.objects_failed.inc();
          log::error!("couldn't produce message in topic {topic}: {e}");
          return Err(e);
        }
      }
    }
    Ok(())
  }
}

async fn receive_handler(State(state): State<Arc<RemoteWriteServer>>, req: Request) -> Response {
  state.stats.requests_total.inc();

  let content_length = req
    .body()
    .size_hint()
    .upper()
    .unwrap_or(MAX_ALLOWED_REQUEST_SIZE + 1);
  if content_length > MAX_ALLOWED_REQUEST_SIZE {
    state.stats.requests_4xx.inc();
    warn_every!(
      1.minutes(),
      "remote write request body size ({} bytes) exceeds limit ({} bytes)",
      content_length,
      MAX_ALLOWED_REQUEST_SIZE
    );
    return make_error_response(
      StatusCode::PAYLOAD_TOO_LARGE,
      format!("body size ({content_length} bytes) exceeds limit ({MAX_ALLOWED_REQUEST_SIZE} bytes)"),
    );
  }

  let body = match req.into_body().collect().await {
    Ok(body) => body.to_bytes(),
    Err(e) => {
      state.stats.requests_5xx.inc();
      log::error!("couldn't read body: {e}");
      return make_error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("couldn't read body: {e}"),
      );
    },
  };

  let write_request = match decode_body_into_write_request(&body) {
    Ok(write_request) => write_request,
    Err(e) => {
      state.stats.requests_4xx.inc();
      warn_every!(
        1.minutes(),
        "remote write request body failed to decode: {}",
        e
      );
      return make_error_response(
        StatusCode::BAD_REQUEST,
        format!("body failed to decode: {e}"),
      );
    },
  };

  let batches = state.processor.process(&write_request).await;
  match state.publish(&batches) {
    Ok(()) => StatusCode::OK.into_response(),
    Err(e) => {
      state.stats.requests_5xx.inc();
      make_error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("couldn't publish: {e}"),
      )
    },
  }
}
