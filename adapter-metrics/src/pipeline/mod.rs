// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod classifier;
pub mod dimensions;
pub mod enrich;
pub mod serializer;
pub mod template;
pub mod topic;

use self::classifier::MetricsCatalog;
use self::dimensions::LabelSet;
use self::enrich::Enricher;
use self::serializer::{MetricRecord, PayloadEncoder, RecordShape};
use self::topic::TopicRouter;
use crate::cmdb::cache::Resolve;
use crate::filters::match_rule::MatchRules;
use bd_log::warn_every;
use bd_proto::protos::prometheus::prompb::remote::WriteRequest;
use bd_server_stats::stats::Scope;
use bytes::Bytes;
use prometheus::{IntCounter, IntCounterVec};
use std::collections::HashMap;
use std::sync::Arc;
use time::ext::NumericalDuration;

// Protocol label values set by the collectors.
pub mod protocol {
  pub const LABEL: &str = "protocol";
  pub const KUBERNETES: &str = "kubernetes";
  pub const SNMP: &str = "snmp";
  pub const IPMI: &str = "ipmi";
  pub const CLOUD: &str = "cloud";
  pub const VECTOR: &str = "vector";

  pub const SOURCE_LABEL: &str = "source";
  pub const AUTOMATE: &str = "automate";
}

// Serialized payloads keyed by destination topic.
pub type TopicBatches = HashMap<String, Vec<Bytes>>;

//
// Stats
//

struct Stats {
  batches: IntCounter,
  missing_protocol: IntCounter,
  inputed: IntCounterVec,
  protocol_filtered: IntCounterVec,
  dropped: IntCounterVec,
  topic_dropped: IntCounterVec,
  objects_filtered: IntCounter,
  serialized: IntCounter,
  serialized_failed: IntCounter,
  topic_serialized: IntCounterVec,
}

impl Stats {
  fn new(scope: &Scope) -> Self {
    Self {
      batches: scope.counter("incoming_prometheus_batches_total"),
      missing_protocol: scope.counter("weops_metrics_filtered_total"),
      inputed: scope.counter_vec("weops_metrics_inputed_total", &["protocol"]),
      protocol_filtered: scope.counter_vec("weops_protocol_metrics_filtered_total", &["protocol"]),
      dropped: scope.counter_vec("weops_metrics_dropped_total", &["protocol", "metric_name"]),
      topic_dropped: scope.counter_vec("weops_metrics_topic_dropped_total", &["protocol"]),
      objects_filtered: scope.counter("objects_filtered_total"),
      serialized: scope.counter("serialized_total"),
      serialized_failed: scope.counter("serialized_failed_total"),
      topic_serialized: scope.counter_vec("weops_metrics_topic_serialized_total", &["topic"]),
    }
  }
}

fn is_admitted(protocol: &str, classified: bool, labels: &LabelSet) -> bool {
  match protocol {
    protocol::KUBERNETES => classified,
    protocol::SNMP | protocol::IPMI | protocol::CLOUD | protocol::VECTOR => true,
    _ => labels
      .get(protocol::SOURCE_LABEL)
      .is_some_and(|source| source == protocol::AUTOMATE),
  }
}

//
// Processor
//

// Turns a decoded write request into serialized payloads per topic. Every series or sample that
// is skipped is counted, processing itself never fails.
pub struct Processor {
  catalog: MetricsCatalog,
  enricher: Enricher,
  router: TopicRouter,
  match_rules: MatchRules,
  encoder: PayloadEncoder,
  stats: Stats,
}

impl Processor {
  pub fn new(
    catalog: MetricsCatalog,
    resolver: Arc<dyn Resolve>,
    router: TopicRouter,
    match_rules: MatchRules,
    encoder: PayloadEncoder,
    scope: &Scope,
  ) -> Self {
    Self {
      catalog,
      enricher: Enricher::new(resolver),
      router,
      match_rules,
      encoder,
      stats: Stats::new(scope),
    }
  }

  pub async fn process(&self, write_request: &WriteRequest) -> TopicBatches {
    self.stats.batches.inc();
    let mut batches = TopicBatches::new();

    for series in &write_request.timeseries {
      let mut labels: LabelSet = series
        .labels
        .iter()
        .map(|label| (label.name.to_string(), label.value.to_string()))
        .collect();

      let Some(protocol) = labels.get(protocol::LABEL).cloned() else {
        log::debug!("dropping series without protocol: {labels:?}");
        self.stats.missing_protocol.inc();
        continue;
      };
      self.stats.inputed.with_label_values(&[&protocol]).inc();

      let classification = if protocol == protocol::KUBERNETES {
        self.catalog.classify(&mut labels)
      } else {
        None
      };
      if !is_admitted(&protocol, classification.is_some(), &labels) {
        log::debug!("series not admitted: {labels:?}");
        self
          .stats
          .protocol_filtered
          .with_label_values(&[&protocol])
          .inc();
        continue;
      }

      let raw_name = labels.get("__name__").cloned().unwrap_or_default();
      let mut dimensions = match self.enricher.enrich(&labels).await {
        Ok(dimensions) => dimensions,
        Err(reason) => {
          log::debug!("dropping series ({reason:?}): {labels:?}");
          self
            .stats
            .dropped
            .with_label_values(&[&protocol, &raw_name])
            .inc();
          continue;
        },
      };

      let Some(topic) = self.router.route(&mut dimensions, &labels) else {
        log::debug!("no topic for series: {labels:?}");
        self
          .stats
          .topic_dropped
          .with_label_values(&[&protocol])
          .inc();
        continue;
      };

      dimensions.remove(protocol::LABEL);
      let metric_name = classification.map_or_else(
        || raw_name.clone(),
        |classification| classification.canonical_name,
      );
      let shape = RecordShape::for_protocol(&protocol);
      let admitted = self.match_rules.admits(&raw_name, &labels);

      for sample in &series.samples {
        if !admitted {
          self.stats.objects_filtered.inc();
          continue;
        }

        let record = MetricRecord {
          name: metric_name.clone(),
          dimensions: dimensions.clone(),
          timestamp_ms: sample.timestamp,
          value: sample.value,
        };
        match shape
          .format(&protocol, record)
          .and_then(|record| self.encoder.encode(record))
        {
          Ok(payload) => {
            self.stats.serialized.inc();
            self
              .stats
              .topic_serialized
              .with_label_values(&[&topic])
              .inc();
            batches.entry(topic.clone()).or_default().push(payload);
          },
          Err(e) => {
            warn_every!(1.minutes(), "couldn't serialize {}: {}", metric_name, e);
            self.stats.serialized_failed.inc();
          },
        }
      }
    }

    batches
  }
}
