// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use adapter_metrics::cmdb::client::open_api_url;
use adapter_metrics::filters::match_rule::MatchRules;
use adapter_metrics::outflow::kafka::KafkaConfig;
use adapter_metrics::pipeline::classifier::MetricsCatalog;
use adapter_metrics::pipeline::serializer::PayloadEncoder;
use adapter_metrics::pipeline::template::Template;
use adapter_metrics::pipeline::topic::{TopicRouter, TopicStrategy};
use anyhow::Context;
use clap::Parser;
use std::path::Path;
use std::time::Duration;

//
// Options
//

// Every option can also be given through the environment variable named next to it.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Prometheus remote write to kafka adapter")]
pub struct Options {
  #[arg(long, env = "BKAPP_PAAS_HOST", default_value = "http://paas.weops.com")]
  pub paas_host: String,

  #[arg(long, env = "BKAPP_WEOPS_APP_ID", default_value = "weops_saas")]
  pub app_id: String,

  #[arg(long, env = "CMDB_REQUEST_TIMEOUT", default_value_t = 10)]
  pub cmdb_request_timeout: u64,

  // Seconds a resolved CMDB value stays cached. Also the bulk refresh interval.
  #[arg(
    long,
    env = "CACHE_EXPIRATION",
    default_value_t = 300,
    value_parser = clap::value_parser!(u64).range(1 ..)
  )]
  pub cache_expiration: u64,

  #[arg(long, env = "KAFKA_BROKER_LIST", default_value = "kafka:9092")]
  pub kafka_brokers: String,

  // Topic template used for series without a data id when the template strategy is selected.
  #[arg(long, env = "KAFKA_TOPIC", default_value = "metrics")]
  pub kafka_topic: String,

  #[arg(long, env = "TOPIC_STRATEGY", value_enum, default_value_t = TopicStrategy::DataId)]
  pub topic_strategy: TopicStrategy,

  #[arg(long, env = "KAFKA_COMPRESSION", default_value = "none")]
  pub kafka_compression: String,

  #[arg(long, env = "KAFKA_BATCH_NUM_MESSAGES", default_value_t = 10_000)]
  pub kafka_batch_num_messages: u32,

  #[arg(long, env = "KAFKA_SECURITY_PROTOCOL")]
  pub kafka_security_protocol: Option<String>,

  #[arg(long, env = "KAFKA_SSL_CLIENT_CERT_FILE")]
  pub kafka_ssl_client_cert_file: Option<String>,

  #[arg(long, env = "KAFKA_SSL_CLIENT_KEY_FILE")]
  pub kafka_ssl_client_key_file: Option<String>,

  #[arg(long, env = "KAFKA_SSL_CLIENT_KEY_PASS")]
  pub kafka_ssl_client_key_pass: Option<String>,

  #[arg(long, env = "KAFKA_SSL_CA_CERT_FILE")]
  pub kafka_ssl_ca_cert_file: Option<String>,

  #[arg(long, env = "KAFKA_SASL_MECHANISM")]
  pub kafka_sasl_mechanism: Option<String>,

  #[arg(long, env = "KAFKA_SASL_USERNAME")]
  pub kafka_sasl_username: Option<String>,

  #[arg(long, env = "KAFKA_SASL_PASSWORD")]
  pub kafka_sasl_password: Option<String>,

  // YAML list of series selectors, e.g. '["up", "node_load1{job=\"node\"}"]'.
  #[arg(long = "match", env = "MATCH")]
  pub match_rules: Option<String>,

  #[arg(long, env = "METRICS_FILE", default_value = "metrics.yaml")]
  pub metrics_file: String,

  #[arg(long, env = "SERIALIZATION_FORMAT", default_value = "json")]
  pub serialization_format: String,

  #[arg(long, env = "AVRO_SCHEMA_FILE", default_value = "schemas/metric.avsc")]
  pub avro_schema_file: String,

  #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
  pub listen: String,

  #[arg(long, env = "ADMIN_LISTEN", default_value = "0.0.0.0:9986")]
  pub admin_listen: String,

  #[arg(long = "config-check-and-exit")]
  pub config_check: bool,

  #[arg(long = "shutdown-delay", default_value = "0")]
  pub shutdown_delay: u32,
}

impl Options {
  #[must_use]
  pub fn kafka_config(&self) -> KafkaConfig {
    KafkaConfig {
      brokers: self.kafka_brokers.clone(),
      compression: self.kafka_compression.clone(),
      batch_num_messages: self.kafka_batch_num_messages,
      security_protocol: self.kafka_security_protocol.clone(),
      ssl_client_cert_file: self.kafka_ssl_client_cert_file.clone(),
      ssl_client_key_file: self.kafka_ssl_client_key_file.clone(),
      ssl_client_key_pass: self.kafka_ssl_client_key_pass.clone(),
      ssl_ca_cert_file: self.kafka_ssl_ca_cert_file.clone(),
      sasl_mechanism: self.kafka_sasl_mechanism.clone(),
      sasl_username: self.kafka_sasl_username.clone(),
      sasl_password: self.kafka_sasl_password.clone(),
    }
  }

  #[must_use]
  pub const fn cache_ttl(&self) -> Duration {
    Duration::from_secs(self.cache_expiration)
  }

  #[must_use]
  pub const fn cmdb_timeout(&self) -> Duration {
    Duration::from_secs(self.cmdb_request_timeout)
  }

  #[must_use]
  pub fn cmdb_base_url(&self) -> String {
    open_api_url(&self.paas_host, &self.app_id)
  }

  pub fn load_match_rules(&self) -> anyhow::Result<MatchRules> {
    let Some(yaml) = &self.match_rules else {
      return Ok(MatchRules::default());
    };
    let rules = MatchRules::from_yaml(yaml).context("invalid MATCH rules")?;
    log::info!("loaded match rules for {} metric names", rules.len());
    Ok(rules)
  }

  pub fn load_topic_router(&self) -> anyhow::Result<TopicRouter> {
    let template = Template::parse(&self.kafka_topic)
      .with_context(|| format!("invalid kafka topic template '{}'", self.kafka_topic))?;
    Ok(TopicRouter::new(self.topic_strategy, template))
  }

  pub fn load_encoder(&self) -> anyhow::Result<PayloadEncoder> {
    PayloadEncoder::from_format(
      &self.serialization_format,
      Path::new(&self.avro_schema_file),
    )
  }

  #[must_use]
  pub fn load_catalog(&self) -> MetricsCatalog {
    MetricsCatalog::load(Path::new(&self.metrics_file))
  }
}
