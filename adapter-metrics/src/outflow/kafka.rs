// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./kafka_test.rs"]
mod kafka_test;

use super::{Producer, PublishError};
use anyhow::{Context, bail};
use rdkafka::ClientConfig;
use rdkafka::producer::{BaseRecord, DefaultProducerContext, Producer as _, ThreadedProducer};
use std::time::Duration;

//
// KafkaConfig
//

#[derive(Clone, Debug)]
pub struct KafkaConfig {
  pub brokers: String,
  pub compression: String,
  pub batch_num_messages: u32,
  pub security_protocol: Option<String>,
  pub ssl_client_cert_file: Option<String>,
  pub ssl_client_key_file: Option<String>,
  pub ssl_client_key_pass: Option<String>,
  pub ssl_ca_cert_file: Option<String>,
  pub sasl_mechanism: Option<String>,
  pub sasl_username: Option<String>,
  pub sasl_password: Option<String>,
}

impl Default for KafkaConfig {
  fn default() -> Self {
    Self {
      brokers: "kafka:9092".to_string(),
      compression: "none".to_string(),
      batch_num_messages: 10_000,
      security_protocol: None,
      ssl_client_cert_file: None,
      ssl_client_key_file: None,
      ssl_client_key_pass: None,
      ssl_ca_cert_file: None,
      sasl_mechanism: None,
      sasl_username: None,
      sasl_password: None,
    }
  }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
  value.map(String::as_str).filter(|value| !value.is_empty())
}

// Build the librdkafka client config. SSL settings are applied when the certificate, key and CA
// files are all given, SASL settings when mechanism, username and password are all given. Each
// requires a compatible security protocol.
pub fn client_config(config: &KafkaConfig) -> anyhow::Result<ClientConfig> {
  let mut client_config = ClientConfig::new();
  client_config
    .set("bootstrap.servers", &config.brokers)
    .set("compression.codec", &config.compression)
    .set("batch.num.messages", config.batch_num_messages.to_string());

  let mut security_protocol =
    non_empty(config.security_protocol.as_ref()).map(str::to_ascii_lowercase);

  if let (Some(cert), Some(key), Some(ca)) = (
    non_empty(config.ssl_client_cert_file.as_ref()),
    non_empty(config.ssl_client_key_file.as_ref()),
    non_empty(config.ssl_ca_cert_file.as_ref()),
  ) {
    let protocol = security_protocol.get_or_insert_with(|| "ssl".to_string());
    if protocol != "ssl" && protocol != "sasl_ssl" {
      bail!("kafka security protocol '{protocol}' is not ssl based but ssl config is provided");
    }
    client_config
      .set("security.protocol", protocol.as_str())
      .set("ssl.ca.location", ca)
      .set("ssl.certificate.location", cert)
      .set("ssl.key.location", key);
    if let Some(pass) = non_empty(config.ssl_client_key_pass.as_ref()) {
      client_config.set("ssl.key.password", pass);
    }
  }

  if let (Some(mechanism), Some(username), Some(password)) = (
    non_empty(config.sasl_mechanism.as_ref()),
    non_empty(config.sasl_username.as_ref()),
    non_empty(config.sasl_password.as_ref()),
  ) {
    let protocol = security_protocol.as_deref().unwrap_or_default();
    if protocol != "sasl_ssl" && protocol != "sasl_plaintext" {
      bail!("kafka security protocol '{protocol}' is not sasl based but sasl config is provided");
    }
    client_config
      .set("security.protocol", protocol)
      .set("sasl.mechanism", mechanism)
      .set("sasl.username", username)
      .set("sasl.password", password);
  }

  Ok(client_config)
}

//
// KafkaProducer
//

pub struct KafkaProducer {
  producer: ThreadedProducer<DefaultProducerContext>,
}

impl KafkaProducer {
  pub fn new(config: &KafkaConfig) -> anyhow::Result<Self> {
    let producer = client_config(config)?
      .create()
      .context("couldn't create kafka producer")?;
    log::info!("created kafka producer for brokers {}", config.brokers);
    Ok(Self { producer })
  }
}

impl Producer for KafkaProducer {
  fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
    self
      .producer
      .send(BaseRecord::<(), [u8]>::to(topic).payload(payload))
      .map_err(|(e, _)| PublishError::Kafka(e))
  }

  fn flush(&self, timeout: Duration) {
    if let Err(e) = self.producer.flush(timeout) {
      log::warn!("couldn't flush kafka producer: {e}");
    }
  }
}
