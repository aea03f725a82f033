// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{KafkaConfig, KafkaProducer, client_config};
use pretty_assertions::assert_eq;

fn ssl_config() -> KafkaConfig {
  KafkaConfig {
    ssl_client_cert_file: Some("/certs/client.pem".to_string()),
    ssl_client_key_file: Some("/certs/client.key".to_string()),
    ssl_ca_cert_file: Some("/certs/ca.pem".to_string()),
    ..Default::default()
  }
}

#[test]
fn plain_config() {
  let config = client_config(&KafkaConfig {
    brokers: "k1:9092,k2:9092".to_string(),
    compression: "snappy".to_string(),
    batch_num_messages: 500,
    ..Default::default()
  })
  .unwrap();

  assert_eq!(Some("k1:9092,k2:9092"), config.get("bootstrap.servers"));
  assert_eq!(Some("snappy"), config.get("compression.codec"));
  assert_eq!(Some("500"), config.get("batch.num.messages"));
  assert_eq!(None, config.get("security.protocol"));
}

#[test]
fn ssl() {
  let config = client_config(&ssl_config()).unwrap();
  assert_eq!(Some("ssl"), config.get("security.protocol"));
  assert_eq!(Some("/certs/ca.pem"), config.get("ssl.ca.location"));
  assert_eq!(Some("/certs/client.pem"), config.get("ssl.certificate.location"));
  assert_eq!(Some("/certs/client.key"), config.get("ssl.key.location"));
  assert_eq!(None, config.get("ssl.key.password"));

  // Partial ssl settings are ignored.
  let config = client_config(&KafkaConfig {
    ssl_ca_cert_file: None,
    ..ssl_config()
  })
  .unwrap();
  assert_eq!(None, config.get("ssl.certificate.location"));

  client_config(&KafkaConfig {
    security_protocol: Some("SASL_PLAINTEXT".to_string()),
    ..ssl_config()
  })
  .unwrap_err();
}

#[test]
fn sasl() {
  let sasl = KafkaConfig {
    security_protocol: Some("SASL_SSL".to_string()),
    sasl_mechanism: Some("PLAIN".to_string()),
    sasl_username: Some("user".to_string()),
    sasl_password: Some("secret".to_string()),
    ..ssl_config()
  };
  let config = client_config(&sasl).unwrap();
  assert_eq!(Some("sasl_ssl"), config.get("security.protocol"));
  assert_eq!(Some("PLAIN"), config.get("sasl.mechanism"));
  assert_eq!(Some("user"), config.get("sasl.username"));
  assert_eq!(Some("/certs/ca.pem"), config.get("ssl.ca.location"));

  client_config(&KafkaConfig {
    security_protocol: None,
    ..sasl
  })
  .unwrap_err();
}

#[test]
fn producer_creation() {
  KafkaProducer::new(&KafkaConfig {
    brokers: "127.0.0.1:1".to_string(),
    ..Default::default()
  })
  .unwrap();

  assert!(
    KafkaProducer::new(&KafkaConfig {
      compression: "bogus".to_string(),
      ..Default::default()
    })
    .is_err()
  );
}
