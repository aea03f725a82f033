// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod kafka;

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
  #[error("kafka error: {0}")]
  Kafka(#[from] rdkafka::error::KafkaError),
}

//
// Producer
//

// Hands serialized records to the message broker. Publishing only enqueues the message, delivery
// happens in the background.
#[mockall::automock]
pub trait Producer: Send + Sync {
  fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;

  // Wait up to the timeout for enqueued messages to be delivered.
  fn flush(&self, timeout: Duration);
}
