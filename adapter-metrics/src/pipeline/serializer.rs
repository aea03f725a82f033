// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./serializer_test.rs"]
mod serializer_test;

use super::dimensions::{DimensionSet, DimensionValue};
use super::protocol;
use anyhow::Context;
use apache_avro::schema::{EnumSchema, FixedSchema, Name, RecordSchema, ResolvedSchema, Schema};
use apache_avro::types::Value as AvroValue;
use bytes::Bytes;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// Dimensions folded into the top level of a business linkage record.
const LINKAGE_CONSUMED_DIMENSIONS: &[&str] =
  &["bk_biz_id", "bk_cloud_id", "bk_collect_config_id", "__name__"];

#[derive(thiserror::Error, Debug)]
pub enum SerializeError {
  #[error("invalid {field} '{value}'")]
  InvalidNumber { field: &'static str, value: String },
  #[error("invalid timestamp: {0}")]
  Timestamp(#[from] time::error::ComponentRange),
  #[error("timestamp format error: {0}")]
  TimestampFormat(#[from] time::error::Format),
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("avro error: {0}")]
  Avro(#[from] apache_avro::Error),
}

type Result<T> = std::result::Result<T, SerializeError>;

// NaN and -Inf become 0, +Inf becomes -1.
#[must_use]
pub fn handle_special_value(value: f64) -> f64 {
  if value.is_nan() || value == f64::NEG_INFINITY {
    0.0
  } else if value == f64::INFINITY {
    -1.0
  } else {
    value
  }
}

fn round_2(value: f64) -> f64 {
  (value * 100.0).round() / 100.0
}

fn dimension_number(dimensions: &DimensionSet, field: &'static str) -> Result<i64> {
  match dimensions.get(field) {
    Some(DimensionValue::Int(value)) => Ok(*value),
    Some(DimensionValue::Str(value)) => {
      value
        .parse()
        .map_err(|_| SerializeError::InvalidNumber {
          field,
          value: value.clone(),
        })
    },
    None => Err(SerializeError::InvalidNumber {
      field,
      value: String::new(),
    }),
  }
}

//
// MetricRecord
//

// One sample ready for serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
  pub name: String,
  pub dimensions: DimensionSet,
  pub timestamp_ms: i64,
  pub value: f64,
}

//
// RecordShape
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordShape {
  Standard,
  BusinessLinkage,
}

impl RecordShape {
  #[must_use]
  pub fn for_protocol(protocol: &str) -> Self {
    if protocol == protocol::VECTOR {
      Self::BusinessLinkage
    } else {
      Self::Standard
    }
  }

  pub fn format(self, protocol: &str, record: MetricRecord) -> Result<serde_json::Value> {
    match self {
      Self::Standard => format_standard(protocol, record),
      Self::BusinessLinkage => format_linkage(record),
    }
  }
}

fn format_standard(protocol: &str, mut record: MetricRecord) -> Result<serde_json::Value> {
  let timestamp = if protocol == protocol::CLOUD {
    let timestamp = dimension_number(&record.dimensions, "metric_timestamp")?;
    record.dimensions.remove("metric_timestamp");
    timestamp
  } else {
    record.timestamp_ms / 1000 * 1000
  };

  Ok(json!({
    "data": [{
      "dimension": record.dimensions,
      "metrics": { record.name: handle_special_value(record.value) },
      "timestamp": timestamp,
    }]
  }))
}

fn format_linkage(mut record: MetricRecord) -> Result<serde_json::Value> {
  let bk_biz_id = dimension_number(&record.dimensions, "bk_biz_id")?;
  let bk_cloud_id = dimension_number(&record.dimensions, "bk_cloud_id")?;
  let collect_config_id = record
    .dimensions
    .get("bk_collect_config_id")
    .cloned()
    .unwrap_or_else(|| DimensionValue::Str(String::new()));

  let seconds = record.timestamp_ms.div_euclid(1000);
  let datetime = OffsetDateTime::from_unix_timestamp(seconds)?.format(&Rfc3339)?;

  for key in LINKAGE_CONSUMED_DIMENSIONS {
    record.dimensions.remove(key);
  }

  Ok(json!({
    "@timestamp": datetime,
    "bk_biz_id": bk_biz_id,
    "bk_cloud_id": bk_cloud_id,
    "group_info": [{ "bk_collect_config_id": collect_config_id }],
    "prometheus": {
      "collector": {
        "metrics": [{
          "key": record.name,
          "labels": record.dimensions,
          "timestamp": seconds,
          "value": round_2(handle_special_value(record.value)),
        }]
      }
    },
    "service": "prometheus",
    "type": "metricbeat",
  }))
}

//
// AvroJsonCodec
//

// Name of a union branch in Avro JSON: the full name for named types, the type name otherwise.
fn branch_name(schema: &Schema) -> String {
  match schema {
    Schema::Record(RecordSchema { name, .. })
    | Schema::Enum(EnumSchema { name, .. })
    | Schema::Fixed(FixedSchema { name, .. })
    | Schema::Ref { name } => name.fullname(None),
    Schema::Array(_) => "array".to_string(),
    Schema::Map(_) => "map".to_string(),
    // Primitives and logical types, whose canonical form is the underlying type.
    other => match serde_json::from_str(&other.canonical_form()) {
      Ok(serde_json::Value::String(name)) => name,
      Ok(serde_json::Value::Object(object)) => object
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string(),
      _ => String::new(),
    },
  }
}

// Coerces JSON records against an Avro schema and writes them back in Avro's JSON encoding, where
// a non null union value is wrapped as {"<branch type>": value}.
#[derive(Debug)]
pub struct AvroJsonCodec {
  schema: Schema,
  names: HashMap<Name, Schema>,
}

impl AvroJsonCodec {
  pub fn new(schema: Schema) -> Result<Self> {
    let names = ResolvedSchema::try_from(&schema)?
      .get_names()
      .iter()
      .map(|(name, schema)| (name.clone(), (*schema).clone()))
      .collect();
    Ok(Self { schema, names })
  }

  pub fn encode(&self, record: serde_json::Value) -> Result<serde_json::Value> {
    let value = AvroValue::from(record).resolve(&self.schema)?;
    self.to_json(value, &self.schema)
  }

  fn to_json(&self, value: AvroValue, schema: &Schema) -> Result<serde_json::Value> {
    let json = match (value, schema) {
      (AvroValue::Union(index, value), Schema::Union(union)) => {
        match union.variants().get(index as usize) {
          Some(Schema::Null) | None => serde_json::Value::try_from(*value)?,
          Some(branch) => {
            let mut tagged = serde_json::Map::new();
            tagged.insert(branch_name(branch), self.to_json(*value, branch)?);
            serde_json::Value::Object(tagged)
          },
        }
      },
      (AvroValue::Record(fields), Schema::Record(record)) => serde_json::Value::Object(
        fields
          .into_iter()
          .map(|(name, value)| -> Result<(String, serde_json::Value)> {
            let field = record
              .lookup
              .get(&name)
              .and_then(|index| record.fields.get(*index));
            let value = match field {
              Some(field) => self.to_json(value, &field.schema)?,
              None => serde_json::Value::try_from(value)?,
            };
            Ok((name, value))
          })
          .collect::<Result<_>>()?,
      ),
      (AvroValue::Map(entries), Schema::Map(map)) => serde_json::Value::Object(
        entries
          .into_iter()
          .map(|(key, value)| -> Result<(String, serde_json::Value)> {
            Ok((key, self.to_json(value, &map.types)?))
          })
          .collect::<Result<_>>()?,
      ),
      (AvroValue::Array(items), Schema::Array(array)) => serde_json::Value::Array(
        items
          .into_iter()
          .map(|item| self.to_json(item, &array.items))
          .collect::<Result<_>>()?,
      ),
      (value, Schema::Ref { name }) => match self.names.get(name) {
        Some(schema) => self.to_json(value, schema)?,
        None => serde_json::Value::try_from(value)?,
      },
      (value, _) => serde_json::Value::try_from(value)?,
    };
    Ok(json)
  }
}

//
// PayloadEncoder
//

// How formatted records are turned into message payloads. Chosen once at startup.
#[derive(Debug)]
pub enum PayloadEncoder {
  Json,
  // Avro JSON against a schema. Only the standard record shape has a schema, business linkage
  // records fail to encode.
  AvroJson(Box<AvroJsonCodec>),
}

impl PayloadEncoder {
  // Build the encoder for a configured format name. Unknown names fall back to JSON. The schema
  // file is only read for avro-json and failing to load it is fatal.
  pub fn from_format(format: &str, schema_path: &Path) -> anyhow::Result<Self> {
    match format {
      "json" => Ok(Self::Json),
      "avro-json" => {
        let schema = std::fs::read_to_string(schema_path)
          .with_context(|| format!("couldn't read avro schema {}", schema_path.display()))?;
        let schema = Schema::parse_str(&schema).context("couldn't create avro codec")?;
        Ok(Self::AvroJson(Box::new(AvroJsonCodec::new(schema)?)))
      },
      other => {
        log::warn!("invalid serialization format '{other}', using json");
        Ok(Self::Json)
      },
    }
  }

  pub fn encode(&self, record: serde_json::Value) -> Result<Bytes> {
    let record = match self {
      Self::Json => record,
      Self::AvroJson(codec) => codec.encode(record)?,
    };
    Ok(serde_json::to_vec(&record)?.into())
  }
}
