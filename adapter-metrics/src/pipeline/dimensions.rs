// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./dimensions_test.rs"]
mod dimensions_test;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub type LabelSet = BTreeMap<String, String>;

// Label carrying a comma separated list of extra dimensions to keep for a Kubernetes series.
pub const DIMENSION_EXTENSION_LABEL: &str = "dimision";

pub const POD_DIMENSIONS: &[&str] = &[
  "bk_data_id",
  "bk_biz_id",
  "bk_inst_id",
  "bk_obj_id",
  "cluster",
  "instance_name",
  "namespace_id",
  "node_id",
  "pod_id",
  "workload",
];

pub const NODE_DIMENSIONS: &[&str] = &[
  "bk_data_id",
  "bk_biz_id",
  "bk_inst_id",
  "bk_obj_id",
  "cluster",
  "instance_name",
  "node_id",
];

// Keys that collide with field names reserved by the downstream store.
pub const RESERVED_DIMENSIONS: &[&str] = &[
  "name",
  "user",
  "users",
  "queries",
  "database",
  "databases",
  "field",
  "group",
  "groups",
  "info",
  "offset",
  "replication",
  "values",
  "shard",
  "tag",
  "__name__",
  "job",
];

//
// DimensionValue
//

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimensionValue {
  Int(i64),
  Str(String),
}

impl DimensionValue {
  // Integer view of an id dimension. Strings that are not base 10 integers are zero.
  #[must_use]
  pub fn to_id(&self) -> i64 {
    match self {
      Self::Int(value) => *value,
      Self::Str(value) => value.parse().unwrap_or(0),
    }
  }

  #[must_use]
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Str(value) => Some(value),
      Self::Int(_) => None,
    }
  }
}

impl From<i64> for DimensionValue {
  fn from(value: i64) -> Self {
    Self::Int(value)
  }
}

impl From<&str> for DimensionValue {
  fn from(value: &str) -> Self {
    Self::Str(value.to_string())
  }
}

impl From<String> for DimensionValue {
  fn from(value: String) -> Self {
    Self::Str(value)
  }
}

//
// DimensionSet
//

// The enriched dimensions of one series. Each emitted sample gets its own clone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionSet(BTreeMap<String, DimensionValue>);

impl DimensionSet {
  #[must_use]
  pub fn from_labels(labels: &LabelSet) -> Self {
    Self(
      labels
        .iter()
        .map(|(key, value)| (key.clone(), DimensionValue::Str(value.clone())))
        .collect(),
    )
  }

  #[must_use]
  pub fn get(&self, key: &str) -> Option<&DimensionValue> {
    self.0.get(key)
  }

  #[must_use]
  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.0.get(key).and_then(DimensionValue::as_str)
  }

  // Id view of a dimension, zero when missing or not numeric.
  #[must_use]
  pub fn id(&self, key: &str) -> i64 {
    self.0.get(key).map_or(0, DimensionValue::to_id)
  }

  #[must_use]
  pub fn contains_key(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DimensionValue>) {
    self.0.insert(key.into(), value.into());
  }

  pub fn remove(&mut self, key: &str) -> Option<DimensionValue> {
    self.0.remove(key)
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.0.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &DimensionValue)> {
    self.0.iter()
  }

  // Keep only whitelisted keys, compared case insensitively. The whitelist is extended by the
  // names listed in the dimension extension label that are present in the set.
  pub fn retain_whitelisted(&mut self, whitelist: &[&str]) {
    let extension: HashSet<String> = self
      .get_str(DIMENSION_EXTENSION_LABEL)
      .map(|names| {
        names
          .split(',')
          .map(str::trim)
          .filter(|name| !name.is_empty() && self.0.contains_key(*name))
          .map(str::to_ascii_lowercase)
          .collect()
      })
      .unwrap_or_default();

    self.0.retain(|key, _| {
      let key = key.to_ascii_lowercase();
      whitelist.contains(&key.as_str()) || extension.contains(&key)
    });
  }

  // Move reserved keys out of the way by renaming them to __<key>__. __name__ and job are
  // dropped.
  pub fn rename_reserved(&mut self) {
    let reserved = self
      .0
      .keys()
      .filter(|key| RESERVED_DIMENSIONS.contains(&key.to_ascii_lowercase().as_str()))
      .cloned()
      .collect::<Vec<_>>();

    for key in reserved {
      let Some(value) = self.0.remove(&key) else {
        continue;
      };
      if !matches!(key.as_str(), "__name__" | "job") {
        self.0.insert(format!("__{key}__"), value);
      }
    }
  }
}

impl<K: Into<String>, V: Into<DimensionValue>> FromIterator<(K, V)> for DimensionSet {
  fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
    Self(
      iter
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect(),
    )
  }
}
