// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./client_test.rs"]
mod client_test;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;
use std::time::Duration;

static DATA_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

//
// CmdbError
//

#[derive(thiserror::Error, Debug)]
pub enum CmdbError {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),
  #[error("unexpected http status: {0}")]
  Status(reqwest::StatusCode),
  #[error("json decode error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("cmdb response error: {0}")]
  Response(String),
}

pub type Result<T> = std::result::Result<T, CmdbError>;

//
// ApiType
//

// The CMDB API a failed lookup was made against. Used as the api_type label of the failure
// counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiType {
  DataId,
  InstId,
  BizId,
  WorkloadId,
  SearchInst,
  SearchAsst,
  SearchSet,
}

impl ApiType {
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::DataId => "get_obj_table_id",
      Self::InstId => "get_k8s_inst_id",
      Self::BizId => "get_inst_biz_id",
      Self::WorkloadId => "get_k8s_workload_id",
      Self::SearchInst => "search_inst",
      Self::SearchAsst => "search_inst_asst",
      Self::SearchSet => "search_set",
    }
  }
}

//
// Bulk response types
//

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Instance {
  pub bk_inst_id: i64,
  #[serde(default)]
  pub bk_inst_name: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct InstancePage {
  #[serde(default)]
  pub count: u64,
  #[serde(default, rename = "info")]
  pub instances: Vec<Instance>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Association {
  pub bk_inst_id: i64,
  pub bk_asst_inst_id: i64,
  #[serde(default)]
  pub bk_asst_obj_id: String,
}

#[derive(Deserialize, Debug, Default)]
struct SetInfo {
  #[serde(default)]
  bk_biz_id: i64,
}

#[derive(Deserialize, Debug, Default)]
struct SetPage {
  #[serde(default)]
  info: Vec<SetInfo>,
}

// The {result, message, data} wrapper used by every JSON returning endpoint.
#[derive(Deserialize, Debug)]
struct Envelope<T> {
  #[serde(default)]
  result: bool,
  #[serde(default)]
  message: String,
  data: Option<T>,
}

impl<T> Envelope<T> {
  fn into_data(self) -> Result<T> {
    if !self.result {
      return Err(CmdbError::Response(if self.message.is_empty() {
        "result is false".to_string()
      } else {
        self.message
      }));
    }
    self
      .data
      .ok_or_else(|| CmdbError::Response("missing data".to_string()))
  }
}

//
// CmdbClient
//

// The resolution contract of the CMDB. Every call is a single outbound request. Failures are
// returned to the caller which decides how to degrade.
#[mockall::automock]
#[async_trait]
pub trait CmdbClient: Send + Sync {
  // Returns the data stream id configured for an object type.
  async fn get_data_id(&self, obj_id: &str) -> Result<String>;

  async fn get_inst_id(&self, obj_id: &str, inst_name: &str) -> Result<i64>;

  async fn get_biz_id(&self, obj_id: &str, inst_id: i64) -> Result<i64>;

  async fn get_workload_id(&self, pod_id: i64) -> Result<i64>;

  // Fetch one page of the instance table of an object type.
  async fn list_instances(&self, obj_id: &str, start: u64, limit: u64) -> Result<InstancePage>;

  // Fetch all associations between instances of obj_id and instances of asst_obj_id.
  async fn list_associations(&self, obj_id: &str, asst_obj_id: &str) -> Result<Vec<Association>>;

  // Resolve the business a set belongs to.
  async fn get_set_biz_id(&self, set_id: i64) -> Result<i64>;
}

// Parse the plain integer body returned by the single id endpoints.
pub(crate) fn parse_id(body: &str) -> Result<i64> {
  body
    .trim()
    .parse()
    .map_err(|_| CmdbError::Response(format!("non numeric id body: {}", body.trim())))
}

// The data id is the first run of digits in the table id returned by the CMDB.
pub(crate) fn parse_data_id(data: &str) -> Option<String> {
  DATA_ID_REGEX.find(data).map(|m| m.as_str().to_string())
}

#[must_use]
pub fn open_api_url(paas_host: &str, app_id: &str) -> String {
  format!("{}/o/{app_id}/open_api", paas_host.trim_end_matches('/'))
}

//
// HttpCmdbClient
//

pub struct HttpCmdbClient {
  client: reqwest::Client,
  base_url: String,
}

impl HttpCmdbClient {
  pub fn new(base_url: String, timeout: Duration) -> anyhow::Result<Self> {
    let client = reqwest::Client::builder()
      .no_proxy()
      .timeout(timeout)
      .build()?;
    Ok(Self { client, base_url })
  }

  async fn get_text(&self, api: &str, query: &[(&str, String)]) -> Result<String> {
    let url = format!("{}/{api}/", self.base_url);
    log::trace!("cmdb request: {url} {query:?}");
    let response = self.client.get(&url).query(query).send().await?;
    if !response.status().is_success() {
      return Err(CmdbError::Status(response.status()));
    }
    Ok(response.text().await?)
  }

  async fn get_json<T: DeserializeOwned>(&self, api: &str, query: &[(&str, String)]) -> Result<T> {
    let body = self.get_text(api, query).await?;
    let envelope: Envelope<T> = serde_json::from_str(&body)?;
    envelope.into_data()
  }
}

#[async_trait]
impl CmdbClient for HttpCmdbClient {
  async fn get_data_id(&self, obj_id: &str) -> Result<String> {
    let data: String = self
      .get_json(
        ApiType::DataId.as_str(),
        &[("bk_obj_id", obj_id.to_string())],
      )
      .await?;
    parse_data_id(&data).ok_or_else(|| CmdbError::Response(format!("no data id in '{data}'")))
  }

  async fn get_inst_id(&self, obj_id: &str, inst_name: &str) -> Result<i64> {
    let body = self
      .get_text(
        ApiType::InstId.as_str(),
        &[
          ("bk_obj_id", obj_id.to_string()),
          ("bk_inst_name", inst_name.to_string()),
        ],
      )
      .await?;
    parse_id(&body)
  }

  async fn get_biz_id(&self, obj_id: &str, inst_id: i64) -> Result<i64> {
    let body = self
      .get_text(
        ApiType::BizId.as_str(),
        &[
          ("bk_obj_id", obj_id.to_string()),
          ("bk_inst_id", inst_id.to_string()),
        ],
      )
      .await?;
    parse_id(&body)
  }

  async fn get_workload_id(&self, pod_id: i64) -> Result<i64> {
    let body = self
      .get_text(
        ApiType::WorkloadId.as_str(),
        &[("pod_id", pod_id.to_string())],
      )
      .await?;
    parse_id(&body)
  }

  async fn list_instances(&self, obj_id: &str, start: u64, limit: u64) -> Result<InstancePage> {
    self
      .get_json(
        ApiType::SearchInst.as_str(),
        &[
          ("bk_obj_id", obj_id.to_string()),
          ("start", start.to_string()),
          ("limit", limit.to_string()),
        ],
      )
      .await
  }

  async fn list_associations(&self, obj_id: &str, asst_obj_id: &str) -> Result<Vec<Association>> {
    self
      .get_json(
        ApiType::SearchAsst.as_str(),
        &[
          ("bk_obj_id", obj_id.to_string()),
          ("bk_asst_obj_id", asst_obj_id.to_string()),
        ],
      )
      .await
  }

  async fn get_set_biz_id(&self, set_id: i64) -> Result<i64> {
    let page: SetPage = self
      .get_json(
        ApiType::SearchSet.as_str(),
        &[("bk_set_id", set_id.to_string())],
      )
      .await?;
    page
      .info
      .first()
      .map(|info| info.bk_biz_id)
      .ok_or_else(|| CmdbError::Response(format!("set {set_id} not found")))
  }
}
