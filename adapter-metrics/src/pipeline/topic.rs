// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./topic_test.rs"]
mod topic_test;

use super::dimensions::{DimensionSet, LabelSet};
use super::template::Template;
use bd_log::warn_every;
use time::ext::NumericalDuration;

#[must_use]
pub fn data_id_topic(data_id: &str) -> String {
  format!("0bkmonitor_{data_id}0")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TopicStrategy {
  // Only the data id derived topic is used. Series without a data id are dropped.
  #[default]
  DataId,
  // Fall back to rendering the topic template when there is no data id.
  Template,
}

//
// TopicRouter
//

pub struct TopicRouter {
  strategy: TopicStrategy,
  template: Template,
}

impl TopicRouter {
  #[must_use]
  pub const fn new(strategy: TopicStrategy, template: Template) -> Self {
    Self { strategy, template }
  }

  // Derive the topic of a series. The data id and job dimensions are consumed by the data id
  // route. None means the series cannot be routed.
  pub fn route(&self, dimensions: &mut DimensionSet, labels: &LabelSet) -> Option<String> {
    if let Some(data_id) = dimensions
      .get_str("bk_data_id")
      .filter(|data_id| !data_id.is_empty())
    {
      let topic = data_id_topic(data_id);
      dimensions.remove("bk_data_id");
      dimensions.remove("job");
      return Some(topic);
    }

    match self.strategy {
      TopicStrategy::DataId => None,
      TopicStrategy::Template => match self.template.render(labels) {
        Ok(topic) if !topic.is_empty() => Some(topic),
        Ok(_) => None,
        Err(e) => {
          warn_every!(1.minutes(), "could not render topic: {}", e);
          None
        },
      },
    }
  }
}
