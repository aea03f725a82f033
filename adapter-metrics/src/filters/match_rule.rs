// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./match_rule_test.rs"]
mod match_rule_test;

use crate::pipeline::dimensions::LabelSet;
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1};
use nom::character::complete::{char, multispace0};
use nom::combinator::{all_consuming, map, opt, recognize, value};
use nom::multi::separated_list0;
use nom::sequence::{delimited, pair, separated_pair, terminated};
use nom::{IResult, Parser};
use std::collections::HashMap;

#[derive(thiserror::Error, Debug)]
pub enum MatchRuleError {
  #[error("couldn't parse the match rule list: {0}")]
  Yaml(#[from] serde_yaml::Error),
  #[error("couldn't parse match rule '{0}'")]
  Selector(String),
}

//
// Selector grammar: metric_name{label="value", ...}
//

fn metric_name(input: &str) -> IResult<&str, &str> {
  recognize(pair(
    take_while1(|c: char| c.is_ascii_alphabetic() || c == '_' || c == ':'),
    take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == ':'),
  ))
  .parse(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
  recognize(pair(
    take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
    take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
  ))
  .parse(input)
}

fn label_value(input: &str) -> IResult<&str, String> {
  delimited(
    char('"'),
    map(
      opt(escaped_transform(
        is_not("\\\""),
        '\\',
        alt((
          value("\\", tag("\\")),
          value("\"", tag("\"")),
          value("\n", tag("n")),
        )),
      )),
      Option::unwrap_or_default,
    ),
    char('"'),
  )
  .parse(input)
}

fn label_matcher(input: &str) -> IResult<&str, (String, String)> {
  map(
    separated_pair(
      label_name,
      delimited(multispace0, char('='), multispace0),
      label_value,
    ),
    |(name, value)| (name.to_string(), value),
  )
  .parse(input)
}

fn label_matchers(input: &str) -> IResult<&str, Vec<(String, String)>> {
  delimited(
    (char('{'), multispace0),
    terminated(
      separated_list0(
        delimited(multispace0, char(','), multispace0),
        label_matcher,
      ),
      (multispace0, opt(char(',')), multispace0),
    ),
    char('}'),
  )
  .parse(input)
}

fn selector(input: &str) -> IResult<&str, (&str, Vec<(String, String)>)> {
  delimited(
    multispace0,
    (metric_name, map(opt(label_matchers), Option::unwrap_or_default)),
    multispace0,
  )
  .parse(input)
}

//
// MatchRules
//

// Allow list of series by metric name, optionally narrowed by exact label values. A name may be
// listed more than once, a series is admitted when any of its selectors matches. An empty rule set
// admits everything.
#[derive(Debug, Default)]
pub struct MatchRules {
  rules: HashMap<String, Vec<Vec<(String, String)>>>,
}

impl MatchRules {
  // Parse a YAML list of selectors such as `["up", "http_requests_total{code=\"200\"}"]`.
  pub fn from_yaml(yaml: &str) -> Result<Self, MatchRuleError> {
    let selectors: Option<Vec<String>> = serde_yaml::from_str(yaml)?;
    Self::from_selectors(selectors.unwrap_or_default())
  }

  pub fn from_selectors<T: AsRef<str>>(
    selectors: impl IntoIterator<Item = T>,
  ) -> Result<Self, MatchRuleError> {
    let mut rules: HashMap<String, Vec<Vec<(String, String)>>> = HashMap::new();
    for source in selectors {
      let source = source.as_ref();
      let (_, (name, matchers)) = all_consuming(selector)
        .parse(source)
        .map_err(|_| MatchRuleError::Selector(source.to_string()))?;
      rules.entry(name.to_string()).or_default().push(matchers);
    }
    Ok(Self { rules })
  }

  // Number of distinct metric names with at least one selector.
  #[must_use]
  pub fn len(&self) -> usize {
    self.rules.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  #[must_use]
  pub fn admits(&self, name: &str, labels: &LabelSet) -> bool {
    if self.rules.is_empty() {
      return true;
    }

    self.rules.get(name).is_some_and(|selectors| {
      selectors.iter().any(|matchers| {
        matchers
          .iter()
          .all(|(label, value)| labels.get(label) == Some(value))
      })
    })
  }
}
