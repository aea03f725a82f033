// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./template_test.rs"]
mod template_test;

use super::dimensions::LabelSet;
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_while1};
use nom::character::complete::{char, i64 as integer, multispace0, multispace1};
use nom::combinator::{all_consuming, map, map_res, opt, value};
use nom::multi::{many0, separated_list1};
use nom::sequence::{delimited, preceded};
use nom::{IResult, Parser};
use std::fmt::Write;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
  #[error("template parse error: {0}")]
  Parse(String),
  #[error("template render error: {0}")]
  Render(String),
}

type Result<T> = std::result::Result<T, TemplateError>;

//
// Syntax tree
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Func {
  Replace,
  Substring,
}

impl Func {
  const fn name(self) -> &'static str {
    match self {
      Self::Replace => "replace",
      Self::Substring => "substring",
    }
  }
}

#[derive(Debug, PartialEq, Eq)]
enum Operand {
  Field(String),
  Str(String),
  Int(i64),
  Pipeline(Box<Pipeline>),
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
  Call { func: Func, args: Vec<Operand> },
  Operand(Operand),
}

// Commands separated by '|'. The result of each command is appended as the last argument of the
// next one.
#[derive(Debug, PartialEq, Eq)]
struct Pipeline(Vec<Command>);

#[derive(Debug, PartialEq, Eq)]
enum Node {
  Text(String),
  Action(Pipeline),
}

//
// Parser
//

fn identifier(input: &str) -> IResult<&str, &str> {
  take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
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
          value("\t", tag("t")),
        )),
      )),
      Option::unwrap_or_default,
    ),
    char('"'),
  )
  .parse(input)
}

fn function(input: &str) -> IResult<&str, Func> {
  map_res(identifier, |name| match name {
    "replace" => Ok(Func::Replace),
    "substring" => Ok(Func::Substring),
    _ => Err(()),
  })
  .parse(input)
}

fn operand(input: &str) -> IResult<&str, Operand> {
  alt((
    map(preceded(char('.'), identifier), |name| {
      Operand::Field(name.to_string())
    }),
    map(string_literal, Operand::Str),
    map(integer, Operand::Int),
    map(
      delimited(
        (char('('), multispace0),
        pipeline,
        (multispace0, char(')')),
      ),
      |pipeline| Operand::Pipeline(Box::new(pipeline)),
    ),
  ))
  .parse(input)
}

fn command(input: &str) -> IResult<&str, Command> {
  alt((
    map(
      (function, many0(preceded(multispace1, operand))),
      |(func, args)| Command::Call { func, args },
    ),
    map(operand, Command::Operand),
  ))
  .parse(input)
}

fn pipeline(input: &str) -> IResult<&str, Pipeline> {
  map(
    separated_list1(delimited(multispace0, char('|'), multispace0), command),
    Pipeline,
  )
  .parse(input)
}

fn action(input: &str) -> IResult<&str, Node> {
  map(
    delimited(
      (tag("{{"), multispace0),
      pipeline,
      (multispace0, tag("}}")),
    ),
    Node::Action,
  )
  .parse(input)
}

fn text(input: &str) -> IResult<&str, Node> {
  let end = input.find("{{").unwrap_or(input.len());
  if end == 0 {
    return Err(nom::Err::Error(nom::error::Error::new(
      input,
      nom::error::ErrorKind::TakeUntil,
    )));
  }
  Ok((&input[end ..], Node::Text(input[.. end].to_string())))
}

//
// Evaluation
//

#[derive(Clone, Debug, PartialEq, Eq)]
enum Value {
  Str(String),
  Int(i64),
}

impl Value {
  fn into_string(self, func: Func) -> Result<String> {
    match self {
      Self::Str(value) => Ok(value),
      Self::Int(value) => Err(TemplateError::Render(format!(
        "{}: expected string argument, got {value}",
        func.name()
      ))),
    }
  }

  fn into_int(self, func: Func) -> Result<i64> {
    match self {
      Self::Int(value) => Ok(value),
      Self::Str(value) => Err(TemplateError::Render(format!(
        "{}: expected integer argument, got \"{value}\"",
        func.name()
      ))),
    }
  }
}

fn call(func: Func, args: Vec<Value>) -> Result<Value> {
  let [first, second, third]: [Value; 3] = args.try_into().map_err(|args: Vec<Value>| {
    TemplateError::Render(format!(
      "{}: expected 3 arguments, got {}",
      func.name(),
      args.len()
    ))
  })?;

  match func {
    Func::Replace => {
      let old = first.into_string(func)?;
      let new = second.into_string(func)?;
      let src = third.into_string(func)?;
      Ok(Value::Str(src.replace(&old, &new)))
    },
    Func::Substring => {
      let start = first.into_int(func)?;
      let end = second.into_int(func)?;
      let s = third.into_string(func)?;
      let len = i64::try_from(s.len()).unwrap_or(i64::MAX);
      let start = start.max(0);
      let end = if end < 0 || end > len { len } else { end };
      if start >= end {
        return Err(TemplateError::Render(format!(
          "substring: start {start} is not before end {end}"
        )));
      }
      #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
      s.get(start as usize .. end as usize)
        .map(|slice| Value::Str(slice.to_string()))
        .ok_or_else(|| {
          TemplateError::Render(format!(
            "substring: {start}..{end} is not on a character boundary"
          ))
        })
    },
  }
}

fn eval_operand(operand: &Operand, labels: &LabelSet) -> Result<Value> {
  match operand {
    // Missing labels render as the empty string.
    Operand::Field(name) => Ok(Value::Str(labels.get(name).cloned().unwrap_or_default())),
    Operand::Str(value) => Ok(Value::Str(value.clone())),
    Operand::Int(value) => Ok(Value::Int(*value)),
    Operand::Pipeline(pipeline) => eval_pipeline(pipeline, labels),
  }
}

fn eval_pipeline(pipeline: &Pipeline, labels: &LabelSet) -> Result<Value> {
  let mut piped: Option<Value> = None;
  for command in &pipeline.0 {
    piped = Some(match command {
      Command::Call { func, args } => {
        let mut values = args
          .iter()
          .map(|arg| eval_operand(arg, labels))
          .collect::<Result<Vec<_>>>()?;
        values.extend(piped.take());
        call(*func, values)?
      },
      Command::Operand(operand) => {
        if piped.is_some() {
          return Err(TemplateError::Render(
            "cannot pipe a value into a non function".to_string(),
          ));
        }
        eval_operand(operand, labels)?
      },
    });
  }
  piped.ok_or_else(|| TemplateError::Render("empty pipeline".to_string()))
}

//
// Template
//

// A text template with {{ }} actions evaluated against a label set. Actions support label
// references (.name), string and integer literals, parenthesized pipelines and the replace and
// substring functions.
#[derive(Debug)]
pub struct Template {
  nodes: Vec<Node>,
}

impl Template {
  pub fn parse(source: &str) -> Result<Self> {
    let (_, nodes) = all_consuming(many0(alt((action, text))))
      .parse(source)
      .map_err(|e| TemplateError::Parse(e.to_string()))?;
    Ok(Self { nodes })
  }

  pub fn render(&self, labels: &LabelSet) -> Result<String> {
    let mut output = String::new();
    for node in &self.nodes {
      match node {
        Node::Text(text) => output.push_str(text),
        Node::Action(pipeline) => match eval_pipeline(pipeline, labels)? {
          Value::Str(value) => output.push_str(&value),
          Value::Int(value) => {
            let _ignored = write!(output, "{value}");
          },
        },
      }
    }
    Ok(output)
  }
}
