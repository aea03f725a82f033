// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod admin;
pub mod cmdb;
pub mod filters;
pub mod inflow;
pub mod outflow;
pub mod pipeline;
pub mod test;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  use adapter_common::global_initialize;

  global_initialize();
}
