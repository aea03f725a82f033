// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::log_level_to_filter;

#[test]
fn log_level_aliases() {
  assert_eq!(Some("warn"), log_level_to_filter("warning"));
  assert_eq!(Some("warn"), log_level_to_filter("WARN"));
  assert_eq!(Some("error"), log_level_to_filter("fatal"));
  assert_eq!(Some("debug"), log_level_to_filter(" debug "));
  assert_eq!(None, log_level_to_filter("verbose"));
  assert_eq!(None, log_level_to_filter(""));
}
