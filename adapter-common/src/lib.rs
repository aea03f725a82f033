// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./lib_test.rs"]
mod lib_test;

pub mod bind_resolver;

use bd_log::SwapLogger;
use bd_panic::PanicType;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  global_initialize();
}

// Level names accepted by the legacy LOG_LEVEL variable, mapped onto RUST_LOG filter levels.
const LOG_LEVEL_ALIASES: &[(&str, &str)] = &[
  ("panic", "error"),
  ("fatal", "error"),
  ("error", "error"),
  ("warning", "warn"),
  ("warn", "warn"),
  ("info", "info"),
  ("debug", "debug"),
  ("trace", "trace"),
];

// Translate a LOG_LEVEL value into a RUST_LOG filter. Unknown values map to None so the caller can
// fall back to info.
#[must_use]
pub fn log_level_to_filter(value: &str) -> Option<&'static str> {
  let value = value.trim().to_ascii_lowercase();
  LOG_LEVEL_ALIASES
    .iter()
    .find(|(alias, _)| *alias == value)
    .map(|(_, filter)| *filter)
}

pub fn global_initialize() {
  // Install the panic handler before the logger, see the comment in SwapLogger about thread ids
  // emitted during ctor.
  bd_panic::default(PanicType::ForceAbort);

  // RUST_LOG always wins. LOG_LEVEL is honored for deployments that still set it.
  let mut invalid_log_level = None;
  if std::env::var("RUST_LOG").is_err()
    && let Ok(log_level) = std::env::var("LOG_LEVEL")
  {
    let filter = log_level_to_filter(&log_level).unwrap_or_else(|| {
      invalid_log_level = Some(log_level.clone());
      "info"
    });
    unsafe {
      std::env::set_var("RUST_LOG", filter);
    }
  }

  SwapLogger::initialize();

  if let Some(invalid_log_level) = invalid_log_level {
    log::warn!("invalid log level '{invalid_log_level}' from LOG_LEVEL, using info");
  }

  // The CMDB client speaks TLS through reqwest/rustls which needs a process wide provider.
  let _ignored = rustls::crypto::aws_lc_rs::default_provider().install_default();
}
