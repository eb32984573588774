#![allow(dead_code)]

use std::collections::BTreeMap;

use serde_json::json;
use tap_config::shared::{BatchConfig, RetryConfig, RunConfig};
use tap_executor::process::{TapConfigSource, TapInvocation, TapMode};
use tap_executor::run::{ResumePolicy, RunRequest};
use tap_executor::types::TapId;

pub const TAP_ID: &str = "tap-woocommerce";

pub fn tap_id() -> TapId {
    TapId::new(TAP_ID)
}

/// Retries quickly so that tests exhausting retries stay fast.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_factor: 2.0,
    }
}

/// Run configuration whose batches are only flushed by size or STATE messages.
pub fn run_config() -> RunConfig {
    RunConfig {
        batch: BatchConfig {
            max_size: 100,
            max_fill_ms: 3_600_000,
        },
        store_retry: fast_retry(3),
        sink_retry: fast_retry(3),
        ..RunConfig::default()
    }
}

pub fn invocation(program: &str) -> TapInvocation {
    TapInvocation {
        program: program.to_string(),
        args: vec![],
        config: TapConfigSource::Inline(json!({"url": "https://shop.example.com"})),
        catalog_path: None,
        state: None,
        env: BTreeMap::new(),
        mode: TapMode::Sync,
        max_line_bytes: 1024 * 1024,
        stderr_tail_bytes: 4096,
    }
}

pub fn request(config: RunConfig) -> RunRequest {
    RunRequest::new(tap_id(), invocation(TAP_ID), config).with_resume(ResumePolicy::None)
}
