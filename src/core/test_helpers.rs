//! Shared test utilities for core module tests
//!
//! Provides a recording fake for [`CommandExecutor`] so engine tests never touch
//! real nftables. This module is only compiled in test mode.

use crate::core::engine::BanEngine;
use crate::core::error::{Error, Result};
use crate::core::executor::CommandExecutor;
use crate::core::sync::FirewallSetBinding;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const V4_SET: &str = "inet test ipv4_ban_ips";
pub const V6_SET: &str = "inet test ipv6_ban_ips";

#[derive(Default)]
struct Recorded {
    scripts: Vec<String>,
    fail_matching: Vec<String>,
    delay: Option<Duration>,
}

/// Fake executor that records every script and fails on request.
///
/// Clones share state, so a test keeps one clone and hands the other to the engine.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    recorded: Arc<Mutex<Recorded>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every script containing `needle` fails with an nftables error.
    pub fn fail_when_contains(&self, needle: &str) {
        self.recorded
            .lock()
            .unwrap()
            .fail_matching
            .push(needle.to_string());
    }

    pub fn clear_failures(&self) {
        self.recorded.lock().unwrap().fail_matching.clear();
    }

    /// Makes each script take `delay` to "execute", so queued work overlaps.
    pub fn set_delay(&self, delay: Duration) {
        self.recorded.lock().unwrap().delay = Some(delay);
    }

    pub fn scripts(&self) -> Vec<String> {
        self.recorded.lock().unwrap().scripts.clone()
    }

    pub fn take_scripts(&self) -> Vec<String> {
        std::mem::take(&mut self.recorded.lock().unwrap().scripts)
    }

    /// Highest number of scripts that were executing at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, script: &str) -> Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let (fail, delay) = {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.scripts.push(script.to_string());
            let fail = recorded
                .fail_matching
                .iter()
                .any(|needle| script.contains(needle.as_str()));
            (fail, recorded.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if fail {
            Err(Error::Nftables {
                message: "Error: Could not process rule: No such file or directory".to_string(),
                stderr: None,
                exit_code: Some(1),
            })
        } else {
            Ok(())
        }
    }
}

/// Creates an engine bound to the test sets plus a handle on its fake executor.
pub fn test_engine() -> (BanEngine, RecordingExecutor) {
    let executor = RecordingExecutor::new();
    let binding = FirewallSetBinding::new(V4_SET, V6_SET).unwrap();
    (BanEngine::new(binding, executor.clone()), executor)
}
