//! Metrics definitions for the exporter.
//!
//! This module defines all metrics used throughout the pipeline.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "heights_indexed_total",
        "Total number of heights committed, by sync mode"
    );
    describe_counter!(
        "height_failures_total",
        "Total number of height attempts that failed, by stage"
    );
    describe_counter!(
        "tx_fetch_failures_total",
        "Total number of individual transaction fetches that failed"
    );
    describe_counter!(
        "message_decode_errors_total",
        "Total number of messages skipped because they could not be decoded"
    );
    describe_histogram!(
        "height_processing_duration_seconds",
        "Time taken to fetch, derive and write one height in seconds"
    );
    describe_gauge!("chain_head_height", "Latest processable height on the chain");
    describe_gauge!("watermark_height", "Highest height committed to the store");
    describe_counter!(
        "notifications_total",
        "Push notification batches, by outcome"
    );
    describe_counter!(
        "poller_refreshes_total",
        "Auxiliary poller refreshes, by task and outcome"
    );
}

/// Record a committed height.
///
/// # Arguments
/// * `mode` - The sync mode ("basic", "raw" or "refine")
pub fn record_height_indexed(mode: &str) {
    counter!("heights_indexed_total", "mode" => mode.to_string()).increment(1);
}

/// Record a failed height attempt.
///
/// # Arguments
/// * `stage` - Where it failed ("fetch", "derive" or "write")
pub fn record_height_failure(stage: &str) {
    counter!("height_failures_total", "stage" => stage.to_string()).increment(1);
}

pub fn record_tx_fetch_failures(count: usize) {
    counter!("tx_fetch_failures_total").increment(count as u64);
}

/// Record a skipped message.
///
/// # Arguments
/// * `type_url` - The message type URL
pub fn record_decode_error(type_url: &str) {
    counter!("message_decode_errors_total", "type_url" => type_url.to_string()).increment(1);
}

pub fn record_height_processing_duration(duration_secs: f64) {
    histogram!("height_processing_duration_seconds").record(duration_secs);
}

pub fn set_chain_head(height: u64) {
    gauge!("chain_head_height").set(height as f64);
}

pub fn set_watermark(height: u64) {
    gauge!("watermark_height").set(height as f64);
}

/// Record a notification batch outcome ("sent" or "failed").
pub fn record_notification(outcome: &str) {
    counter!("notifications_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an auxiliary refresh.
///
/// # Arguments
/// * `task` - The poller ("validators", "proposal_discovery", "proposal_update", "accounts")
/// * `outcome` - "ok" or "error"
pub fn record_poller_refresh(task: &str, outcome: &str) {
    counter!("poller_refreshes_total", "task" => task.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// A timer that automatically records duration when dropped.
pub struct ProcessingTimer {
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        record_height_processing_duration(self.start.elapsed().as_secs_f64());
    }
}
