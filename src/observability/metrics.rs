//! Configuration metrics.
//!
//! # Metrics
//! - `logroute_config_reloads_total` (counter): reload attempts by
//!   `trigger` (`watch`, `manual`) and `outcome` (`ok`, `error`, `skipped`)
//! - `logroute_config_swaps_total` (counter): activated configurations
//! - `logroute_active_targets` (gauge): targets in the active configuration
//! - `logroute_logger_cache_size` (gauge): cached loggers per factory

pub fn record_reload(trigger: &'static str, outcome: &'static str) {
    metrics::counter!("logroute_config_reloads_total", "trigger" => trigger, "outcome" => outcome)
        .increment(1);
}

pub fn record_swap(active_targets: usize) {
    metrics::counter!("logroute_config_swaps_total").increment(1);
    metrics::gauge!("logroute_active_targets").set(active_targets as f64);
}

pub fn record_logger_cache_size(size: usize) {
    metrics::gauge!("logroute_logger_cache_size").set(size as f64);
}
