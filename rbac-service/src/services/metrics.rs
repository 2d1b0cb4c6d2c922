use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Metrics
pub static PERMISSION_EVALUATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PERMISSION_EVALUATION_DURATION_SECONDS: OnceLock<Histogram> = OnceLock::new();
pub static ROLE_CACHE_REFRESH_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static ROLE_CACHE_ROLES: OnceLock<IntGauge> = OnceLock::new();
pub static PERMISSION_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Create and register every collector. Later calls are no-ops.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let evaluations_total = IntCounterVec::new(
        Opts::new(
            "rbac_permission_evaluations_total",
            "Total number of permission map evaluations",
        ),
        &["outcome"],
    )?;

    let evaluation_duration = Histogram::with_opts(
        HistogramOpts::new(
            "rbac_permission_evaluation_duration_seconds",
            "Permission map evaluation duration in seconds",
        )
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
    )?;

    let cache_refresh_total = IntCounterVec::new(
        Opts::new("rbac_role_cache_refresh_total", "Role cache refresh attempts"),
        &["result"],
    )?;

    let cache_roles = IntGauge::new("rbac_role_cache_roles", "Roles held by the role cache")?;

    let requests_total = IntCounterVec::new(
        Opts::new(
            "rbac_permission_requests_total",
            "Permission request state transitions",
        ),
        &["transition"],
    )?;

    registry.register(Box::new(evaluations_total.clone()))?;
    registry.register(Box::new(evaluation_duration.clone()))?;
    registry.register(Box::new(cache_refresh_total.clone()))?;
    registry.register(Box::new(cache_roles.clone()))?;
    registry.register(Box::new(requests_total.clone()))?;

    // Initialize globals
    let _ = REGISTRY.set(registry);
    let _ = PERMISSION_EVALUATIONS_TOTAL.set(evaluations_total);
    let _ = PERMISSION_EVALUATION_DURATION_SECONDS.set(evaluation_duration);
    let _ = ROLE_CACHE_REFRESH_TOTAL.set(cache_refresh_total);
    let _ = ROLE_CACHE_ROLES.set(cache_roles);
    let _ = PERMISSION_REQUESTS_TOTAL.set(requests_total);
    Ok(())
}

pub fn record_evaluation(outcome: &str, elapsed: Duration) {
    if let Some(counter) = PERMISSION_EVALUATIONS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
    if let Some(histogram) = PERMISSION_EVALUATION_DURATION_SECONDS.get() {
        histogram.observe(elapsed.as_secs_f64());
    }
}

pub fn record_cache_refresh(result: &str, roles: usize) {
    if let Some(counter) = ROLE_CACHE_REFRESH_TOTAL.get() {
        counter.with_label_values(&[result]).inc();
    }
    if result == "success" {
        if let Some(gauge) = ROLE_CACHE_ROLES.get() {
            gauge.set(roles as i64);
        }
    }
}

pub fn record_request_transition(transition: &str) {
    if let Some(counter) = PERMISSION_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[transition]).inc();
    }
}

pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_exposition() {
        init_metrics().unwrap();
        init_metrics().unwrap();
        record_evaluation("success", Duration::from_millis(3));
        record_cache_refresh("success", 12);
        record_request_transition("approved");

        let text = get_metrics();
        assert!(text.contains("rbac_permission_evaluations_total"));
        assert!(text.contains("rbac_role_cache_roles"));
        assert!(text.contains("rbac_permission_requests_total"));
    }
}
