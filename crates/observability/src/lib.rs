use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Process-wide counters. Each increment is mirrored to the `metrics`
/// facade so an installed recorder sees the same values.
#[derive(Debug, Default)]
pub struct AppMetrics {
    requests_total: AtomicU64,
    llm_failures_total: AtomicU64,
    geocode_calls_total: AtomicU64,
    geocode_failures_total: AtomicU64,
    cross_city_discards_total: AtomicU64,
    route_fallbacks_total: AtomicU64,
    unaligned_budgets_total: AtomicU64,
    streams_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub llm_failures_total: u64,
    pub geocode_calls_total: u64,
    pub geocode_failures_total: u64,
    pub cross_city_discards_total: u64,
    pub route_fallbacks_total: u64,
    pub unaligned_budgets_total: u64,
    pub streams_total: u64,
    pub avg_latency_millis: f64,
}

fn bump(counter: &AtomicU64, name: &'static str, by: u64) {
    if by == 0 {
        return;
    }
    counter.fetch_add(by, Ordering::Relaxed);
    metrics::counter!(name).increment(by);
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        bump(&self.requests_total, "wayfarer_requests_total", 1);
    }

    pub fn inc_llm_failure(&self) {
        bump(&self.llm_failures_total, "wayfarer_llm_failures_total", 1);
    }

    pub fn add_geocode_calls(&self, calls: usize) {
        bump(
            &self.geocode_calls_total,
            "wayfarer_geocode_calls_total",
            calls as u64,
        );
    }

    pub fn add_geocode_failures(&self, failures: usize) {
        bump(
            &self.geocode_failures_total,
            "wayfarer_geocode_failures_total",
            failures as u64,
        );
    }

    pub fn add_cross_city_discards(&self, discards: usize) {
        bump(
            &self.cross_city_discards_total,
            "wayfarer_cross_city_discards_total",
            discards as u64,
        );
    }

    pub fn add_route_fallbacks(&self, fallbacks: usize) {
        bump(
            &self.route_fallbacks_total,
            "wayfarer_route_fallbacks_total",
            fallbacks as u64,
        );
    }

    pub fn inc_unaligned_budget(&self) {
        bump(
            &self.unaligned_budgets_total,
            "wayfarer_unaligned_budgets_total",
            1,
        );
    }

    pub fn inc_stream(&self) {
        bump(&self.streams_total, "wayfarer_streams_total", 1);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: requests,
            llm_failures_total: self.llm_failures_total.load(Ordering::Relaxed),
            geocode_calls_total: self.geocode_calls_total.load(Ordering::Relaxed),
            geocode_failures_total: self.geocode_failures_total.load(Ordering::Relaxed),
            cross_city_discards_total: self.cross_city_discards_total.load(Ordering::Relaxed),
            route_fallbacks_total: self.route_fallbacks_total.load(Ordering::Relaxed),
            unaligned_budgets_total: self.unaligned_budgets_total.load(Ordering::Relaxed),
            streams_total: self.streams_total.load(Ordering::Relaxed),
            avg_latency_millis: if requests == 0 {
                0.0
            } else {
                latency as f64 / requests as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,wayfarer_agents=info,wayfarer_geo=info,wayfarer_llm=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
