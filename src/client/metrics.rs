use crate::client::types::PerformanceMetric;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

/// Metrics kept per component; the oldest entry is evicted first.
pub const MAX_METRICS: usize = 100;

/// Capped ring of [`PerformanceMetric`]s for one component.
#[derive(Debug)]
pub struct PerformanceMonitor {
    component: String,
    metrics: Mutex<VecDeque<PerformanceMetric>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub count: usize,
    pub failures: usize,
    pub average_duration: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    pub component: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub average_duration: Duration,
    pub max_duration: Duration,
    pub by_operation: HashMap<String, OperationStats>,
}

impl PerformanceMonitor {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            metrics: Mutex::new(VecDeque::with_capacity(MAX_METRICS)),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub async fn record(
        &self,
        operation: impl Into<String>,
        duration: Duration,
        success: bool,
        metadata: HashMap<String, String>,
    ) {
        let metric = PerformanceMetric {
            operation: operation.into(),
            duration,
            success,
            timestamp: Utc::now(),
            metadata,
        };

        let mut metrics = self.metrics.lock().await;
        if metrics.len() >= MAX_METRICS {
            metrics.pop_front();
        }
        metrics.push_back(metric);
    }

    /// Most recent metrics first.
    pub async fn recent(&self, limit: usize) -> Vec<PerformanceMetric> {
        let metrics = self.metrics.lock().await;
        metrics.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.metrics.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.metrics.lock().await.is_empty()
    }

    pub async fn summary(&self) -> MetricsSummary {
        let metrics = self.metrics.lock().await;

        let mut summary = MetricsSummary {
            component: self.component.clone(),
            total: metrics.len(),
            ..Default::default()
        };
        if metrics.is_empty() {
            return summary;
        }

        let mut total_duration = Duration::ZERO;
        let mut per_operation: HashMap<String, (usize, usize, Duration)> = HashMap::new();
        for metric in metrics.iter() {
            if metric.success {
                summary.successful += 1;
            } else {
                summary.failed += 1;
            }
            total_duration += metric.duration;
            summary.max_duration = summary.max_duration.max(metric.duration);

            let entry = per_operation
                .entry(metric.operation.clone())
                .or_insert((0, 0, Duration::ZERO));
            entry.0 += 1;
            if !metric.success {
                entry.1 += 1;
            }
            entry.2 += metric.duration;
        }

        summary.success_rate = summary.successful as f64 / summary.total as f64;
        summary.average_duration = total_duration / summary.total as u32;
        summary.by_operation = per_operation
            .into_iter()
            .map(|(operation, (count, failures, duration))| {
                (
                    operation,
                    OperationStats {
                        count,
                        failures,
                        average_duration: duration / count as u32,
                    },
                )
            })
            .collect();

        summary
    }

    pub async fn clear(&self) {
        self.metrics.lock().await.clear();
    }
}
