//! Runs the three probes concurrently and merges their outcomes.
//!
//! Probes already turn their own errors into outcomes. Each one still runs in
//! its own task so that a panic inside a probe (or a driver it calls) cannot
//! take the others down. The whole run is bounded by a budget shorter than the
//! HTTP request timeout: a probe still running when it expires is reported as
//! `Fail` and left to finish its own teardown in the background.

use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{
    cache::CacheProbe, queue::QueueProbe, relational::RelationalProbe, AggregateResult,
    Dependency, ProbeOutcome,
};

/// Budget used until [`Prober::with_budget`] sets one from config.
const DEFAULT_BUDGET: Duration = Duration::from_secs(28);

/// Everything needed to probe the stack once per call to [`run`](Prober::run).
///
/// Cheap to clone: each probe holds its client behind an `Arc`.
#[derive(Clone)]
pub struct Prober {
    pub relational: RelationalProbe,
    pub cache: CacheProbe,
    pub queue: QueueProbe,
    budget: Duration,
}

impl Prober {
    pub fn new(relational: RelationalProbe, cache: CacheProbe, queue: QueueProbe) -> Self {
        Self {
            relational,
            cache,
            queue,
            budget: DEFAULT_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Probe all dependencies in parallel. Never fails, and returns within
    /// the budget even when a dependency hangs.
    #[tracing::instrument(name = "probe_stack", skip(self))]
    pub async fn run(&self) -> AggregateResult {
        let relational = self.relational.clone();
        let cache = self.cache.clone();
        let queue = self.queue.clone();

        let handles = [
            (Dependency::Relational, spawn(async move { relational.run().await })),
            (Dependency::Cache, spawn(async move { cache.run().await })),
            (Dependency::Queue, spawn(async move { queue.run().await })),
        ];

        let deadline = tokio::time::Instant::now() + self.budget;
        let mut aggregate = AggregateResult::new();
        for (dependency, handle) in handles {
            // Dropping a timed-out handle detaches the task rather than aborting it.
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(outcome)) => aggregate.record(dependency, outcome),
                Err(_) => {
                    warn!(%dependency, budget_ms = self.budget.as_millis() as u64, "probe exceeded budget");
                    aggregate.record(
                        dependency,
                        ProbeOutcome::fail(format!(
                            "{dependency} probe did not finish within {}ms",
                            self.budget.as_millis()
                        )),
                    );
                }
                Ok(Err(e)) => {
                    warn!(%dependency, error = %e, "probe task aborted");
                    aggregate.record(
                        dependency,
                        ProbeOutcome::fail(format!("{dependency} probe aborted: {e}")),
                    );
                }
            }
        }

        info!(
            postgres = aggregate.get(Dependency::Relational).label(),
            redis = aggregate.get(Dependency::Cache).label(),
            kafka = aggregate.get(Dependency::Queue).label(),
            "stack probe complete"
        );
        aggregate
    }
}

fn spawn<F>(probe: F) -> JoinHandle<ProbeOutcome>
where
    F: Future<Output = ProbeOutcome> + Send + 'static,
{
    tokio::spawn(tracing::Instrument::in_current_span(probe))
}
