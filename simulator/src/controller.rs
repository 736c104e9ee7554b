//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use fxrefresh_common::{Currency, CurrencyRegistry, RecordIdentifier};
use fxrefresh_service::config::PipelineConfig;
use fxrefresh_service::{MetricsSnapshot, RefreshService, ServiceState};
use fxrefresh_store::InMemoryRecordStore;

use crate::metrics::AdmissionStats;
use crate::scenario::{AssertCondition, FaultType, Scenario, ScenarioStep};
use crate::simulated_provider::{SimulatedProvider, SimulatedProviderConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Simulation settings.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub pipeline: PipelineConfig,
    pub provider: SimulatedProviderConfig,
    /// Seed for request generation and the provider.
    pub seed: Option<u64>,
    /// Speed multiplier for waits and continuous-mode pacing.
    pub speed: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            provider: SimulatedProviderConfig::default(),
            seed: None,
            speed: 1.0,
        }
    }
}

/// End-of-run summary.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub submitted: u64,
    pub rejected: u64,
    pub updated: usize,
    pub failed: usize,
    pub created: usize,
    pub admission_p50_us: u64,
    pub admission_p99_us: u64,
    pub admission_max_us: u64,
    pub provider_calls: u64,
    pub pipeline: MetricsSnapshot,
}

/// Drives a refresh service against the in-memory store and a simulated
/// provider.
pub struct SimulationController {
    speed: f64,
    service: Arc<RefreshService>,
    store: Arc<InMemoryRecordStore>,
    provider: Arc<SimulatedProvider>,
    /// Base and secondary currencies requests are drawn from.
    bases: Vec<Currency>,
    secondaries: Vec<Currency>,
    rng: Arc<Mutex<StdRng>>,
    admissions: Arc<Mutex<AdmissionStats>>,
    admitted: Arc<Mutex<Vec<RecordIdentifier>>>,
    producers: Mutex<JoinSet<()>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(config: SimulationConfig) -> anyhow::Result<Self> {
        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let registry = Arc::new(CurrencyRegistry::reference());
        let bases: Vec<Currency> = registry.base_currencies().cloned().collect();
        let secondaries: Vec<Currency> = registry.secondary_currencies().cloned().collect();

        let mut known = bases.clone();
        known.extend(secondaries.iter().cloned());

        let store = Arc::new(InMemoryRecordStore::new());
        let provider = Arc::new(SimulatedProvider::new(config.provider, known, config.seed));
        let service = Arc::new(RefreshService::new(
            &config.pipeline,
            store.clone(),
            provider.clone(),
            registry,
        )?);

        Ok(Self {
            speed: config.speed,
            service,
            store,
            provider,
            bases,
            secondaries,
            rng: Arc::new(Mutex::new(rng)),
            admissions: Arc::new(Mutex::new(AdmissionStats::new())),
            admitted: Arc::new(Mutex::new(Vec::new())),
            producers: Mutex::new(JoinSet::new()),
        })
    }

    /// Start the refresh service.
    pub fn initialize(&self) -> anyhow::Result<()> {
        self.service.start()?;
        info!(
            bases = self.bases.len(),
            secondaries = self.secondaries.len(),
            "Simulation initialized"
        );
        Ok(())
    }

    /// Run a scenario. Fails on the first violated assertion.
    pub async fn run_scenario(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        for step in &scenario.steps {
            self.execute_step(step).await?;
        }

        Ok(())
    }

    /// Submit requests one at a time until `duration` elapses, the service
    /// stops, or Ctrl+C.
    pub async fn run(&self, duration: Option<Duration>) -> anyhow::Result<()> {
        info!("Running simulation in continuous mode");

        let delay = Duration::from_millis((1000.0 / self.speed) as u64);
        let deadline = duration.map(|d| Instant::now() + d);
        let generator = async {
            while self.service.is_accepting_requests()
                && deadline.map_or(true, |d| Instant::now() < d)
            {
                self.submit_one().await;
                tokio::time::sleep(delay).await;
            }
        };

        tokio::select! {
            _ = generator => {}
            signal = tokio::signal::ctrl_c() => signal?,
        }

        self.settle(Duration::from_secs(30)).await;
        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                let adjusted = (*millis as f64 / self.speed) as u64;
                info!("Waiting {}ms (adjusted: {}ms)", millis, adjusted);
                tokio::time::sleep(Duration::from_millis(adjusted)).await;
            }
            ScenarioStep::Submit { count, producers } => {
                info!(count, producers, "Submitting refresh requests");
                self.spawn_producers(*count, *producers).await;
            }
            ScenarioStep::Settle { timeout_secs } => {
                self.settle(Duration::from_secs(*timeout_secs)).await;
            }
            ScenarioStep::InjectFault { fault_type } => {
                info!("Injecting fault {:?}", fault_type);
                self.set_fault(*fault_type, true);
            }
            ScenarioStep::ClearFault { fault_type } => {
                info!("Clearing fault {:?}", fault_type);
                self.set_fault(*fault_type, false);
            }
            ScenarioStep::Shutdown => {
                info!("Stopping service mid-flight");
                self.service.stop().await;
            }
            ScenarioStep::Assert { condition } => {
                self.check(condition)?;
                info!("Assertion held: {:?}", condition);
            }
        }

        Ok(())
    }

    fn set_fault(&self, fault_type: FaultType, active: bool) {
        match fault_type {
            FaultType::ProviderOutage => self.provider.set_outage(active),
        }
    }

    fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        let counts = self.store.status_counts();
        let held = match condition {
            AssertCondition::AllResolved => counts.created == 0,
            AssertCondition::FailedAtLeast { min } => counts.failed >= *min,
            AssertCondition::UpdatedAtLeast { min } => counts.updated >= *min,
            AssertCondition::SomeUnresolved => counts.created > 0,
        };

        if held {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "Assertion failed: {:?} (updated={}, failed={}, created={})",
                condition,
                counts.updated,
                counts.failed,
                counts.created
            ))
        }
    }

    async fn spawn_producers(&self, count: usize, producers: usize) {
        let producers = producers.clamp(1, count.max(1));
        let mut set = self.producers.lock().await;

        for index in 0..producers {
            // Spread the remainder over the first producers.
            let share = count / producers + usize::from(index < count % producers);
            let pairs = self.draw_pairs(share).await;

            let service = self.service.clone();
            let admissions = self.admissions.clone();
            let admitted = self.admitted.clone();

            set.spawn(async move {
                for (base, secondary) in pairs {
                    submit(&service, &admissions, &admitted, &base, &secondary).await;
                }
            });
        }
    }

    async fn submit_one(&self) {
        if let Some((base, secondary)) = self.draw_pairs(1).await.pop() {
            submit(&self.service, &self.admissions, &self.admitted, &base, &secondary).await;
        }
    }

    async fn draw_pairs(&self, count: usize) -> Vec<(String, String)> {
        let mut rng = self.rng.lock().await;
        (0..count)
            .map(|_| {
                let base = &self.bases[rng.gen_range(0..self.bases.len())];
                let secondary = &self.secondaries[rng.gen_range(0..self.secondaries.len())];
                (base.code().to_string(), secondary.code().to_string())
            })
            .collect()
    }

    /// Wait for producers, then for admitted records to resolve.
    ///
    /// Once the service has stopped nothing else will resolve, so records are
    /// not polled.
    async fn settle(&self, timeout: Duration) {
        let mut set = std::mem::take(&mut *self.producers.lock().await);
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Producer task failed");
            }
        }

        if self.service.state() != ServiceState::Running {
            return;
        }

        let admitted = self.admitted.lock().await.clone();
        let deadline = Instant::now() + timeout;
        for id in admitted {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.service.wait_for_terminal(&id, POLL_INTERVAL, remaining).await {
                Ok(record) if !record.status.is_terminal() => {
                    warn!(identifier = %id, "Record unresolved at settle timeout");
                }
                Ok(_) => {}
                Err(e) => warn!(identifier = %id, error = %e, "Record lookup failed"),
            }
        }
    }

    /// Stop the service and summarize the run.
    pub async fn finish(&self) -> SimulationReport {
        self.settle(Duration::ZERO).await;
        self.service.stop().await;

        let admissions = self.admissions.lock().await.clone();
        let counts = self.store.status_counts();

        SimulationReport {
            submitted: admissions.admitted,
            rejected: admissions.rejected,
            updated: counts.updated,
            failed: counts.failed,
            created: counts.created,
            admission_p50_us: admissions.quantile_us(0.5),
            admission_p99_us: admissions.quantile_us(0.99),
            admission_max_us: admissions.max_us(),
            provider_calls: self.provider.calls(),
            pipeline: self.service.metrics(),
        }
    }

    /// Producer-side admission statistics so far.
    pub async fn admission_stats(&self) -> AdmissionStats {
        self.admissions.lock().await.clone()
    }
}

async fn submit(
    service: &RefreshService,
    admissions: &Mutex<AdmissionStats>,
    admitted: &Mutex<Vec<RecordIdentifier>>,
    base: &str,
    secondary: &str,
) {
    let started = Instant::now();
    match service.recorder().refresh(base, secondary).await {
        Ok(id) => {
            let latency = started.elapsed().as_micros() as u64;
            admissions.lock().await.admitted(latency);
            admitted.lock().await.push(id);
        }
        Err(e) => {
            warn!(base, secondary, error = %e, "Refresh refused");
            admissions.lock().await.rejected();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_controller(min_ms: u64, max_ms: u64, failure_rate: f64) -> SimulationController {
        SimulationController::new(SimulationConfig {
            pipeline: PipelineConfig {
                workers: 3,
                queue_capacity: 4,
            },
            provider: SimulatedProviderConfig {
                min_latency: Duration::from_millis(min_ms),
                max_latency: Duration::from_millis(max_ms),
                failure_rate,
            },
            seed: Some(11),
            speed: 1.0,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_burst_resolves_everything() {
        let controller = create_test_controller(1, 3, 0.0);
        controller.initialize().unwrap();

        controller
            .run_scenario(Scenario {
                name: "small-burst".into(),
                description: "".into(),
                steps: vec![
                    ScenarioStep::Submit {
                        count: 30,
                        producers: 6,
                    },
                    ScenarioStep::Settle { timeout_secs: 10 },
                    ScenarioStep::Assert {
                        condition: AssertCondition::UpdatedAtLeast { min: 30 },
                    },
                ],
            })
            .await
            .unwrap();

        let report = controller.finish().await;
        assert_eq!(report.submitted, 30);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.updated, 30);
        assert_eq!(report.created, 0);
        assert_eq!(report.provider_calls, 30);
        assert_eq!(report.pipeline.records_resolved(), 30);
    }

    #[tokio::test]
    async fn test_outage_fails_records() {
        let controller = create_test_controller(1, 2, 0.0);
        controller.initialize().unwrap();

        controller
            .run_scenario(Scenario {
                name: "small-outage".into(),
                description: "".into(),
                steps: vec![
                    ScenarioStep::InjectFault {
                        fault_type: FaultType::ProviderOutage,
                    },
                    ScenarioStep::Submit {
                        count: 5,
                        producers: 1,
                    },
                    ScenarioStep::Settle { timeout_secs: 10 },
                    ScenarioStep::Assert {
                        condition: AssertCondition::FailedAtLeast { min: 5 },
                    },
                    ScenarioStep::ClearFault {
                        fault_type: FaultType::ProviderOutage,
                    },
                    ScenarioStep::Submit {
                        count: 5,
                        producers: 1,
                    },
                    ScenarioStep::Settle { timeout_secs: 10 },
                    ScenarioStep::Assert {
                        condition: AssertCondition::UpdatedAtLeast { min: 5 },
                    },
                ],
            })
            .await
            .unwrap();

        let report = controller.finish().await;
        assert_eq!(report.failed, 5);
        assert_eq!(report.updated, 5);
    }

    #[tokio::test]
    async fn test_shutdown_leaves_queued_records_created() {
        let controller = create_test_controller(200, 300, 0.0);
        controller.initialize().unwrap();

        controller
            .run_scenario(Scenario::load("shutdown-midflight").unwrap())
            .await
            .unwrap();

        let report = controller.finish().await;
        assert!(report.created > 0);
        assert!(report.rejected > 0);
        // Records whose enqueue lost the race against shutdown were persisted
        // but reported to the producer as refused.
        assert_eq!(
            report.pipeline.records_created as usize,
            report.updated + report.failed + report.created
        );
    }

    #[tokio::test]
    async fn test_failed_assertion_is_reported() {
        let controller = create_test_controller(1, 2, 0.0);
        controller.initialize().unwrap();

        let err = controller
            .execute_step(&ScenarioStep::Assert {
                condition: AssertCondition::SomeUnresolved,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SomeUnresolved"));

        controller.finish().await;
    }

    #[tokio::test]
    async fn test_continuous_mode() {
        let controller = SimulationController::new(SimulationConfig {
            provider: SimulatedProviderConfig {
                min_latency: Duration::ZERO,
                max_latency: Duration::from_millis(1),
                failure_rate: 0.0,
            },
            seed: Some(3),
            speed: 100.0,
            ..Default::default()
        })
        .unwrap();
        controller.initialize().unwrap();

        controller
            .run(Some(Duration::from_millis(200)))
            .await
            .unwrap();

        let stats = controller.admission_stats().await;
        assert!(stats.admitted > 0);

        let report = controller.finish().await;
        assert_eq!(report.created, 0);
    }
}
