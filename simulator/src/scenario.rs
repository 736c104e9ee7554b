//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Start `producers` concurrent producers submitting `count` requests
    /// between them. Does not wait for them to finish.
    Submit { count: usize, producers: usize },
    /// Wait for every producer, then for every admitted record to resolve.
    Settle { timeout_secs: u64 },
    /// Inject a fault.
    InjectFault { fault_type: FaultType },
    /// Clear a fault.
    ClearFault { fault_type: FaultType },
    /// Stop the service while work is outstanding.
    Shutdown,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultType {
    /// Every provider call fails.
    ProviderOutage,
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// No admitted record is still `created`.
    AllResolved,
    /// At least `min` records are `failed`.
    FailedAtLeast { min: usize },
    /// At least `min` records are `updated`.
    UpdatedAtLeast { min: usize },
    /// At least one admitted record was left `created`.
    SomeUnresolved,
}

impl Scenario {
    /// Names accepted by [`Scenario::load`].
    pub const NAMES: [&'static str; 4] = ["steady", "burst", "provider-outage", "shutdown-midflight"];

    /// Load a built-in scenario by name, or a JSON scenario file.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        if name.ends_with(".json") {
            let contents = std::fs::read_to_string(name)?;
            return Ok(serde_json::from_str(&contents)?);
        }

        match name {
            "steady" => Ok(Self::steady()),
            "burst" => Ok(Self::burst()),
            "provider-outage" => Ok(Self::provider_outage()),
            "shutdown-midflight" => Ok(Self::shutdown_midflight()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (expected one of {})",
                name,
                Self::NAMES.join(", ")
            )),
        }
    }

    /// A single producer at a modest pace.
    fn steady() -> Self {
        Self {
            name: "steady".to_string(),
            description: "One producer, every request resolves".to_string(),
            steps: vec![
                ScenarioStep::Submit {
                    count: 20,
                    producers: 1,
                },
                ScenarioStep::Settle { timeout_secs: 30 },
                ScenarioStep::Assert {
                    condition: AssertCondition::AllResolved,
                },
            ],
        }
    }

    /// Many producers against a small queue.
    fn burst() -> Self {
        Self {
            name: "burst".to_string(),
            description: "Concurrent producers blocked by a full queue".to_string(),
            steps: vec![
                ScenarioStep::Submit {
                    count: 200,
                    producers: 20,
                },
                ScenarioStep::Settle { timeout_secs: 60 },
                ScenarioStep::Assert {
                    condition: AssertCondition::AllResolved,
                },
            ],
        }
    }

    /// Requests made during an outage end up failed, later ones recover.
    fn provider_outage() -> Self {
        Self {
            name: "provider-outage".to_string(),
            description: "Provider outage and recovery".to_string(),
            steps: vec![
                ScenarioStep::Submit {
                    count: 10,
                    producers: 2,
                },
                ScenarioStep::Settle { timeout_secs: 30 },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::ProviderOutage,
                },
                ScenarioStep::Submit {
                    count: 10,
                    producers: 2,
                },
                ScenarioStep::Settle { timeout_secs: 30 },
                ScenarioStep::Assert {
                    condition: AssertCondition::FailedAtLeast { min: 10 },
                },
                ScenarioStep::ClearFault {
                    fault_type: FaultType::ProviderOutage,
                },
                ScenarioStep::Submit {
                    count: 10,
                    producers: 2,
                },
                ScenarioStep::Settle { timeout_secs: 30 },
                ScenarioStep::Assert {
                    condition: AssertCondition::AllResolved,
                },
            ],
        }
    }

    /// Stop the service with fetches in flight and a full queue.
    fn shutdown_midflight() -> Self {
        Self {
            name: "shutdown-midflight".to_string(),
            description: "Shutdown with work in flight leaves queued records created".to_string(),
            steps: vec![
                ScenarioStep::Submit {
                    count: 50,
                    producers: 10,
                },
                ScenarioStep::Wait { millis: 50 },
                ScenarioStep::Shutdown,
                ScenarioStep::Settle { timeout_secs: 5 },
                ScenarioStep::Assert {
                    condition: AssertCondition::SomeUnresolved,
                },
            ],
        }
    }
}
