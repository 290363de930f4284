use kameo::Actor;
use kameo::message::{Context, Message};
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::reply::{Reply, ReplyError};
use std::sync::Arc;
use std::collections::HashMap;
use std::time::Duration;
use chrono::Utc;
use crate::messaging::EventBus;
use crate::metrics::Metrics;
use crate::utils::{CircuitSnapshot, CircuitState};
use crate::actors::core::{HealthStatus, ComponentHealth};

// ============================================================================
// Health Monitor Actor - Monitors system health
// ============================================================================
//
// Responsibilities:
// - Track health status of all pipeline components
// - Poll the broker's circuit breaker
// - Aggregate system-wide health
//
// ============================================================================

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

impl From<ComponentHealth> for UpdateHealth {
    fn from(health: ComponentHealth) -> Self {
        Self {
            component: health.name,
            status: health.status,
            details: health.details,
        }
    }
}

#[derive(Debug)]
pub struct GetSystemHealth;

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: chrono::DateTime<Utc>,
}

// Implement Reply for SystemHealth to use it as a message reply type
impl Reply for SystemHealth {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    bus: Option<Arc<dyn EventBus>>,
    metrics: Option<Arc<Metrics>>,
    check_interval: Duration,
}

impl HealthMonitorActor {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            components: HashMap::new(),
            bus: None,
            metrics: None,
            check_interval,
        }
    }

    pub fn watching_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Worst component status, naming the components responsible
    fn compute_overall_status(&self) -> HealthStatus {
        let Some(worst) = self.components.values().map(|h| &h.status).max() else {
            return HealthStatus::Healthy;
        };

        let same_level = |status: &HealthStatus| {
            std::mem::discriminant(status) == std::mem::discriminant(worst)
        };
        let mut culprits: Vec<String> = self
            .components
            .values()
            .filter(|h| same_level(&h.status))
            .map(|h| format!("{}: {}", h.name, h.status))
            .collect();
        culprits.sort();

        match worst {
            HealthStatus::Healthy => HealthStatus::Healthy,
            HealthStatus::Degraded(_) => HealthStatus::Degraded(culprits.join(", ")),
            HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(culprits.join(", ")),
        }
    }
}

fn circuit_health(circuit: &CircuitSnapshot) -> UpdateHealth {
    let status = match circuit.state {
        CircuitState::Closed => HealthStatus::Healthy,
        CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
        CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
    };
    let details = match circuit.retry_in {
        Some(retry_in) => format!("next probe in {}s", retry_in.as_secs()),
        None => format!("{} consecutive send failures", circuit.consecutive_failures),
    };
    UpdateHealth {
        component: "broker".to_string(),
        status,
        details: Some(details),
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(
        state: Self::Args,
        actor_ref: ActorRef<Self>
    ) -> Result<Self, Self::Error> {
        tracing::info!("HealthMonitorActor started");

        let Some(bus) = state.bus.clone() else {
            return Ok(state);
        };
        let metrics = state.metrics.clone();
        let check_interval = state.check_interval;

        // Poll the broker's circuit breaker
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            loop {
                interval.tick().await;
                if !actor_ref.is_alive() {
                    break;
                }

                if let Some(circuit) = bus.circuit_state().await {
                    if let Some(metrics) = &metrics {
                        metrics.update_circuit_breaker_state(circuit.state.as_gauge());
                    }

                    // Fire and forget - use tell
                    let _ = actor_ref.tell(circuit_health(&circuit)).send().await;
                }
            }
        });

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let health = ComponentHealth {
            name: msg.component.clone(),
            status: msg.status.clone(),
            last_check: Utc::now(),
            details: msg.details,
        };

        match self.components.get(&msg.component) {
            Some(previous) if previous.status == msg.status => {}
            _ => tracing::info!(
                component = %msg.component,
                status = ?msg.status,
                "Component health changed"
            ),
        }

        self.components.insert(msg.component, health);

        if let Some(metrics) = &self.metrics {
            metrics.update_system_health(self.compute_overall_status().as_gauge());
        }
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let overall_status = self.compute_overall_status();

        SystemHealth {
            overall_status,
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}
