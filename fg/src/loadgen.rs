//! In-process load generator
//!
//! Drives simulated clients through an [`AdmissionGate`] at fixed request
//! rates and reports how much of each client's offered load got through.

use std::time::Duration;

use futures::future::try_join_all;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ClientSpec, SimulationConfig};
use crate::domain::{RequestDigest, RequestInfo, UserInfo};
use crate::error::{FlowControlError, FlowControlResult};
use crate::fairqueue::RejectReason;
use crate::gate::AdmissionGate;

/// Outcome counts for one client
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientReport {
    pub user: String,
    pub offered: u64,
    pub completed: u64,
    pub rejected: u64,
}

impl ClientReport {
    /// Completed share of offered requests; zero when nothing was offered
    pub fn fraction(&self) -> f64 {
        if self.offered == 0 {
            return 0.0;
        }
        self.completed as f64 / self.offered as f64
    }
}

/// Result of a whole simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub duration: Duration,
    pub service_time: Duration,
    pub clients: Vec<ClientReport>,
}

impl SimulationReport {
    pub fn client(&self, user: &str) -> Option<&ClientReport> {
        self.clients.iter().find(|c| c.user == user)
    }
}

#[derive(Debug, Default)]
struct Tally {
    offered: u64,
    completed: u64,
    rejected: u64,
}

impl ClientSpec {
    fn digest(&self) -> RequestDigest {
        let user = self
            .groups
            .iter()
            .fold(UserInfo::new(self.user.clone()), |user, group| user.with_group(group.clone()));
        RequestDigest::new(user, RequestInfo::resource("list", "", "pods", "default"))
    }

    /// Spacing between one worker's requests so the client as a whole offers `qps`
    fn worker_period(&self) -> FlowControlResult<Duration> {
        if !self.qps.is_finite() || self.qps <= 0.0 {
            return Err(FlowControlError::configuration(
                format!("simulation client \"{}\"", self.user),
                format!("qps must be positive, got {}", self.qps),
            ));
        }
        if self.concurrency == 0 {
            return Err(FlowControlError::configuration(
                format!("simulation client \"{}\"", self.user),
                "concurrency must be at least 1",
            ));
        }
        Ok(Duration::from_secs_f64(f64::from(self.concurrency) / self.qps))
    }
}

/// Run every configured client against `gate` for the configured duration
pub async fn run(gate: &AdmissionGate, simulation: &SimulationConfig) -> FlowControlResult<SimulationReport> {
    debug!(clients = simulation.clients.len(), "loadgen::run: called");
    let duration = simulation.duration();
    let service_time = simulation.service_time();
    let stop = CancellationToken::new();

    let mut workers = Vec::new();
    for (index, client) in simulation.clients.iter().enumerate() {
        let period = client.worker_period()?;
        let digest = client.digest();
        for _ in 0..client.concurrency {
            let digest = digest.clone();
            let stop = stop.clone();
            workers.push(async move {
                run_worker(gate, &digest, period, service_time, &stop)
                    .await
                    .map(|tally| (index, tally))
            });
        }
    }

    info!(workers = workers.len(), ?duration, "loadgen::run: starting");
    let deadline = async {
        tokio::time::sleep(duration).await;
        stop.cancel();
    };
    let (results, ()) = tokio::join!(try_join_all(workers), deadline);

    let mut clients: Vec<ClientReport> = simulation
        .clients
        .iter()
        .map(|c| ClientReport {
            user: c.user.clone(),
            ..Default::default()
        })
        .collect();
    for (index, tally) in results? {
        let report = &mut clients[index];
        report.offered += tally.offered;
        report.completed += tally.completed;
        report.rejected += tally.rejected;
    }

    for report in &clients {
        info!(
            user = %report.user,
            offered = report.offered,
            completed = report.completed,
            rejected = report.rejected,
            "loadgen::run: client finished"
        );
    }
    Ok(SimulationReport {
        duration,
        service_time,
        clients,
    })
}

/// Issue requests every `period` until `stop` fires
///
/// A worker has at most one request outstanding; ticks missed while it waits
/// for a seat are not made up.
async fn run_worker(
    gate: &AdmissionGate,
    digest: &RequestDigest,
    period: Duration,
    service_time: Duration,
    stop: &CancellationToken,
) -> FlowControlResult<Tally> {
    let mut tally = Tally::default();
    let mut ticks = tokio::time::interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticks.tick() => {}
        }

        tally.offered += 1;
        let result = gate.admit(digest, stop).await?;
        let reason = result.reject_reason();
        let Some(seat) = result.into_seat() else {
            match reason {
                Some(reason) if is_load_rejection(reason) => {
                    tally.rejected += 1;
                    continue;
                }
                // Still waiting at the deadline
                _ => break,
            }
        };

        let served = tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            _ = tokio::time::sleep(service_time) => true,
        };
        if !served {
            // In flight at the deadline; dropping the seat releases it
            break;
        }
        seat.release()?;
        tally.completed += 1;
    }

    Ok(tally)
}

/// Whether `reason` counts as a rejection rather than the end of the run
fn is_load_rejection(reason: RejectReason) -> bool {
    matches!(reason, RejectReason::QueueFull | RejectReason::ConcurrencyLimit)
}
