//! Producer state owned by the producer task

use crate::config::ProducerConfig;
use crate::queue::QueueName;
use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Demand-tracking state of a producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DemandState {
    /// No outstanding demand and no pending retry
    #[default]
    Idle,
    /// Demand outstanding; the last dequeue was empty and a retry is scheduled
    AwaitingMessages,
    /// Demand outstanding; the queue had messages and is drained again right away
    Draining,
}

/// Snapshot published after every event the producer handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProducerStatus {
    pub state: DemandState,
    /// Items requested by the pipeline and not yet delivered
    pub demand: usize,
    pub running: bool,
}

/// Scheduled dequeue retry
///
/// Fires are matched by generation, so a superseded timer that fires anyway is ignored.
#[derive(Debug)]
pub(crate) struct DequeueTimer {
    generation: u64,
    delay: Duration,
    task: Option<JoinHandle<()>>,
}

impl DequeueTimer {
    pub(crate) fn new(generation: u64, delay: Duration, task: Option<JoinHandle<()>>) -> Self {
        Self {
            generation,
            delay,
            task,
        }
    }

    fn cancel(self) {
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

/// Mutable producer state
///
/// Only the producer's event loop holds this value; nothing else can observe or change
/// `demand` or the timer except through the published [`ProducerStatus`].
pub(crate) struct ProducerState {
    pub(crate) client_id: String,
    pub(crate) config: ProducerConfig,
    pub(crate) demand: usize,
    pub(crate) dequeue_timer: Option<DequeueTimer>,
    pub(crate) queue: QueueName,
    next_generation: u64,
}

impl ProducerState {
    pub(crate) fn new(client_id: String, config: ProducerConfig, queue: QueueName) -> Self {
        Self {
            client_id,
            config,
            demand: 0,
            dequeue_timer: None,
            queue,
            next_generation: 0,
        }
    }

    pub(crate) fn add_demand(&mut self, additional: usize) {
        self.demand = self.demand.saturating_add(additional);
    }

    /// Record `delivered` messages against outstanding demand
    pub(crate) fn satisfy(&mut self, delivered: usize) {
        debug_assert!(delivered <= self.demand);
        self.demand -= delivered.min(self.demand);
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Install a new timer, cancelling any pending one
    pub(crate) fn set_timer(&mut self, timer: DequeueTimer) {
        self.cancel_timer();
        self.dequeue_timer = Some(timer);
    }

    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.dequeue_timer.take() {
            timer.cancel();
        }
    }

    /// Consume the pending timer if `generation` is the current one
    pub(crate) fn fire_timer(&mut self, generation: u64) -> bool {
        match self.dequeue_timer {
            Some(ref timer) if timer.generation == generation => {
                self.dequeue_timer = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn demand_state(&self) -> DemandState {
        match (self.demand, &self.dequeue_timer) {
            (0, _) => DemandState::Idle,
            (_, Some(timer)) if !timer.delay.is_zero() => DemandState::AwaitingMessages,
            _ => DemandState::Draining,
        }
    }

    pub(crate) fn status(&self, running: bool) -> ProducerStatus {
        ProducerStatus {
            state: self.demand_state(),
            demand: self.demand,
            running,
        }
    }
}
