//! Broadcast bus for `EngineEvent`s.
//!
//! Publishing never blocks and never fails: with no subscribers the event is
//! dropped, and a slow subscriber loses the oldest events rather than holding
//! up the run. `subscribe_run` narrows a subscription to one run and ends it
//! at that run's terminal event.

use taskloom_types::event::EngineEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Every event published from now on, for all runs.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Events of `run_id` only, up to and including its terminal event.
    pub fn subscribe_run(&self, run_id: Uuid) -> RunEvents {
        RunEvents {
            run_id,
            rx: self.sender.subscribe(),
            finished: false,
            skipped: 0,
        }
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

/// A subscription narrowed to a single run.
pub struct RunEvents {
    run_id: Uuid,
    rx: broadcast::Receiver<EngineEvent>,
    finished: bool,
    skipped: u64,
}

impl RunEvents {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Events lost because this subscriber fell behind.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// The run's next event. `None` once its terminal event has been
    /// delivered or the bus is gone.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(event) if event.run_id() == self.run_id => {
                    self.finished = event.is_terminal();
                    return Some(event);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    self.skipped += n;
                    tracing::debug!(run_id = %self.run_id, skipped = n, "event subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(run_id: Uuid) -> EngineEvent {
        EngineEvent::RunStarted {
            run_id,
            process_name: "demo".to_string(),
            resumed: false,
        }
    }

    fn step_started(run_id: Uuid, step_id: &str) -> EngineEvent {
        EngineEvent::StepStarted {
            run_id,
            step_id: step_id.to_string(),
            step_type: "task".to_string(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_each_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.clone().subscribe();

        bus.publish(started(Uuid::now_v7()));

        assert!(matches!(rx1.recv().await.unwrap(), EngineEvent::RunStarted { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), EngineEvent::RunStarted { .. }));
    }

    #[test]
    fn publishing_without_subscribers_is_a_no_op() {
        let bus = EventBus::new(2);
        for _ in 0..5 {
            bus.publish(started(Uuid::now_v7()));
        }
    }

    #[tokio::test]
    async fn run_subscription_filters_and_stops_at_terminal_event() {
        let bus = EventBus::new(16);
        let mine = Uuid::now_v7();
        let other = Uuid::now_v7();
        let mut events = bus.subscribe_run(mine);

        bus.publish(started(other));
        bus.publish(started(mine));
        bus.publish(step_started(other, "x"));
        bus.publish(step_started(mine, "a"));
        bus.publish(EngineEvent::RunCancelled { run_id: mine });
        bus.publish(step_started(mine, "late"));

        assert!(matches!(events.next().await, Some(EngineEvent::RunStarted { run_id, .. }) if run_id == mine));
        assert!(matches!(events.next().await, Some(EngineEvent::StepStarted { step_id, .. }) if step_id == "a"));
        assert!(matches!(events.next().await, Some(EngineEvent::RunCancelled { .. })));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn lagging_run_subscription_counts_skipped_events() {
        let bus = EventBus::new(2);
        let run_id = Uuid::now_v7();
        let mut events = bus.subscribe_run(run_id);

        for i in 0..6 {
            bus.publish(step_started(run_id, &format!("s{i}")));
        }

        let next = events.next().await;
        assert!(matches!(next, Some(EngineEvent::StepStarted { .. })));
        assert!(events.skipped() > 0);
    }

    #[tokio::test]
    async fn run_subscription_ends_when_bus_is_dropped() {
        let bus = EventBus::new(4);
        let mut events = bus.subscribe_run(Uuid::now_v7());
        drop(bus);
        assert!(events.next().await.is_none());
    }
}
