//! Log consumer that keeps every event for later inspection

use async_trait::async_trait;
use netflow_receiver::{ConsumerError, LogConsumer, LogEvent};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
pub struct CollectingConsumer {
    events: Mutex<Vec<LogEvent>>,
    batches: Mutex<usize>,
    notify: Notify,
}

impl CollectingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn batches(&self) -> usize {
        *self.batches.lock().unwrap()
    }

    /// Wait until at least `count` events arrived, returning what was collected
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<LogEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            {
                let events = self.events.lock().unwrap();
                if events.len() >= count {
                    return events.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.events();
            }
        }
    }
}

#[async_trait]
impl LogConsumer for CollectingConsumer {
    async fn consume(&self, batch: Vec<LogEvent>) -> Result<(), ConsumerError> {
        self.events.lock().unwrap().extend(batch);
        *self.batches.lock().unwrap() += 1;
        self.notify.notify_waiters();
        Ok(())
    }
}
