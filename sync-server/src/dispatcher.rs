//! Delivery worker pool.
//!
//! A bounded queue feeds a fixed number of worker tasks. Enqueueing never
//! blocks the caller: request handlers and the scheduler hand work over and
//! return. Everything queued is also durable in storage, so a full queue or
//! a crash only delays work until the next re-drive pass.

use crate::config::DispatcherConfig;
use crate::delivery::{DeliveryEngine, DeliveryTask, Followup, TaskKey};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// First wait before re-offering a follow-up to a full queue.
const REQUEUE_BASE_DELAY: Duration = Duration::from_millis(50);
/// Longest wait between re-offers.
const REQUEUE_MAX_DELAY: Duration = Duration::from_secs(2);
/// Re-offers before a follow-up is left to re-drive.
const REQUEUE_ATTEMPTS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueue {
    Queued,
    Duplicate,
    Full,
}

/// Handle for enqueueing delivery work.
///
/// Cheap to clone; clones feed the same queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<DeliveryTask>,
    queued: Arc<DashMap<TaskKey, ()>>,
}

impl Dispatcher {
    /// Spawn the worker pool.
    ///
    /// Returns the dispatcher and the worker handles.
    pub fn spawn(
        engine: Arc<DeliveryEngine>,
        config: &DispatcherConfig,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let dispatcher = Self {
            sender,
            queued: Arc::new(DashMap::new()),
        };

        let receiver = Arc::new(Mutex::new(receiver));
        let workers = config.workers.max(1);
        let handles = (0..workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    receiver.clone(),
                    engine.clone(),
                    dispatcher.clone(),
                ))
            })
            .collect();

        tracing::info!(
            "Dispatcher started ({} workers, queue capacity {})",
            workers,
            config.queue_capacity
        );

        (dispatcher, handles)
    }

    /// Enqueue a task.
    ///
    /// Returns `false` if an identical task is already queued or the queue
    /// is full.
    pub fn dispatch(&self, task: DeliveryTask) -> bool {
        self.enqueue(task) == Enqueue::Queued
    }

    fn enqueue(&self, task: DeliveryTask) -> Enqueue {
        let key = task.key();
        if self.queued.insert(key.clone(), ()).is_some() {
            tracing::debug!(?key, "Task already queued");
            return Enqueue::Duplicate;
        }

        match self.sender.try_send(task) {
            Ok(()) => Enqueue::Queued,
            Err(e) => {
                self.queued.remove(&key);
                tracing::warn!(?key, "Could not enqueue delivery task: {}", e);
                Enqueue::Full
            }
        }
    }

    /// Enqueue a task once its delay has passed.
    ///
    /// The wait runs on its own timer task so no worker is held up. While
    /// the queue is full the task is offered again with a growing pause;
    /// after repeated refusals it is left to re-drive.
    pub fn schedule(&self, followup: Followup) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(followup.delay).await;

            let key = followup.task.key();
            let mut pause = REQUEUE_BASE_DELAY;
            for _ in 0..REQUEUE_ATTEMPTS {
                match dispatcher.enqueue(followup.task.clone()) {
                    Enqueue::Queued | Enqueue::Duplicate => return,
                    Enqueue::Full => {
                        tokio::time::sleep(pause).await;
                        pause = (pause * 2).min(REQUEUE_MAX_DELAY);
                    }
                }
            }

            tracing::error!(?key, "Queue stayed full; follow-up left to re-drive");
        });
    }

    /// Number of tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<DeliveryTask>>>,
    engine: Arc<DeliveryEngine>,
    dispatcher: Dispatcher,
) {
    loop {
        let task = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };

        let Some(task) = task else {
            break;
        };

        // Released before running so the same work can be queued again
        // while this attempt is in flight.
        dispatcher.queued.remove(&task.key());

        match engine.run(task).await {
            Ok(Some(followup)) => dispatcher.schedule(followup),
            Ok(None) => {}
            Err(e) => tracing::error!(worker, "Delivery task aborted: {}", e),
        }
    }

    tracing::debug!(worker, "Delivery worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServiceMetrics;
    use crate::storage::{ChangeLog, SqliteStorage};
    use std::time::Duration;
    use sync_client::{BulkClient, MockTransport, PartnerClient};
    use sync_core::{Backoff, RetryPolicy};
    use sync_types::{Operation, SubjectId, SyncJobId};

    async fn engine(transport: &MockTransport, storage: Arc<SqliteStorage>) -> Arc<DeliveryEngine> {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_millis(10)),
        };
        Arc::new(DeliveryEngine::new(
            storage,
            PartnerClient::new(Arc::new(transport.clone()), "http://partner"),
            BulkClient::new(Arc::new(transport.clone()), "http://peer"),
            policy,
            policy,
            Duration::from_secs(300),
            Arc::new(ServiceMetrics::default()),
        ))
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn duplicate_tasks_are_not_queued_twice() {
        // No workers are draining this queue.
        let (sender, _receiver) = mpsc::channel(8);
        let dispatcher = Dispatcher {
            sender,
            queued: Arc::new(DashMap::new()),
        };
        let job_id = SyncJobId::new();

        assert!(dispatcher.dispatch(DeliveryTask::DeliverJob { job_id }));
        assert!(!dispatcher.dispatch(DeliveryTask::DeliverJob { job_id }));
        assert_eq!(dispatcher.queued(), 1);
    }

    #[tokio::test]
    async fn full_queue_rejects_and_forgets_key() {
        let (sender, _receiver) = mpsc::channel(1);
        let dispatcher = Dispatcher {
            sender,
            queued: Arc::new(DashMap::new()),
        };

        assert!(dispatcher.dispatch(DeliveryTask::DeliverJob {
            job_id: SyncJobId::new()
        }));
        assert!(!dispatcher.dispatch(DeliveryTask::DeliverJob {
            job_id: SyncJobId::new()
        }));
        assert_eq!(dispatcher.queued(), 1);
    }

    #[tokio::test]
    async fn followup_waits_for_room_in_full_queue() {
        let (sender, mut receiver) = mpsc::channel(1);
        let dispatcher = Dispatcher {
            sender,
            queued: Arc::new(DashMap::new()),
        };
        let blocking = SyncJobId::new();
        let retried = SyncJobId::new();

        assert!(dispatcher.dispatch(DeliveryTask::DeliverJob { job_id: blocking }));
        dispatcher.schedule(Followup {
            delay: Duration::ZERO,
            task: DeliveryTask::DeliverJob { job_id: retried },
        });

        // The follow-up is refused while the only slot is taken.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(dispatcher.queued(), 1);

        let first = receiver.recv().await.unwrap();
        assert_eq!(first, DeliveryTask::DeliverJob { job_id: blocking });
        dispatcher.queued.remove(&first.key());

        let second = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("follow-up should be re-offered")
            .unwrap();
        assert_eq!(second, DeliveryTask::DeliverJob { job_id: retried });
    }

    #[tokio::test]
    async fn workers_deliver_queued_changes() {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let transport = MockTransport::new();
        let engine = engine(&transport, storage.clone()).await;
        let (dispatcher, handles) = Dispatcher::spawn(engine, &DispatcherConfig::default());

        for cv in ["a", "b", "c"] {
            storage
                .record(&SubjectId::new(cv), Operation::Delete, None)
                .await
                .unwrap();
            dispatcher.dispatch(DeliveryTask::DeliverChange {
                subject: SubjectId::new(cv),
                operation: Operation::Delete,
            });
        }

        wait_for(|| transport.sent_count() == 3).await;
        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn retry_delay_does_not_stall_other_work() {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let transport = MockTransport::new();
        let engine = engine(&transport, storage.clone()).await;
        let config = DispatcherConfig {
            workers: 1,
            ..DispatcherConfig::default()
        };
        let (dispatcher, handles) = Dispatcher::spawn(engine, &config);

        // First change fails once and waits for its retry timer; the second
        // must still go out on the single worker in the meantime.
        transport.queue_status(500, "boom");
        for cv in ["slow", "fast"] {
            storage
                .record(&SubjectId::new(cv), Operation::Delete, None)
                .await
                .unwrap();
            dispatcher.dispatch(DeliveryTask::DeliverChange {
                subject: SubjectId::new(cv),
                operation: Operation::Delete,
            });
        }

        wait_for(|| transport.sent_count() == 3).await;
        let order: Vec<_> = transport
            .sent_requests()
            .iter()
            .map(|r| r.body["cvId"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(order, vec!["slow", "fast", "slow"]);

        for handle in handles {
            handle.abort();
        }
    }
}
