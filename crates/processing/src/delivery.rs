//! The remote delivery port.
//!
//! The processor never talks to the network: for every non-local audience
//! recipient it enqueues a job carrying the activity and the recipient
//! inbox IRI. Delivery is always asynchronous; enqueueing acknowledges the
//! job, and the worker drains the bounded queue in the background. Retry
//! policy is the delivery subsystem's concern, not the processor's.

use async_trait::async_trait;
use postbox_core::{Activity, Iri};
use tokio::sync::{mpsc, watch};

/// A single delivery job.
#[derive(Clone, Debug)]
pub struct DeliveryJob {
    pub activity: Activity,
    pub inbox: Iri,
}

/// The delivery contract the processor depends on.
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Hand an activity to the delivery subsystem for the given remote
    /// inbox. Returning `Ok` acknowledges acceptance, not completion.
    async fn deliver(&self, activity: Activity, inbox: Iri) -> Result<(), String>;
}

/// Bounded-queue delivery front: jobs are acknowledged on enqueue and
/// drained by a worker task.
pub struct QueuedDelivery {
    sender: mpsc::Sender<DeliveryJob>,
}

impl QueuedDelivery {
    /// Spawn the worker and return the queue front. `sink` performs the
    /// actual transport; the worker stops when `shutdown` flips to true.
    pub fn spawn(
        capacity: usize,
        sink: std::sync::Arc<dyn Deliver>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<DeliveryJob>(capacity);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    job = receiver.recv() => {
                        let Some(job) = job else { break };
                        let inbox = job.inbox.clone();
                        if let Err(e) = sink.deliver(job.activity, job.inbox).await {
                            tracing::warn!(inbox = %inbox, error = %e, "delivery failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("delivery worker stopping");
                            break;
                        }
                    }
                }
            }
        });
        QueuedDelivery { sender }
    }
}

#[async_trait]
impl Deliver for QueuedDelivery {
    async fn deliver(&self, activity: Activity, inbox: Iri) -> Result<(), String> {
        self.sender
            .send(DeliveryJob { activity, inbox })
            .await
            .map_err(|_| "delivery queue closed".to_string())
    }
}

/// A delivery sink that drops jobs on the floor, logging them. Used when
/// outbound federation is not configured.
pub struct NullDelivery;

#[async_trait]
impl Deliver for NullDelivery {
    async fn deliver(&self, activity: Activity, inbox: Iri) -> Result<(), String> {
        tracing::debug!(
            activity = %activity.id().map(|i| i.as_str()).unwrap_or("<unassigned>"),
            inbox = %inbox,
            "outbound federation disabled, dropping delivery"
        );
        Ok(())
    }
}
