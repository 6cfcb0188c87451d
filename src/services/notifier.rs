use {
    crate::{
        config::NotifyConfig,
        domain::{account::EventSummary, ports::NotificationSink},
    },
    std::sync::Arc,
    tokio::sync::{mpsc, watch},
};

/// Producer side of the notification queue. Enqueueing never waits: the
/// webhook acknowledgment must not depend on chat/email delivery.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<EventSummary>,
}

impl NotificationQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EventSummary>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, summary: EventSummary) {
        match self.tx.try_send(summary) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(s)) => {
                tracing::warn!(account_id = %s.account_id, event = %s.event, "notification queue full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(s)) => {
                tracing::warn!(account_id = %s.account_id, event = %s.event, "notifier stopped, dropping");
            }
        }
    }
}

/// Drains the queue into `sink`, retrying each notification with
/// exponential backoff.
pub async fn run_notifier(
    mut rx: mpsc::Receiver<EventSummary>,
    sink: Arc<dyn NotificationSink>,
    config: NotifyConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("notifier started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!(pending = rx.len(), "notifier shutting down");
                return;
            }
            next = rx.recv() => match next {
                Some(summary) => deliver(&*sink, &summary, &config).await,
                None => {
                    tracing::info!("notification queue closed");
                    return;
                }
            },
        }
    }
}

async fn deliver(sink: &dyn NotificationSink, summary: &EventSummary, config: &NotifyConfig) {
    let max_attempts = config.max_attempts.max(1);
    let mut backoff = config.base_backoff;

    for attempt in 1..=max_attempts {
        match sink.notify(summary).await {
            Ok(()) => return,
            Err(e) if attempt == max_attempts => {
                tracing::error!(account_id = %summary.account_id, attempt, error = %e, "notification failed, giving up");
            }
            Err(e) => {
                tracing::warn!(account_id = %summary.account_id, attempt, error = %e, "notification failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }
    }
}
