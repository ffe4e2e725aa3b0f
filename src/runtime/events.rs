//! Multiplexes one runtime's event stream to every engine subscribed to it.
//!
//! Grounded on the broadcast-based pub/sub of the teacher's event bus, with
//! the producer side replaced by a reconnecting subscription to the
//! container runtime's own event stream instead of in-process publishers.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{ContainerEvent, ContainerRuntime};

const CHANNEL_CAPACITY: usize = 1024;

/// One long-lived subscription to a runtime's event stream, fanned out to
/// any number of engines via a broadcast channel.
pub struct EventMonitor {
    sender: broadcast::Sender<ContainerEvent>,
}

impl EventMonitor {
    /// Spawns the background dispatch task and returns a handle to subscribe from.
    pub fn spawn(runtime: Arc<dyn ContainerRuntime>, cancel: CancellationToken) -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        let dispatch_sender = sender.clone();

        tokio::spawn(async move {
            run_dispatch_loop(runtime, dispatch_sender, cancel).await;
        });

        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.sender.subscribe()
    }
}

async fn run_dispatch_loop(
    runtime: Arc<dyn ContainerRuntime>,
    sender: broadcast::Sender<ContainerEvent>,
    cancel: CancellationToken,
) {
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(1))
        .with_max_interval(Duration::from_secs(30))
        .with_max_elapsed_time(None)
        .build();

    loop {
        if cancel.is_cancelled() {
            return;
        }

        info!("subscribing to container runtime event stream");
        let mut stream = runtime.monitor_events();
        backoff.reset();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => {
                    match next {
                        Some(event) => {
                            debug!(kind = %event.kind, id = %event.id, status = %event.status, "container event");
                            let _ = sender.send(event);
                        }
                        None => {
                            let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                            warn!(?delay, "event stream ended, reconnecting");
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                _ = tokio::time::sleep(delay) => {}
                            }
                            break;
                        }
                    }
                }
            }
        }
    }
}
