//! Application engine: wires together the forwarder, activity clock,
//! lifecycle controller, and event consumer for one configured application.

mod tcp;
mod udp;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::activity::ActivityClock;
use crate::config::{ApplicationConfig, Protocol};
use crate::error::EngineResult;
use crate::lifecycle::LifecycleController;
use crate::runtime::{RuntimeClient, RuntimeClientPool};

pub struct Application {
    pub config: ApplicationConfig,
    pub activity_clock: Arc<ActivityClock>,
    pub lifecycle: Arc<LifecycleController>,
    pub cancel: CancellationToken,
}

impl Application {
    pub fn new(
        config: ApplicationConfig,
        pool: &RuntimeClientPool,
        parent_cancel: &CancellationToken,
    ) -> EngineResult<(Arc<Self>, Arc<RuntimeClient>)> {
        let cancel = parent_cancel.child_token();
        let client = pool.get_client(&config.socket_uri, cancel.clone())?;
        let activity_clock = Arc::new(ActivityClock::new());
        let lifecycle = Arc::new(LifecycleController::new(
            client.runtime.clone(),
            &config,
            activity_clock.clone(),
        ));

        Ok((
            Arc::new(Self {
                config,
                activity_clock,
                lifecycle,
                cancel,
            }),
            client,
        ))
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.config.container_name, self.config.listen_port)
    }

    /// Spawns every background task this engine needs and returns their handles.
    pub fn spawn(self: Arc<Self>, client: Arc<RuntimeClient>) -> EngineResult<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        handles.push(self.clone().spawn_activity_check_loop());
        handles.push(self.clone().spawn_event_consumer(client));

        let forwarder = match self.config.protocol {
            Protocol::Tcp => tcp::spawn(self.clone())?,
            Protocol::Udp => udp::spawn(self.clone())?,
        };
        handles.push(forwarder);

        info!(engine = %self.label(), "application engine started");
        Ok(handles)
    }

    fn spawn_activity_check_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.check_interval);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        debug!(engine = %self.label(), "activity check loop stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.lifecycle.do_activity_check().await;
                    }
                }
            }
        })
    }

    fn spawn_event_consumer(self: Arc<Self>, client: Arc<RuntimeClient>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut receiver = client.subscribe();
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        debug!(engine = %self.label(), "event consumer stopping");
                        return;
                    }
                    event = receiver.recv() => {
                        match event {
                            Ok(event) => self.lifecycle.handle_event(&event).await,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!(engine = %self.label(), skipped, "event consumer lagged");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                        }
                    }
                }
            }
        })
    }
}
