//! Lifecycle Controller: keeps `is_inactive` aligned with observed traffic,
//! coalesces concurrent wake attempts into a single wake per cycle, and
//! reconciles against out-of-band container state changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityClock;
use crate::config::{ApplicationConfig, InactiveAction};
use crate::group;
use crate::runtime::{ContainerEvent, ContainerRuntime};

const HEALTHCHECK_CAP: Duration = Duration::from_secs(5 * 60);

type WakeFuture = Shared<BoxFuture<'static, bool>>;

pub struct LifecycleController {
    runtime: Arc<dyn ContainerRuntime>,
    container_name: String,
    apply_to_compose_group: bool,
    inactive_action: InactiveAction,
    inactive_after: Duration,
    startup_delay: Duration,
    healthcheck_enabled: bool,
    healthcheck_interval: Duration,
    activity_clock: Arc<ActivityClock>,
    is_inactive: AtomicBool,
    wake_in_flight: Mutex<Option<WakeFuture>>,
}

impl LifecycleController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: &ApplicationConfig,
        activity_clock: Arc<ActivityClock>,
    ) -> Self {
        Self {
            runtime,
            container_name: config.container_name.clone(),
            apply_to_compose_group: config.apply_to_compose_group,
            inactive_action: config.inactive_action,
            inactive_after: config.inactive_after,
            startup_delay: config.startup_delay,
            healthcheck_enabled: config.healthcheck_enabled,
            healthcheck_interval: config.healthcheck_interval,
            activity_clock,
            is_inactive: AtomicBool::new(true),
            wake_in_flight: Mutex::new(None),
        }
    }

    pub fn is_inactive(&self) -> bool {
        self.is_inactive.load(Ordering::SeqCst)
    }

    /// Called before forwarding. Returns `true` iff the container group is
    /// confirmed live, joining an in-progress wake if one is underway.
    pub async fn ensure_running(self: &Arc<Self>, cancel: CancellationToken) -> bool {
        if !self.is_inactive.load(Ordering::SeqCst) {
            return true;
        }

        let wake = {
            let mut guard = self.wake_in_flight.lock();
            match guard.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let started = self.spawn_wake();
                    *guard = Some(started.clone());
                    started
                }
            }
        };

        tokio::select! {
            result = wake => result,
            _ = cancel.cancelled() => false,
        }
    }

    /// Spawns the master wake task and returns a cloneable handle to its
    /// eventual result. The task runs to completion independent of whether
    /// any particular waiter is still awaiting it.
    fn spawn_wake(self: &Arc<Self>) -> WakeFuture {
        let controller = self.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let result = controller.perform_wake().await;
            let _ = tx.send(result);
            let mut guard = controller.wake_in_flight.lock();
            *guard = None;
        });

        async move { rx.await.unwrap_or(false) }.boxed().shared()
    }

    async fn perform_wake(&self) -> bool {
        let ids = match self.resolve_group().await {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => {
                warn!(container_name = %self.container_name, "wake: no matching container");
                return false;
            }
            Err(e) => {
                error!(container_name = %self.container_name, error = %e, "wake: failed to resolve group");
                return false;
            }
        };

        info!(container_name = %self.container_name, "waking container group");

        let mut acted = false;
        for id in &ids {
            let state = match self.runtime.inspect_container(id).await {
                Ok(state) => state,
                Err(e) => {
                    error!(%id, error = %e, "wake: inspect failed");
                    return false;
                }
            };

            if state.paused {
                if let Err(e) = self.runtime.unpause_container(id).await {
                    error!(%id, error = %e, "wake: unpause failed");
                    return false;
                }
                acted = true;
            } else if !state.running {
                match self.runtime.start_container(id).await {
                    Ok(true) => acted = true,
                    Ok(false) => {
                        warn!(%id, "wake: start did not start the container");
                        return false;
                    }
                    Err(e) => {
                        error!(%id, error = %e, "wake: start failed");
                        return false;
                    }
                }
            }
        }

        if acted {
            tokio::time::sleep(self.startup_delay).await;
        }

        if self.healthcheck_enabled && !self.wait_for_healthy(&ids[0]).await {
            warn!(container_name = %self.container_name, "wake: healthcheck did not pass in time");
            return false;
        }

        self.is_inactive.store(false, Ordering::SeqCst);
        true
    }

    async fn wait_for_healthy(&self, id: &str) -> bool {
        let deadline = Instant::now() + HEALTHCHECK_CAP;
        loop {
            if let Ok(state) = self.runtime.inspect_container(id).await {
                let healthy = state.running
                    && state
                        .health
                        .as_deref()
                        .map_or(true, |status| status == "healthy");
                if healthy {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.healthcheck_interval).await;
        }
    }

    /// Runs on a timer. Suspends the group once idle for `inactive_after`,
    /// re-asserting suspension even if already believed inactive.
    pub async fn do_activity_check(&self) {
        if self.activity_clock.elapsed() < self.inactive_after {
            return;
        }

        let ids = match self.resolve_group().await {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => return,
            Err(e) => {
                warn!(container_name = %self.container_name, error = %e, "activity check: failed to resolve group");
                return;
            }
        };

        if self.is_inactive.load(Ordering::SeqCst) {
            debug!(container_name = %self.container_name, "re-asserting suspended state");
        } else {
            info!(container_name = %self.container_name, "suspending idle container group");
        }

        for id in &ids {
            let result = match self.inactive_action {
                InactiveAction::Pause => self.runtime.pause_container(id).await,
                InactiveAction::Stop => self.runtime.stop_container(id).await,
            };
            if let Err(e) = result {
                warn!(%id, error = %e, "activity check: suspend action failed");
            }
        }

        self.is_inactive.store(true, Ordering::SeqCst);
        self.activity_clock.mark();
    }

    /// Reconciles `is_inactive` against an externally observed container event.
    pub async fn handle_event(&self, event: &ContainerEvent) {
        let ids = match self.resolve_group().await {
            Ok(ids) => ids,
            Err(_) => return,
        };
        if !ids.contains(&event.id) {
            return;
        }

        let currently_live = !self.is_inactive.load(Ordering::SeqCst);

        match event.status.as_str() {
            "die" | "kill" | "stop" | "pause" if currently_live => {
                self.is_inactive.store(true, Ordering::SeqCst);
            }
            "health_status" if currently_live && self.healthcheck_enabled => {
                if let Ok(state) = self.runtime.inspect_container(&event.id).await {
                    let healthy = state
                        .health
                        .as_deref()
                        .map_or(true, |status| status == "healthy");
                    if !healthy {
                        self.is_inactive.store(true, Ordering::SeqCst);
                    }
                }
            }
            "unpause" | "start" | "restart" if !currently_live => {
                let wake_in_flight = self.wake_in_flight.lock().is_some();
                if !wake_in_flight {
                    self.is_inactive.store(true, Ordering::SeqCst);
                }
            }
            _ => {}
        }
    }

    async fn resolve_group(&self) -> crate::error::RuntimeResult<Vec<String>> {
        group::resolve(
            &*self.runtime,
            &self.container_name,
            self.apply_to_compose_group,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::stream::{self, BoxStream};
    use futures_util::StreamExt;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use crate::error::RuntimeResult;
    use crate::runtime::{ContainerInfo, ContainerState};

    struct FakeRuntime {
        container_id: String,
        running: AtomicBool,
        paused: AtomicBool,
        start_calls: AtomicUsize,
        start_should_fail: bool,
    }

    impl FakeRuntime {
        fn new(container_id: &str, running: bool, paused: bool) -> Self {
            Self {
                container_id: container_id.to_string(),
                running: AtomicBool::new(running),
                paused: AtomicBool::new(paused),
                start_calls: AtomicUsize::new(0),
                start_should_fail: false,
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn list_containers(&self, _all: bool) -> RuntimeResult<Vec<ContainerInfo>> {
            Ok(vec![ContainerInfo {
                id: self.container_id.clone(),
                names: vec!["/svc".to_string()],
                labels: HashMap::new(),
            }])
        }

        async fn inspect_container(&self, _id: &str) -> RuntimeResult<ContainerState> {
            Ok(ContainerState {
                running: self.running.load(Ordering::SeqCst),
                paused: self.paused.load(Ordering::SeqCst),
                health: None,
            })
        }

        async fn pause_container(&self, _id: &str) -> RuntimeResult<()> {
            self.paused.store(true, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn unpause_container(&self, _id: &str) -> RuntimeResult<()> {
            self.paused.store(false, Ordering::SeqCst);
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn start_container(&self, _id: &str) -> RuntimeResult<bool> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            if self.start_should_fail {
                return Ok(false);
            }
            let was_running = self.running.swap(true, Ordering::SeqCst);
            Ok(!was_running)
        }

        async fn stop_container(&self, _id: &str) -> RuntimeResult<()> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn monitor_events(&self) -> BoxStream<'static, ContainerEvent> {
            stream::empty().boxed()
        }
    }

    fn test_config() -> ApplicationConfig {
        ApplicationConfig {
            socket_uri: "unix:///var/run/docker.sock".to_string(),
            container_name: "svc".to_string(),
            apply_to_compose_group: false,
            protocol: crate::config::Protocol::Tcp,
            listen_port: 5000,
            target_address: "127.0.0.1".to_string(),
            target_port: 5001,
            inactive_after: Duration::from_millis(50),
            check_interval: Duration::from_millis(10),
            inactive_action: InactiveAction::Pause,
            startup_delay: Duration::from_millis(1),
            healthcheck_enabled: false,
            healthcheck_interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn ensure_running_fast_path_when_already_live() {
        let runtime = Arc::new(FakeRuntime::new("c1", true, false));
        let clock = Arc::new(ActivityClock::new());
        let controller = Arc::new(LifecycleController::new(runtime, &test_config(), clock));
        controller.is_inactive.store(false, Ordering::SeqCst);

        let ok = controller.ensure_running(CancellationToken::new()).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn ensure_running_unpauses_paused_container() {
        let runtime = Arc::new(FakeRuntime::new("c1", false, true));
        let clock = Arc::new(ActivityClock::new());
        let controller = Arc::new(LifecycleController::new(runtime.clone(), &test_config(), clock));

        let ok = controller.ensure_running(CancellationToken::new()).await;
        assert!(ok);
        assert!(!controller.is_inactive());
        assert!(!runtime.paused.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn concurrent_ensure_running_calls_start_once() {
        let runtime = Arc::new(FakeRuntime::new("c1", false, false));
        let clock = Arc::new(ActivityClock::new());
        let controller = Arc::new(LifecycleController::new(runtime.clone(), &test_config(), clock));

        let a = controller.clone();
        let b = controller.clone();
        let (ra, rb) = tokio::join!(
            a.ensure_running(CancellationToken::new()),
            b.ensure_running(CancellationToken::new())
        );

        assert!(ra);
        assert!(rb);
        assert_eq!(runtime.start_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn activity_check_suspends_after_idle() {
        let runtime = Arc::new(FakeRuntime::new("c1", true, false));
        let clock = Arc::new(ActivityClock::new());
        clock.mark();
        let controller = LifecycleController::new(runtime.clone(), &test_config(), clock);
        controller.is_inactive.store(false, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(80)).await;
        controller.do_activity_check().await;

        assert!(controller.is_inactive());
        assert!(runtime.paused.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn ensure_running_fails_when_start_does_not_start_the_container() {
        let mut runtime = FakeRuntime::new("c1", false, false);
        runtime.start_should_fail = true;
        let runtime = Arc::new(runtime);
        let clock = Arc::new(ActivityClock::new());
        let controller = Arc::new(LifecycleController::new(runtime, &test_config(), clock));

        let ok = controller.ensure_running(CancellationToken::new()).await;

        assert!(!ok);
        assert!(controller.is_inactive());
    }
}
