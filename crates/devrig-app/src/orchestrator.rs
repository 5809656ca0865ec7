//! Session orchestration
//!
//! [`SessionOrchestrator::open`] resolves a device, registers the session,
//! decides between a fresh backend and joining a running one, and returns a
//! [`SessionHandle`]. While the handle lives a heartbeat task keeps the
//! registry entry fresh. [`SessionHandle::teardown`] runs exactly once and
//! closes the backend only when no other session still references the device.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use devrig_core::prelude::*;
use devrig_core::Device;
use devrig_driver::{BackendConnector, DriverAdapter, DriverOptions, OpenMode};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::Settings;
use crate::registry::{SessionRecord, SessionRegistry};
use crate::selector::{ConsoleView, DeviceSelector, DeviceSource, SelectionCriteria};
use crate::signals;

/// Opaque 128-bit session id, hex encoded
pub fn new_session_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Run blocking registry work off the async threads
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::registry(format!("Registry task failed: {}", e)))?
}

// ─────────────────────────────────────────────────────────────────
// Port ledger
// ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PortClaim {
    device_id: String,
    sessions: BTreeSet<String>,
}

/// Host ports claimed by this orchestrator's sessions
///
/// Sessions on the same device share a port; a port is freed when its last
/// session is released.
#[derive(Debug, Default)]
pub struct PortLedger {
    ports: Mutex<HashMap<u16, PortClaim>>,
}

impl PortLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, port: u16, device_id: &str, session_id: &str) -> Result<()> {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        let claim = ports.entry(port).or_insert_with(|| PortClaim {
            device_id: device_id.to_string(),
            sessions: BTreeSet::new(),
        });
        if !claim.device_id.eq_ignore_ascii_case(device_id) {
            return Err(Error::config(format!(
                "Host port {} is already forwarded to {}",
                port, claim.device_id
            )));
        }
        claim.sessions.insert(session_id.to_string());
        Ok(())
    }

    /// Drop the session's claims; returns the ports no longer held by anyone
    pub fn release_session(&self, session_id: &str) -> Vec<u16> {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        let mut freed = Vec::new();
        ports.retain(|port, claim| {
            claim.sessions.remove(session_id);
            let keep = !claim.sessions.is_empty();
            if !keep {
                freed.push(*port);
            }
            keep
        });
        freed.sort_unstable();
        freed
    }

    /// Device a port is forwarded to
    pub fn owner(&self, port: u16) -> Option<String> {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&port)
            .map(|claim| claim.device_id.clone())
    }
}

// ─────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────

pub struct SessionOrchestrator {
    connector: Arc<dyn BackendConnector>,
    registry: SessionRegistry,
    options: DriverOptions,
    heartbeat_interval: Duration,
    ports: Arc<PortLedger>,
}

impl SessionOrchestrator {
    pub fn new(
        connector: Arc<dyn BackendConnector>,
        registry: SessionRegistry,
        options: DriverOptions,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            connector,
            registry,
            options,
            heartbeat_interval,
            ports: Arc::new(PortLedger::new()),
        }
    }

    pub fn from_settings(connector: Arc<dyn BackendConnector>, settings: &Settings) -> Self {
        let registry = SessionRegistry::new(
            settings.session.resolved_registry_dir(),
            settings.session.heartbeat_expiry(),
        );
        Self::new(
            connector,
            registry,
            settings.driver.to_options(),
            settings.session.heartbeat_interval(),
        )
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn ports(&self) -> &PortLedger {
        &self.ports
    }

    /// Select a device for `criteria` and open a session on it
    pub async fn open<S: DeviceSource, R: BufRead, W: Write>(
        &self,
        selector: &mut DeviceSelector<S>,
        criteria: &SelectionCriteria,
        view: &mut ConsoleView<R, W>,
    ) -> Result<SessionHandle> {
        let device = selector.select(criteria, view).await?;
        self.open_device(device).await
    }

    /// Open a session on an already selected, connected device
    pub async fn open_device(&self, device: Device) -> Result<SessionHandle> {
        let record = SessionRecord::new(new_session_id(), device.platform, &device.instance_id);

        let joined = {
            let registry = self.registry.clone();
            let record = record.clone();
            blocking(move || registry.register_checked(&record)).await?
        };
        let mode = if joined { OpenMode::Join } else { OpenMode::Fresh };

        // Beat while the backend starts so a slow open does not go stale
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_heartbeat(
            self.registry.clone(),
            record.clone(),
            self.heartbeat_interval,
            stop_rx,
        );
        let heartbeat = Heartbeat { stop: stop_tx, task };

        let adapter = match self.start_adapter(device, &record, mode).await {
            Ok(adapter) => adapter,
            Err(e) => {
                heartbeat.stop(&record.session_id).await;
                self.ports.release_session(&record.session_id);
                let registry = self.registry.clone();
                let (platform, session_id) = (record.platform, record.session_id.clone());
                if let Err(cleanup) = blocking(move || registry.delete(platform, &session_id)).await {
                    warn!("Failed to unregister session {}: {}", record.session_id, cleanup);
                }
                return Err(e);
            }
        };

        info!(
            "Session {} opened on {} ({:?})",
            record.session_id, record.device_id, mode
        );

        Ok(SessionHandle {
            inner: Arc::new(SessionInner {
                record,
                mode,
                adapter: Arc::new(adapter),
                registry: self.registry.clone(),
                ports: self.ports.clone(),
                heartbeat: Mutex::new(Some(heartbeat)),
                torn_down: AtomicBool::new(false),
            }),
        })
    }

    async fn start_adapter(
        &self,
        device: Device,
        record: &SessionRecord,
        mode: OpenMode,
    ) -> Result<DriverAdapter> {
        if let Some(port) = self.options.host_port {
            self.ports.claim(port, &record.device_id, &record.session_id)?;
        }

        let client = self.connector.connect(&device).await?;
        let adapter = DriverAdapter::new(device, client, self.options.clone())?;
        if let Err(e) = adapter.open(mode).await {
            if mode == OpenMode::Fresh {
                adapter.close().await;
            }
            return Err(e);
        }
        Ok(adapter)
    }

    /// Run `f` inside a session that is torn down on return, error or termination signal
    pub async fn with_session<T, F, Fut>(&self, device: Device, f: F) -> Result<T>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let shutdown = async {
            if let Err(e) = signals::wait_for_signal().await {
                warn!("Signal handling unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        };
        self.with_session_until(device, shutdown, f).await
    }

    /// [`Self::with_session`] with a caller-supplied shutdown trigger
    pub async fn with_session_until<T, F, Fut, S>(&self, device: Device, shutdown: S, f: F) -> Result<T>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
        S: Future<Output = ()>,
    {
        let handle = self.open_device(device).await?;

        let result = tokio::select! {
            result = f(handle.clone()) => result,
            _ = shutdown => {
                info!("Session {} interrupted", handle.session_id());
                Err(Error::Interrupted)
            }
        };

        handle.teardown().await;
        result
    }
}

// ─────────────────────────────────────────────────────────────────
// Heartbeat
// ─────────────────────────────────────────────────────────────────

struct Heartbeat {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Signal the task and wait until it has exited
    async fn stop(self, session_id: &str) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("Heartbeat task for session {} ended abnormally: {}", session_id, e);
        }
    }
}

/// First beat one interval after registration, then every interval
///
/// A stop request is only observed between beats, so once the task has
/// finished no heartbeat write is in flight.
fn spawn_heartbeat(
    registry: SessionRegistry,
    record: SessionRecord,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let registry = registry.clone();
                    let beat = record.clone();
                    if let Err(e) = blocking(move || registry.heartbeat(&beat)).await {
                        warn!("Heartbeat for session {} failed: {}", record.session_id, e);
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Heartbeat for session {} stopped", record.session_id);
    })
}

// ─────────────────────────────────────────────────────────────────
// Session handle
// ─────────────────────────────────────────────────────────────────

struct SessionInner {
    record: SessionRecord,
    mode: OpenMode,
    adapter: Arc<DriverAdapter>,
    registry: SessionRegistry,
    ports: Arc<PortLedger>,
    heartbeat: Mutex<Option<Heartbeat>>,
    torn_down: AtomicBool,
}

/// A live session; clones share the same teardown
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.inner.record.session_id)
            .field("device", &self.inner.record.device_id)
            .field("mode", &self.inner.mode)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl SessionHandle {
    pub fn adapter(&self) -> &Arc<DriverAdapter> {
        &self.inner.adapter
    }

    pub fn session_id(&self) -> &str {
        &self.inner.record.session_id
    }

    pub fn mode(&self) -> OpenMode {
        self.inner.mode
    }

    pub fn device(&self) -> &Device {
        self.inner.adapter.device()
    }

    pub fn record(&self) -> &SessionRecord {
        &self.inner.record
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Release the session. Only the first call does anything and returns `true`.
    ///
    /// Steps run in order and each is best-effort: stop the heartbeat,
    /// unregister, release ports, then close the backend unless another
    /// session still references the device.
    pub async fn teardown(&self) -> bool {
        let inner = &self.inner;
        if inner.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        let session_id = inner.record.session_id.clone();
        let platform = inner.record.platform;
        let device_id = inner.record.device_id.clone();

        let heartbeat = inner
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop(&session_id).await;
        }

        let registry = inner.registry.clone();
        let id = session_id.clone();
        if let Err(e) = blocking(move || registry.delete(platform, &id)).await {
            warn!("Failed to unregister session {}: {}", session_id, e);
        }

        let freed = inner.ports.release_session(&session_id);
        if !freed.is_empty() {
            debug!("Released host ports {:?}", freed);
        }

        let registry = inner.registry.clone();
        let device = device_id.clone();
        let still_used = match blocking(move || registry.references_device(platform, &device)).await {
            Ok(used) => used,
            Err(e) => {
                warn!("Could not check other sessions on {}: {}", device_id, e);
                false
            }
        };

        if still_used {
            info!("Leaving {} connected for other sessions", device_id);
        } else {
            inner.adapter.close().await;
        }

        info!("Session {} torn down", session_id);
        true
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(
            "Session {} dropped without teardown, cleaning up",
            self.record.session_id
        );

        if let Some(heartbeat) = self
            .heartbeat
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = heartbeat.stop.send(true);
            heartbeat.task.abort();
        }

        let record = &self.record;
        if let Err(e) = self.registry.delete(record.platform, &record.session_id) {
            warn!("Failed to unregister session {}: {}", record.session_id, e);
        }
        self.ports.release_session(&record.session_id);

        let still_used = self
            .registry
            .references_device(record.platform, &record.device_id)
            .unwrap_or(false);
        if !still_used {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let adapter = self.adapter.clone();
                runtime.spawn(async move { adapter.close().await });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devrig_core::Platform;
    use devrig_driver::test_utils::{android_device, FakeBackend, FakeConnector};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _temp: TempDir,
        backend: Arc<FakeBackend>,
        connector: Arc<FakeConnector>,
        orchestrator: SessionOrchestrator,
    }

    fn fixture(options: DriverOptions, heartbeat: Duration) -> Fixture {
        fixture_with(FakeBackend::new(), options, heartbeat)
    }

    fn fixture_with(backend: FakeBackend, options: DriverOptions, heartbeat: Duration) -> Fixture {
        let temp = tempdir().unwrap();
        let backend = Arc::new(backend);
        let connector = Arc::new(FakeConnector::new(backend.clone()));
        let registry = SessionRegistry::new(temp.path(), Duration::from_secs(21));
        let orchestrator = SessionOrchestrator::new(connector.clone(), registry, options, heartbeat);
        Fixture {
            _temp: temp,
            backend,
            connector,
            orchestrator,
        }
    }

    fn quick_options() -> DriverOptions {
        DriverOptions {
            startup_timeout: Duration::from_millis(200),
            startup_poll: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[test]
    fn test_session_ids_are_unique_hex() {
        let a = new_session_id();
        let b = new_session_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_port_ledger_shares_per_device() {
        let ledger = PortLedger::new();
        ledger.claim(7001, "emulator-5554", "a").unwrap();
        ledger.claim(7001, "emulator-5554", "b").unwrap();
        assert!(ledger.claim(7001, "emulator-5556", "c").is_err());

        assert!(ledger.release_session("a").is_empty());
        assert_eq!(ledger.owner(7001).as_deref(), Some("emulator-5554"));
        assert_eq!(ledger.release_session("b"), vec![7001]);
        assert_eq!(ledger.owner(7001), None);
    }

    #[tokio::test]
    async fn test_first_session_fresh_second_joins() {
        let f = fixture(quick_options(), Duration::from_secs(5));

        let first = f.orchestrator.open_device(android_device("emulator-5554")).await.unwrap();
        let second = f.orchestrator.open_device(android_device("emulator-5554")).await.unwrap();

        assert_eq!(first.mode(), OpenMode::Fresh);
        assert_eq!(second.mode(), OpenMode::Join);
        assert_eq!(f.connector.connects(), 2);

        // Backend stays up while the first session still uses it
        assert!(second.teardown().await);
        assert_eq!(f.backend.count_calls("quit"), 0);

        assert!(first.teardown().await);
        assert_eq!(f.backend.count_calls("quit"), 1);
        assert!(f.orchestrator.registry().active_sessions(Platform::Android).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_runs_once_under_concurrent_calls() {
        let f = fixture(quick_options(), Duration::from_secs(5));
        let handle = f.orchestrator.open_device(android_device("emulator-5554")).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.teardown().await })
            })
            .collect();

        let mut ran = 0;
        for task in tasks {
            if task.await.unwrap() {
                ran += 1;
            }
        }

        assert_eq!(ran, 1);
        assert!(handle.is_torn_down());
        assert_eq!(f.backend.count_calls("quit"), 1);
        assert!(!handle.teardown().await);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_registry() {
        let f = fixture(quick_options(), Duration::from_millis(50));
        let handle = f.orchestrator.open_device(android_device("emulator-5554")).await.unwrap();
        let registered = handle.record().last_heartbeat_at;

        tokio::time::sleep(Duration::from_millis(300)).await;

        let sessions = f.orchestrator.registry().active_sessions(Platform::Android).unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].last_heartbeat_at > registered);

        handle.teardown().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(f.orchestrator.registry().active_sessions(Platform::Android).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_session_does_not_force_join() {
        let f = fixture(quick_options(), Duration::from_secs(5));
        let stale = SessionRecord {
            last_heartbeat_at: chrono::Utc::now() - chrono::Duration::seconds(120),
            ..SessionRecord::new("crashed", Platform::Android, "emulator-5554")
        };
        f.orchestrator.registry().register_checked(&stale).unwrap();

        let handle = f.orchestrator.open_device(android_device("emulator-5554")).await.unwrap();
        assert_eq!(handle.mode(), OpenMode::Fresh);
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_slow_fresh_open_stays_joinable() {
        let temp = tempdir().unwrap();
        let registry = SessionRegistry::new(temp.path(), Duration::from_millis(300));
        let slow_options = DriverOptions {
            startup_timeout: Duration::from_secs(3),
            startup_poll: Duration::from_millis(100),
            ..Default::default()
        };

        let slow_backend = Arc::new(FakeBackend::new().with_probe_failures(8));
        let first = SessionOrchestrator::new(
            Arc::new(FakeConnector::new(slow_backend.clone())),
            registry.clone(),
            slow_options,
            Duration::from_millis(70),
        );
        let second = SessionOrchestrator::new(
            Arc::new(FakeConnector::new(Arc::new(FakeBackend::new()))),
            registry,
            quick_options(),
            Duration::from_millis(70),
        );

        let (a, b) = tokio::join!(first.open_device(android_device("emulator-5554")), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            second.open_device(android_device("emulator-5554")).await
        });
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.mode(), OpenMode::Fresh);
        assert_eq!(b.mode(), OpenMode::Join);

        b.teardown().await;
        a.teardown().await;
    }

    #[tokio::test]
    async fn test_failed_open_stops_heartbeat() {
        let f = fixture_with(
            FakeBackend::new().with_probe_failures(1_000),
            DriverOptions {
                startup_timeout: Duration::from_millis(200),
                startup_poll: Duration::from_millis(10),
                ..Default::default()
            },
            Duration::from_millis(20),
        );

        assert!(f.orchestrator.open_device(android_device("emulator-5554")).await.is_err());

        // A late beat would re-insert the deleted record
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.orchestrator.registry().active_sessions(Platform::Android).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_open_unregisters() {
        let f = fixture_with(
            FakeBackend::new().with_probe_failures(1_000),
            DriverOptions {
                startup_timeout: Duration::from_millis(50),
                startup_poll: Duration::from_millis(10),
                host_port: Some(7001),
                ..Default::default()
            },
            Duration::from_secs(5),
        );

        let err = f
            .orchestrator
            .open_device(android_device("emulator-5554"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DriverTimeout { .. }));
        assert!(f.orchestrator.registry().active_sessions(Platform::Android).unwrap().is_empty());
        assert_eq!(f.orchestrator.ports().owner(7001), None);
        assert_eq!(f.backend.count_calls("quit"), 1);
    }

    #[tokio::test]
    async fn test_with_session_tears_down_on_return() {
        let f = fixture(quick_options(), Duration::from_secs(5));

        let id = f
            .orchestrator
            .with_session_until(android_device("emulator-5554"), std::future::pending(), |session| async move {
                session.adapter().tap(devrig_core::Point::new(1, 1)).await?;
                Ok::<_, Error>(session.session_id().to_string())
            })
            .await
            .unwrap();

        assert_eq!(id.len(), 32);
        assert_eq!(f.backend.count_calls("quit"), 1);
    }

    #[tokio::test]
    async fn test_with_session_interrupted() {
        let f = fixture(quick_options(), Duration::from_secs(5));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let shutdown = async move {
            let _ = rx.await;
        };
        let run = f.orchestrator.with_session_until(
            android_device("emulator-5554"),
            shutdown,
            |_session| async move {
                let _ = tx.send(());
                std::future::pending::<Result<()>>().await
            },
        );

        assert!(matches!(run.await, Err(Error::Interrupted)));
        assert_eq!(f.backend.count_calls("quit"), 1);
        assert!(f.orchestrator.registry().active_sessions(Platform::Android).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_handle_unregisters() {
        let f = fixture(quick_options(), Duration::from_secs(5));
        let handle = f.orchestrator.open_device(android_device("emulator-5554")).await.unwrap();
        drop(handle);

        assert!(f.orchestrator.registry().active_sessions(Platform::Android).unwrap().is_empty());
    }
}
