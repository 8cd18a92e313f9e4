//! Public monitor API
//!
//! A [`MonitorEngine`] owns the helper runtime that backends and pipelines run
//! on, the owning-context dispatcher and the clock. `monitor_file` and
//! `monitor_directory` return a [`Monitor`] handle; dropping the last handle
//! cancels the watch.

use crate::config::WatcherConfig;
use crate::context::{Dispatch, MainContext};
use crate::pipeline::{self, PipelineSettings};
use crate::platform::{
    candidates, Backend, BackendKind, DiffBackend, NativeBackend, PollBackend, RawSink,
    WatchRequest,
};
use crate::registry::{Callback, WatchId, WatchRegistry};
use fsmon_core::{Clock, EventKind, MonitorError, MonotonicClock, Result, WatchFlags};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) struct MonitorShared {
    id: WatchId,
    path: PathBuf,
    is_directory: bool,
    flags: WatchFlags,
    rate_limit_ms: Arc<AtomicU64>,
    backend: OnceLock<BackendKind>,
    registry: Arc<WatchRegistry>,
}

impl Drop for MonitorShared {
    fn drop(&mut self) {
        self.registry.forget(self.id);
    }
}

/// Handle to one watch
///
/// Cheap to clone. The watch stays alive while any clone does.
#[derive(Clone)]
pub struct Monitor {
    shared: Arc<MonitorShared>,
}

impl Monitor {
    /// Register a watch without starting a backend
    pub(crate) fn register(
        registry: Arc<WatchRegistry>,
        path: &Path,
        is_directory: bool,
        flags: WatchFlags,
        rate_limit_ms: u64,
    ) -> Self {
        let id = registry.register(path, flags);
        let shared = Arc::new(MonitorShared {
            id,
            path: path.to_path_buf(),
            is_directory,
            flags,
            rate_limit_ms: Arc::new(AtomicU64::new(rate_limit_ms)),
            backend: OnceLock::new(),
            registry: registry.clone(),
        });
        registry.bind(id, Arc::downgrade(&shared));
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<MonitorShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn rate_limit_cell(&self) -> Arc<AtomicU64> {
        self.shared.rate_limit_ms.clone()
    }

    /// Subscribe to events
    ///
    /// Callbacks run on the owning context in the order they were connected.
    /// The callback receives the monitor, so it should not capture a clone of it.
    pub fn connect<F>(&self, callback: F)
    where
        F: Fn(&Monitor, &Path, Option<&Path>, EventKind) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.shared.registry.connect(self.shared.id, callback);
    }

    /// Set the CHANGED quiet window in milliseconds
    pub fn set_rate_limit(&self, ms: u64) {
        self.shared.rate_limit_ms.store(ms, Ordering::Relaxed);
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.shared.rate_limit_ms.load(Ordering::Relaxed))
    }

    /// Stop the watch; no callback runs after this returns
    ///
    /// Returns true if this call cancelled it.
    pub fn cancel(&self) -> bool {
        self.shared.registry.cancel(self.shared.id)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.registry.is_cancelled(self.shared.id)
    }

    /// Terminal error of a running watch, if any
    pub fn failure(&self) -> Option<Arc<MonitorError>> {
        self.shared.registry.failure(self.shared.id)
    }

    /// Backend serving this watch
    pub fn backend(&self) -> Option<BackendKind> {
        self.shared.backend.get().copied()
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn is_directory(&self) -> bool {
        self.shared.is_directory
    }

    pub fn flags(&self) -> WatchFlags {
        self.shared.flags
    }

    pub fn id(&self) -> WatchId {
        self.shared.id
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("id", &self.shared.id)
            .field("path", &self.shared.path)
            .field("backend", &self.backend())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Helper runtime owned by an engine; shut down without blocking on drop
struct HelperRuntime(Option<Runtime>);

impl Drop for HelperRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Creates monitors and runs their backends
pub struct MonitorEngine {
    handle: Handle,
    _helper: Option<HelperRuntime>,
    dispatch: Arc<dyn Dispatch>,
    clock: Arc<dyn Clock>,
    config: WatcherConfig,
    registry: Arc<WatchRegistry>,
}

impl MonitorEngine {
    /// Engine with default settings and its own helper runtime
    pub fn new(dispatch: Arc<dyn Dispatch>) -> Result<Self> {
        Self::with_config(dispatch, WatcherConfig::default())
    }

    /// Engine with its own single-worker helper runtime
    pub fn with_config(dispatch: Arc<dyn Dispatch>, config: WatcherConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("fsmon-helper")
            .enable_time()
            .build()
            .map_err(|source| MonitorError::Io {
                path: PathBuf::new(),
                source,
            })?;
        let handle = runtime.handle().clone();
        Ok(Self::assemble(
            handle,
            Some(HelperRuntime(Some(runtime))),
            dispatch,
            config,
        ))
    }

    /// Engine that spawns onto an existing runtime
    ///
    /// The runtime needs the time driver enabled.
    pub fn with_handle(handle: Handle, dispatch: Arc<dyn Dispatch>, config: WatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(handle, None, dispatch, config))
    }

    fn assemble(
        handle: Handle,
        helper: Option<HelperRuntime>,
        dispatch: Arc<dyn Dispatch>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            handle,
            _helper: helper,
            dispatch,
            clock: Arc::new(MonotonicClock),
            config,
            registry: Arc::new(WatchRegistry::new()),
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    /// Watch a single file (which need not exist yet)
    pub fn monitor_file(&self, path: impl AsRef<Path>, flags: WatchFlags) -> Result<Monitor> {
        self.monitor(path.as_ref(), false, flags)
    }

    /// Watch the direct children of a directory
    pub fn monitor_directory(&self, path: impl AsRef<Path>, flags: WatchFlags) -> Result<Monitor> {
        self.monitor(path.as_ref(), true, flags)
    }

    fn monitor(&self, path: &Path, is_directory: bool, flags: WatchFlags) -> Result<Monitor> {
        let monitor = Monitor::register(
            self.registry.clone(),
            path,
            is_directory,
            flags,
            self.config.rate_limit_ms,
        );
        let request = WatchRequest::new(path, is_directory, flags, &self.config);

        let mut last_error = None;
        for kind in candidates(self.config.backend) {
            match self.launch(kind, &monitor, &request) {
                Ok(()) => {
                    let _ = monitor.shared.backend.set(kind);
                    tracing::info!(
                        "Watching {} with the {} backend ({})",
                        path.display(),
                        kind,
                        monitor.id()
                    );
                    return Ok(monitor);
                }
                Err(err) if err.allows_fallback() => {
                    tracing::debug!("{} backend declined {}: {}", kind, path.display(), err);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| MonitorError::unsupported("none", "no backend available")))
    }

    fn launch(&self, kind: BackendKind, monitor: &Monitor, request: &WatchRequest) -> Result<()> {
        match kind {
            BackendKind::Native => self.launch_with::<NativeBackend>(monitor, request),
            BackendKind::Diff => self.launch_with::<DiffBackend>(monitor, request),
            BackendKind::Poll => self.launch_with::<PollBackend>(monitor, request),
        }
    }

    fn launch_with<B: Backend>(&self, monitor: &Monitor, request: &WatchRequest) -> Result<()> {
        let handle = &self.handle;
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let sink = RawSink::new(tx, token.clone(), self.clock.clone());

        let subscription = B::start(request, sink, handle)?;

        let pipeline_token = token.child_token();
        let settings = PipelineSettings {
            path: request.path.clone(),
            is_directory: request.is_directory,
            flags: request.flags,
            move_pair_window: self.config.move_pair_window(),
            max_pending_moves: self.config.max_pending_moves,
            rate_limit_ms: monitor.rate_limit_cell(),
        };
        pipeline::spawn::<B::MoveKey>(
            handle,
            monitor.id(),
            rx,
            settings,
            self.registry.clone(),
            self.dispatch.clone(),
            self.clock.clone(),
            pipeline_token.clone(),
        );
        self.registry.attach(monitor.id(), subscription, pipeline_token);
        Ok(())
    }
}

/// Process-wide context the free functions deliver into
pub fn default_context() -> &'static MainContext {
    static CONTEXT: OnceLock<MainContext> = OnceLock::new();
    CONTEXT.get_or_init(MainContext::new)
}

fn default_engine() -> Result<&'static MonitorEngine> {
    static ENGINE: OnceLock<MonitorEngine> = OnceLock::new();
    if let Some(engine) = ENGINE.get() {
        return Ok(engine);
    }
    let engine = MonitorEngine::new(Arc::new(default_context().handle()))?;
    Ok(ENGINE.get_or_init(|| engine))
}

/// Watch a file using the default engine; events arrive on [`default_context`]
pub fn monitor_file(path: impl AsRef<Path>, flags: WatchFlags) -> Result<Monitor> {
    default_engine()?.monitor_file(path, flags)
}

/// Watch a directory using the default engine; events arrive on [`default_context`]
pub fn monitor_directory(path: impl AsRef<Path>, flags: WatchFlags) -> Result<Monitor> {
    default_engine()?.monitor_directory(path, flags)
}
