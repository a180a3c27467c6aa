//! Plugin orchestration -- assembly, channel wiring, and lifecycle management.
//!
//! The [`Orchestrator`] builds every source and sink named in the
//! configuration, connects them with bounded channels, and drives their
//! lifecycle until a shutdown signal or a fatal worker failure.
//!
//! # Wiring
//!
//! ```text
//! [[sources]] api-limit ──┬── mpsc ──▶ api-limit/linux_ipset-0
//!                         └── mpsc ──▶ api-limit/linux_ipset-1
//! ```
//!
//! Each sink owns exactly one channel; a source holds one sender per sink.
//!
//! # Startup
//!
//! 1. `init_all` in registration order (sources, then sinks). Sink set
//!    detection runs here, so a broken sink aborts startup before any
//!    worker has been spawned.
//! 2. `start_all`; on failure already-started plugins are stopped again.
//!
//! # Shutdown (same order)
//!
//! 1. Sources cancel their followers, drain, and drop their senders.
//! 2. Sinks drain until their channel closes.
//!
//! Both steps are bounded by `pipeline.shutdown_grace_ms` per plugin.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use ratewarden_core::config::RatewardenConfig;
use ratewarden_core::metrics as m;
use ratewarden_core::plugin::{PluginContext, PluginRegistry, WorkerFailure};

use crate::health::{DaemonHealth, PluginHealth, aggregate_status, log_health};
use crate::metrics_server;
use crate::registry::{self, SinkArgs, SourceArgs};

/// Why the main loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// An OS signal (or test trigger) asked for shutdown.
    Signal(&'static str),
    /// A worker reported an unrecoverable error.
    WorkerFailure(WorkerFailure),
}

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: RatewardenConfig,
    /// Every plugin, sources first.
    plugins: PluginRegistry,
    /// Fatal failures reported by workers.
    failures: mpsc::UnboundedReceiver<WorkerFailure>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

/// Build every plugin named in `config` and wire their channels.
///
/// Nothing is spawned: the returned registry holds plugins in the
/// `Created` state. Unknown plugin types, role mismatches and invalid
/// plugin options are reported here.
pub fn build_pipeline(config: &RatewardenConfig, ctx: &PluginContext) -> Result<PluginRegistry> {
    let capacity = config.pipeline.channel_capacity;
    let mut sources = Vec::with_capacity(config.sources.len());
    let mut sinks = Vec::new();

    for (index, source) in config.sources.iter().enumerate() {
        let source_factory = registry::source_factory(&source.plugin_type)
            .map_err(|e| anyhow::anyhow!("sources[{index}]: {e}"))?;
        let source_name = source.instance_name(index);

        let mut outputs = Vec::with_capacity(source.sinks.len());
        for (sink_index, sink) in source.sinks.iter().enumerate() {
            let sink_factory = registry::sink_factory(&sink.plugin_type)
                .map_err(|e| anyhow::anyhow!("sources[{index}].sinks[{sink_index}]: {e}"))?;
            let (tx, rx) = mpsc::channel(capacity);
            outputs.push(tx);

            let plugin = sink_factory(SinkArgs {
                name: sink.instance_name(&source_name, sink_index),
                config: &sink.config,
                field: format!("sources[{index}].sinks[{sink_index}].config"),
                input: rx,
                ctx: ctx.clone(),
            })?;
            sinks.push(plugin);
        }

        if outputs.is_empty() {
            tracing::warn!(source = %source_name, "source has no sinks; matched events are dropped");
        }

        let plugin = source_factory(SourceArgs {
            name: source_name,
            config: &source.config,
            field: format!("sources[{index}].config"),
            outputs,
            ctx: ctx.clone(),
        })?;
        sources.push(plugin);
    }

    let mut plugins = PluginRegistry::new();
    for plugin in sources.into_iter().chain(sinks) {
        tracing::debug!(
            plugin = %plugin.info().name,
            role = %plugin.info().plugin_type,
            "plugin registered"
        );
        plugins.register(plugin)?;
    }
    Ok(plugins)
}

impl Orchestrator {
    /// Load configuration from `config_path` and build the orchestrator.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = RatewardenConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    ///
    /// Installs the metrics recorder when `[metrics] enabled`.
    pub fn build_from_config(config: RatewardenConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {e}"))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let grace = Duration::from_millis(config.pipeline.shutdown_grace_ms);
        let (ctx, failures) = PluginContext::new(grace);
        let plugins = build_pipeline(&config, &ctx)?;

        tracing::info!(
            total_plugins = plugins.count(),
            sources = config.sources.len(),
            "orchestrator initialized"
        );

        if config.metrics.enabled {
            record_daemon_metrics(plugins.count());
        }

        Ok(Self {
            config,
            plugins,
            failures,
            start_time: Instant::now(),
        })
    }

    /// Start every plugin and block until SIGINT or SIGTERM.
    ///
    /// Returns an error when startup fails or a worker reports a fatal
    /// failure; the caller turns that into a non-zero exit.
    pub async fn run(&mut self) -> Result<()> {
        let signal = wait_for_shutdown_signal()?;
        match self.run_until(signal).await? {
            StopReason::Signal(_) => Ok(()),
            StopReason::WorkerFailure(failure) => {
                Err(anyhow::anyhow!("worker failure: {failure}"))
            }
        }
    }

    /// Start every plugin and run until `shutdown` resolves or a worker fails.
    ///
    /// Plugins are always stopped before this returns `Ok`.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<StopReason>
    where
        F: Future<Output = &'static str>,
    {
        let pid_file = self.pid_file();
        if let Some(path) = &pid_file {
            write_pid_file(path)?;
        }

        if let Err(e) = self.start_plugins().await {
            if let Some(path) = &pid_file {
                remove_pid_file(path);
            }
            return Err(e);
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let uptime_task = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, shutdown_tx.subscribe()));

        let mut health_interval = match self.config.pipeline.health_log_interval_secs {
            0 => None,
            secs => {
                let mut interval = tokio::time::interval(Duration::from_secs(secs));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // 첫 tick은 즉시 완료됨
                interval.reset();
                Some(interval)
            }
        };

        tracing::info!("entering main event loop");
        tokio::pin!(shutdown);
        let reason = loop {
            tokio::select! {
                signal = &mut shutdown => break StopReason::Signal(signal),
                Some(failure) = self.failures.recv() => {
                    tracing::error!(
                        plugin = %failure.plugin,
                        reason = %failure.reason,
                        "worker reported a fatal failure"
                    );
                    break StopReason::WorkerFailure(failure);
                }
                _ = next_tick(&mut health_interval) => {
                    let health = self.health().await;
                    log_health(&health);
                }
            }
        };
        if let StopReason::Signal(signal) = &reason {
            tracing::info!(signal = *signal, "shutdown signal received");
        }

        let _ = shutdown_tx.send(());
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        let stopped = self.shutdown().await;

        if let Some(path) = &pid_file {
            remove_pid_file(path);
        }

        stopped?;
        tracing::info!("ratewarden-daemon shut down");
        Ok(reason)
    }

    async fn start_plugins(&mut self) -> Result<()> {
        tracing::info!("initializing all plugins");
        if let Err(e) = self.plugins.init_all().await {
            tracing::error!(error = %e, "plugin initialization failed");
            return Err(e.into());
        }

        tracing::info!("starting all plugins");
        if let Err(e) = self.plugins.start_all().await {
            tracing::warn!(error = %e, "startup failed, rolling back already-started plugins");
            if let Err(stop_err) = self.plugins.stop_all().await {
                tracing::error!(
                    startup_error = %e,
                    rollback_error = %stop_err,
                    "rollback also failed during startup failure cleanup"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Stop plugins in registration order (sources first, sinks last).
    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("stopping all plugins");
        self.plugins.stop_all().await.map_err(|e| e.into())
    }

    /// Current aggregated health.
    pub async fn health(&self) -> DaemonHealth {
        let plugins: Vec<PluginHealth> = self
            .plugins
            .health_check_all()
            .await
            .into_iter()
            .map(|(name, state, status)| PluginHealth {
                name,
                state,
                status,
            })
            .collect();

        DaemonHealth {
            status: aggregate_status(&plugins),
            uptime_secs: self.start_time.elapsed().as_secs(),
            plugins,
        }
    }

    /// Loaded configuration.
    pub fn config(&self) -> &RatewardenConfig {
        &self.config
    }

    /// Registered plugins.
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    fn pid_file(&self) -> Option<PathBuf> {
        let path = self.config.general.pid_file.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }
}

/// Resolve every plugin and check its options without starting anything.
///
/// Returns `(sources, sinks)` counts.
pub fn validate_pipeline(config: &RatewardenConfig) -> Result<(usize, usize)> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {e}"))?;
    let (ctx, _failures) = PluginContext::new(Duration::from_millis(
        config.pipeline.shutdown_grace_ms,
    ));
    let plugins = build_pipeline(config, &ctx)?;
    let sources = config.sources.len();
    Ok((sources, plugins.count() - sources))
}

async fn next_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Install SIGTERM and SIGINT handlers and return a future resolving to
/// the name of whichever arrives first.
fn wait_for_shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {e}"))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {e}"))?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - `create_new(true)` creates the file atomically
/// - The created file must be a regular file
/// - Parent directory is created with mode 0o700
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{pid}")?;

    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Failure is logged, not returned.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Record build info and plugin count.
fn record_daemon_metrics(plugin_count: usize) {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_PLUGINS_REGISTERED).set(plugin_count as f64);
}

/// Periodically refresh the uptime gauge until shutdown.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
