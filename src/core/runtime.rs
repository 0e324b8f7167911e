//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: preference engine → interface table → tick driver
//! - Shutdown order: tick driver → preference engine

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::Config;
use crate::core::time::{TickSource, WallClockTickSource};
use crate::oper::interface::InterfaceTable;
use crate::preference::engine::PreferenceEngine;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Preference engine health.
    pub engine: ComponentHealth,
    /// Interface table health.
    pub oper: ComponentHealth,
    /// Tick driver health.
    pub ticker: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            engine: ComponentHealth::Starting,
            oper: ComponentHealth::Starting,
            ticker: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to process events.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.engine, self.oper, self.ticker),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy,
                ComponentHealth::Healthy
            )
        )
    }

    /// Check if the runtime is alive (not failed).
    pub fn is_alive(&self) -> bool {
        !matches!(
            (self.engine, self.oper, self.ticker),
            (ComponentHealth::Failed, _, _)
                | (_, ComponentHealth::Failed, _)
                | (_, _, ComponentHealth::Failed)
        )
    }
}

/// Agent runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Preference engine handle.
    engine: Option<Arc<PreferenceEngine>>,

    /// Interface table handle.
    interfaces: Option<Arc<parking_lot::Mutex<InterfaceTable>>>,

    /// Runtime health status.
    health: RuntimeHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,

    /// Tick driver task handle.
    ticker_handle: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            engine: None,
            interfaces: None,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            ticker_handle: None,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the preference engine (if started).
    pub fn engine(&self) -> Option<&Arc<PreferenceEngine>> {
        self.engine.as_ref()
    }

    /// Get the interface table (if started).
    pub fn interfaces(&self) -> Option<&Arc<parking_lot::Mutex<InterfaceTable>>> {
        self.interfaces.as_ref()
    }

    /// Get the current health status.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Check if the runtime is ready to process events.
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Check if the runtime is alive.
    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Initialize and start all runtime components.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(name = %self.config.agent.name, "starting agent runtime");

        self.init_engine()?;
        self.init_interfaces()?;
        self.start_ticker()?;

        self.running.store(true, Ordering::Release);
        tracing::info!("agent runtime started");
        Ok(())
    }

    fn init_engine(&mut self) -> Result<()> {
        tracing::debug!("initializing preference engine");
        let engine = Arc::new(PreferenceEngine::new(
            self.config.preference.workers,
            self.config.preference.backoff(),
        ));
        self.engine = Some(engine);
        self.health.engine = ComponentHealth::Healthy;
        Ok(())
    }

    fn init_interfaces(&mut self) -> Result<()> {
        tracing::debug!("initializing interface table");
        let engine = self
            .engine
            .as_ref()
            .context("engine must start before the interface table")?;
        let table = InterfaceTable::new(Arc::clone(engine));
        self.interfaces = Some(Arc::new(parking_lot::Mutex::new(table)));
        self.health.oper = ComponentHealth::Healthy;
        Ok(())
    }

    /// Start the periodic tick driver.
    ///
    /// Each period the wall clock is sampled and handed to the engine,
    /// which fires due backoff timers through the per-route queues.
    fn start_ticker(&mut self) -> Result<()> {
        tracing::debug!("starting tick driver");
        let engine = Arc::clone(
            self.engine
                .as_ref()
                .context("engine must start before the tick driver")?,
        );
        let source = WallClockTickSource::new(self.config.agent.tick_period_ms);
        let mut shutdown_rx = self.shutdown_rx.clone();

        // Seed the engine clock before any event can arrive, so a flap in
        // the first tick period arms its deadline against wall time rather
        // than the zero epoch.
        let initial = source.current_tick();
        engine.advance_clock(initial);

        let handle = tokio::spawn(async move {
            let period = std::time::Duration::from_millis(source.period_ms());
            let mut interval = tokio::time::interval(period);
            let mut last_emitted = Some(initial);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Some(tick) = source.should_emit(last_emitted) {
                            last_emitted = Some(tick);
                            engine.advance_clock(tick);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("tick driver stopped");
        });

        self.ticker_handle = Some(handle);
        self.health.ticker = ComponentHealth::Healthy;
        tracing::info!(
            period_ms = self.config.agent.tick_period_ms,
            "tick driver started"
        );
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for shutdown signal.
    pub async fn wait_for_shutdown(&mut self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run the runtime until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await?;
        Ok(())
    }

    /// Stop all runtime components in reverse start order.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping agent runtime");
        self.running.store(false, Ordering::Release);

        let _ = self.shutdown_tx.send(true);

        self.health.ticker = ComponentHealth::Stopping;
        if let Some(handle) = self.ticker_handle.take() {
            match tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "tick driver task panicked"),
                Err(_) => tracing::warn!("tick driver stop timed out"),
            }
        }
        self.health.ticker = ComponentHealth::Stopped;

        self.health.oper = ComponentHealth::Stopped;

        self.health.engine = ComponentHealth::Stopping;
        if let Some(engine) = self.engine.take() {
            engine.shutdown().await;
        }
        self.health.engine = ComponentHealth::Stopped;

        tracing::info!("agent runtime stopped");
        Ok(())
    }

    /// Start the runtime for tests (without the tick driver).
    pub async fn start_for_tests(&mut self) -> Result<()> {
        self.init_engine()?;
        self.init_interfaces()?;
        self.health.ticker = ComponentHealth::Healthy;
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the runtime for tests.
    pub async fn shutdown_for_tests(&mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        if let Some(engine) = self.engine.take() {
            engine.shutdown().await;
        }
        self.running.store(false, Ordering::Release);
        Ok(())
    }
}
