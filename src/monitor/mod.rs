//! Resource monitor: periodic memory sampling with a pressure flag
//!
//! The monitor turns raw sampler readings into [`MemoryReading`]s and, while a
//! run is active, publishes a [`MemoryState`] on a `watch` channel every
//! `check_interval`. The memory-adaptive dispatcher waits on that channel
//! before admitting new work.
//!
//! Pressure starts when a reading is above the memory threshold and ends when a
//! later reading is at or below the recovery threshold (which defaults to the
//! memory threshold). Failed samples never cause pressure.
//!
//! A reading at or above the critical threshold is [`MemoryLevel::Critical`]:
//! admitted tasks that have not started their next fetch hand their slot back
//! and wait for it to pass.

mod sampler;

pub use sampler::{MemorySampler, ProcMemorySampler};

use crate::config::{validate_dispatcher_config, DispatcherConfig};
use crate::ConfigError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// One memory sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReading {
    /// System memory utilization in percent
    pub current_percent: f64,

    /// Highest utilization seen by this monitor
    pub peak_percent: f64,

    /// The sampler failed; the reading is a stand-in and counts as under threshold
    pub degraded: bool,
}

/// What the sampling loop publishes to the admission gate and the reporter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryState {
    pub reading: MemoryReading,
    pub pressure: bool,
    pub critical: bool,
}

impl MemoryState {
    pub fn level(&self) -> MemoryLevel {
        if self.critical {
            MemoryLevel::Critical
        } else if self.pressure {
            MemoryLevel::Pressure
        } else {
            MemoryLevel::Normal
        }
    }
}

/// Admission level derived from a [`MemoryState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLevel {
    /// New tasks are admitted
    Normal,
    /// New admissions wait
    Pressure,
    /// New admissions wait and admitted tasks give their slot back before fetching
    Critical,
}

impl MemoryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryLevel::Normal => "open",
            MemoryLevel::Pressure => "PAUSED",
            MemoryLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for MemoryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Samples memory and decides whether the system is under pressure
pub struct ResourceMonitor {
    sampler: Arc<dyn MemorySampler>,
    threshold: f64,
    recovery: f64,
    critical: f64,
    interval: Duration,
    peak: Mutex<f64>,
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("threshold", &self.threshold)
            .field("recovery", &self.recovery)
            .field("critical", &self.critical)
            .field("interval", &self.interval)
            .field("peak", &*self.peak.lock())
            .finish()
    }
}

impl ResourceMonitor {
    /// Creates a monitor from the dispatcher section of the configuration
    pub fn new(
        sampler: Arc<dyn MemorySampler>,
        config: &DispatcherConfig,
    ) -> Result<Self, ConfigError> {
        validate_dispatcher_config(config)?;
        Ok(Self::from_validated(sampler, config))
    }

    pub(crate) fn from_validated(
        sampler: Arc<dyn MemorySampler>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            sampler,
            threshold: config.memory_threshold_percent,
            recovery: config.recovery_threshold(),
            critical: config.critical_threshold(),
            interval: config.check_interval(),
            peak: Mutex::new(0.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn recovery_threshold(&self) -> f64 {
        self.recovery
    }

    pub fn critical_threshold(&self) -> f64 {
        self.critical
    }

    pub fn check_interval(&self) -> Duration {
        self.interval
    }

    /// Takes one reading
    ///
    /// Never fails: a sampler error is logged and yields a degraded reading.
    pub fn sample(&self) -> MemoryReading {
        let mut peak = self.peak.lock();
        match self.sampler.system_memory_percent() {
            Ok(percent) if percent.is_finite() => {
                let percent = percent.clamp(0.0, 100.0);
                *peak = peak.max(percent);
                MemoryReading {
                    current_percent: percent,
                    peak_percent: *peak,
                    degraded: false,
                }
            }
            Ok(percent) => {
                tracing::warn!("Ignoring non-finite memory reading: {}", percent);
                self.degraded(*peak)
            }
            Err(e) => {
                tracing::warn!("Memory sampling failed, assuming no pressure: {}", e);
                self.degraded(*peak)
            }
        }
    }

    fn degraded(&self, peak: f64) -> MemoryReading {
        MemoryReading {
            current_percent: 0.0,
            peak_percent: peak,
            degraded: true,
        }
    }

    /// Applies the enter/exit hysteresis to a new reading
    pub fn next_pressure(&self, under_pressure: bool, reading: &MemoryReading) -> bool {
        if reading.degraded {
            return false;
        }
        if under_pressure {
            reading.current_percent > self.recovery
        } else {
            reading.current_percent > self.threshold
        }
    }

    /// Critical has no hysteresis: it holds exactly while readings stay at or above the level
    pub fn is_critical(&self, reading: &MemoryReading) -> bool {
        !reading.degraded && reading.current_percent >= self.critical
    }

    /// Starts the sampling loop for one run
    ///
    /// The first reading is taken before this returns, so the gate never admits
    /// work on a stale assumption of low memory.
    pub fn spawn(self: &Arc<Self>) -> MonitorHandle {
        let initial = self.sample();
        let pressure = self.next_pressure(false, &initial);
        if pressure {
            tracing::info!(
                "Memory at {:.1}% is above {:.1}%, pausing admissions",
                initial.current_percent,
                self.threshold
            );
        }

        let (tx, rx) = watch::channel(MemoryState {
            reading: initial,
            pressure,
            critical: self.is_critical(&initial),
        });
        let stop = CancellationToken::new();
        let monitor = Arc::clone(self);
        let token = stop.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately and the initial sample is already published
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let reading = monitor.sample();
                        tx.send_modify(|state| {
                            let pressure = monitor.next_pressure(state.pressure, &reading);
                            if pressure != state.pressure {
                                if pressure {
                                    tracing::info!(
                                        "Memory at {:.1}% is above {:.1}%, pausing admissions",
                                        reading.current_percent,
                                        monitor.threshold
                                    );
                                } else {
                                    tracing::info!(
                                        "Memory back to {:.1}%, resuming admissions",
                                        reading.current_percent
                                    );
                                }
                            }
                            let critical = monitor.is_critical(&reading);
                            if critical && !state.critical {
                                tracing::warn!(
                                    "Memory at {:.1}% reached the critical level {:.1}%, requeueing admitted tasks",
                                    reading.current_percent,
                                    monitor.critical
                                );
                            }
                            state.reading = reading;
                            state.pressure = pressure;
                            state.critical = critical;
                        });
                    }
                }
            }
            tracing::debug!("Memory sampling loop stopped");
        });

        MonitorHandle {
            receiver: rx,
            stop,
            task: Some(task),
        }
    }
}

/// Owns a running sampling loop
///
/// Dropping the handle aborts the loop; [`stop`](Self::stop) ends it cleanly.
#[derive(Debug)]
pub struct MonitorHandle {
    receiver: watch::Receiver<MemoryState>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn subscribe(&self) -> watch::Receiver<MemoryState> {
        self.receiver.clone()
    }

    pub fn current(&self) -> MemoryState {
        *self.receiver.borrow()
    }

    /// Stops the loop and waits for it to exit
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Memory sampling loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
