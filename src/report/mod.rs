//! Live monitor and end-of-run statistics
//!
//! The [`Reporter`] redraws the task registry in place through an `indicatif`
//! progress bar while a run is active. It only reads snapshots and never
//! fails the run.

mod render;
mod stats;

pub use render::{render_aggregated, render_detailed, Frame};
pub use stats::{print_statistics, RunStatistics};

use crate::config::{DisplayMode, MonitorConfig};
use crate::monitor::MemoryState;
use crate::task::TaskRegistry;
use chrono::{DateTime, Utc};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodic renderer for one run's task registry
pub struct Reporter {
    registry: Arc<TaskRegistry>,
    config: MonitorConfig,
    progress: MultiProgress,
    memory: Option<watch::Receiver<MemoryState>>,
    started: DateTime<Utc>,
}

impl Reporter {
    /// The frame is drawn as one bar of `progress`
    pub fn new(
        registry: Arc<TaskRegistry>,
        config: MonitorConfig,
        progress: MultiProgress,
    ) -> Self {
        Self {
            registry,
            config,
            progress,
            memory: None,
            started: Utc::now(),
        }
    }

    /// Shows the memory gate state in aggregated frames
    pub fn with_memory(mut self, memory: watch::Receiver<MemoryState>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Renders the current registry contents as one frame
    pub fn render(&self) -> String {
        let states = self.registry.snapshot();
        let now = Utc::now();
        let frame = Frame {
            states: &states,
            now,
            run_started: self.started,
            memory: self.memory.as_ref().map(|rx| *rx.borrow()),
        };

        match self.config.display_mode {
            DisplayMode::Detailed => render_detailed(&frame, self.config.max_visible_rows),
            DisplayMode::Aggregated => render_aggregated(&frame, &self.registry.queue_stats(now)),
        }
    }

    fn frame_bar(&self) -> ProgressBar {
        let bar = self.progress.add(ProgressBar::new_spinner());
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
        bar
    }

    /// Starts the render loop
    ///
    /// Colour is switched off for the whole process when it is disabled in the
    /// configuration or stderr is piped.
    pub fn start(self) -> ReporterHandle {
        if !self.config.color || !std::io::stderr().is_terminal() {
            colored::control::set_override(false);
        }

        let stop = CancellationToken::new();
        let token = stop.clone();
        let interval = self.config.refresh_interval();
        let bar = self.frame_bar();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        bar.set_message(self.render());
                        bar.tick();
                    }
                }
            }

            // The last frame stays on screen with every task retired
            bar.finish_with_message(self.render());
        });

        ReporterHandle {
            stop,
            task: Some(task),
        }
    }
}

/// Owns a running render loop
///
/// The loop never outlives its handle: dropping the handle aborts it.
#[derive(Debug)]
pub struct ReporterHandle {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReporterHandle {
    /// Renders a final frame and waits for the loop to exit
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Monitor render loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
