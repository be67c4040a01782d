//! Two-level progress display: an overall bar over units and a step bar within the current unit

use crate::io::configuration::PROGRESS_BAR_WIDTH;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::LazyLock;

/// Coordinates progress display for long-running pipeline stages
///
/// A stage consists of units (image pairs, epochs, frames), each made of
/// steps (patches, mini-batches). The overall bar counts finished units and
/// the step bar tracks the unit in progress.
pub struct ProgressManager {
    multi_progress: MultiProgress,
    overall_bar: Option<ProgressBar>,
    step_bar: Option<ProgressBar>,
    completed_units: usize,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

static OVERALL_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template(&format!(
            "[{{elapsed_precise}}] {{prefix}} [{{bar:{PROGRESS_BAR_WIDTH}.cyan/blue}}] {{pos}}/{{len}} {{msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
});

static STEP_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{prefix} [{bar:30.cyan/blue}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ")
});

impl ProgressManager {
    /// Create a progress manager drawing to the terminal
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Create a progress manager that draws nothing
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi_progress: MultiProgress::with_draw_target(target),
            overall_bar: None,
            step_bar: None,
            completed_units: 0,
        }
    }

    /// Start a stage made of `units` units
    pub fn initialize(&mut self, label: &str, units: usize) {
        self.clear_bars();
        self.completed_units = 0;

        let overall = ProgressBar::new(units as u64);
        overall.set_style(OVERALL_STYLE.clone());
        overall.set_prefix(label.to_string());
        self.overall_bar = Some(self.multi_progress.add(overall));

        let step = ProgressBar::new(0);
        step.set_style(STEP_STYLE.clone());
        self.step_bar = Some(self.multi_progress.add(step));
    }

    /// Reset the step bar for a new unit of `steps` steps
    pub fn start_unit(&mut self, name: &str, steps: usize) {
        if let Some(ref bar) = self.step_bar {
            bar.set_length(steps as u64);
            bar.set_position(0);
            bar.set_prefix(name.to_string());
        }
    }

    /// Report the number of finished steps within the current unit
    pub fn update_step(&self, step: usize) {
        if let Some(ref bar) = self.step_bar {
            bar.set_position(step as u64);
        }
    }

    /// Show a short status next to the overall bar
    pub fn set_status(&self, status: &str) {
        if let Some(ref bar) = self.overall_bar {
            bar.set_message(status.to_string());
        }
    }

    /// Mark the current unit as finished
    pub fn complete_unit(&mut self) {
        self.completed_units += 1;
        if let Some(ref bar) = self.overall_bar {
            bar.inc(1);
        }
    }

    /// Units finished since the last [`ProgressManager::initialize`]
    pub const fn completed_units(&self) -> usize {
        self.completed_units
    }

    /// Clean up all progress displays
    pub fn finish(&mut self) {
        if let Some(ref bar) = self.overall_bar {
            bar.finish_with_message("done");
        }
        self.clear_bars();
        let _ = self.multi_progress.clear();
    }

    fn clear_bars(&mut self) {
        for bar in [self.step_bar.take(), self.overall_bar.take()]
            .into_iter()
            .flatten()
        {
            bar.finish_and_clear();
            self.multi_progress.remove(&bar);
        }
    }
}
