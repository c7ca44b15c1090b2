#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the incident hub toolchain.
//!
//! Provides `indicatif`-backed progress bars behind the [`ProgressCallback`]
//! trait, plus [`init_logger`] which sets up `indicatif-log-bridge` so that
//! `log::info!` and friends are suspended while progress bars redraw.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use incident_hub_gtfs::progress::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::{MultiProgress, ProgressDrawTarget};

/// An `indicatif` [`ProgressBar`] that implements [`ProgressCallback`].
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Style to switch to once `set_total()` provides a known length.
    bar_style: ProgressStyle,
}

impl IndicatifProgress {
    /// A bar for streaming a file. Starts as a spinner and switches to a
    /// byte-count bar with ETA once the loader reports the file size.
    #[must_use]
    pub fn bytes_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        Arc::new(Self::bytes(multi, message))
    }

    fn bytes(multi: &MultiProgress, message: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        let bar_style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.cyan/dim} {bytes}/{total_bytes} {percent}% [{eta}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Self { bar, bar_style }
    }

    /// A bar for a known number of steps (e.g. tables 1/3).
    fn steps(multi: &MultiProgress, message: &str, total: u64) -> Self {
        let bar = multi.add(ProgressBar::new(total));
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} {wide_bar:.green/dim} {pos}/{len} [{elapsed_precise}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        bar.set_message(message.to_string());

        let bar_style = bar.style();

        Self { bar, bar_style }
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.bar_style.clone());
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Progress for a pass over several files: a steps bar counting files, and
/// a fresh byte bar for each file the loader opens.
///
/// The loader calls `set_total` once per file, which starts that file's bar.
/// `finish` closes it and advances the steps bar.
pub struct FileStepsProgress {
    multi: MultiProgress,
    steps: IndicatifProgress,
    files: u64,
    current: Mutex<Option<IndicatifProgress>>,
}

impl FileStepsProgress {
    /// Steps bar labelled `message` over `files` files.
    #[must_use]
    pub fn new(multi: &MultiProgress, message: &str, files: u64) -> Self {
        Self {
            multi: multi.clone(),
            steps: IndicatifProgress::steps(multi, message, files),
            files,
            current: Mutex::new(None),
        }
    }

    fn with_current(&self, f: impl FnOnce(&IndicatifProgress)) {
        if let Ok(current) = self.current.lock()
            && let Some(bar) = current.as_ref()
        {
            f(bar);
        }
    }
}

impl ProgressCallback for FileStepsProgress {
    fn set_total(&self, total: u64) {
        let bar = IndicatifProgress::bytes(&self.multi, "");
        bar.set_total(total);
        if let Ok(mut current) = self.current.lock()
            && let Some(previous) = current.replace(bar)
        {
            previous.bar.finish_and_clear();
        }
    }

    fn inc(&self, delta: u64) {
        self.with_current(|bar| bar.inc(delta));
    }

    fn set_message(&self, msg: String) {
        self.with_current(|bar| bar.set_message(msg));
    }

    fn finish(&self, msg: String) {
        if let Ok(mut current) = self.current.lock()
            && let Some(bar) = current.take()
        {
            bar.bar.finish_and_clear();
        }
        self.steps.inc(1);
        if self.steps.bar.position() >= self.files {
            self.steps.finish(msg);
        } else {
            self.steps.set_message(msg);
        }
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Logging goes to stderr and is controlled by `RUST_LOG`. Returns the
/// [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    // Already set in tests.
    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok();

    log::set_max_level(level);

    multi
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hidden() -> MultiProgress {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    }

    fn current_bar(progress: &FileStepsProgress) -> (u64, Option<u64>) {
        let current = progress.current.lock().unwrap();
        let bar = &current.as_ref().unwrap().bar;
        (bar.position(), bar.length())
    }

    #[test]
    fn each_file_gets_its_own_bar() {
        let progress = FileStepsProgress::new(&hidden(), "Building route index", 2);

        progress.set_total(100);
        progress.inc(100);
        assert_eq!(current_bar(&progress), (100, Some(100)));
        progress.finish("Read routes".to_string());
        assert_eq!(progress.steps.bar.position(), 1);
        assert!(!progress.steps.bar.is_finished());

        progress.set_total(40);
        assert_eq!(current_bar(&progress), (0, Some(40)));
        progress.inc(40);
        assert_eq!(current_bar(&progress), (40, Some(40)));
        progress.finish("Read trips".to_string());

        assert!(progress.current.lock().unwrap().is_none());
        assert_eq!(progress.steps.bar.position(), 2);
        assert!(progress.steps.bar.is_finished());
    }

    #[test]
    fn updates_without_an_open_file_are_ignored() {
        let progress = FileStepsProgress::new(&hidden(), "Reading", 1);
        progress.inc(10);
        progress.set_message("nothing open".to_string());
        assert!(progress.current.lock().unwrap().is_none());
        assert_eq!(progress.steps.bar.position(), 0);
    }
}
