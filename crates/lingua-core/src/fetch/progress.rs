//! Weighted, throttled load progress.
//!
//! A load moves through three bands:
//!
//! ```text
//!   0 ─ 5     prelude   registry parsed, route resolved
//!   5 ─ 90    body      one slot per model, split across file roles
//!  90 ─ 100   trailer   worker initialized (95), trial translation (100)
//! ```
//!
//! Within the body each model owns `85 / model_count` percent. A file takes
//! its role's share of that slot, so a direct pair's model file is 70% of
//! the body and a pivot pair's is 35%.

use crate::config::ProgressConfig;
use crate::fetch::descriptor::FileRole;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Callback receiving progress updates.
pub type ProgressCallback = Arc<dyn Fn(LoadProgress) + Send + Sync>;

/// Coarse phase of a load, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadPhase {
    Resolving,
    Downloading,
    Initializing,
    Verifying,
    Ready,
}

/// A progress update as delivered to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProgress {
    pub pair: String,
    pub percent: f64,
    pub phase: LoadPhase,
    pub files_completed: usize,
    pub total_files_estimate: usize,
}

impl LoadProgress {
    /// Progress for a pair whose translator is already loaded.
    pub fn complete(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            percent: ProgressConfig::COMPLETE,
            phase: LoadPhase::Ready,
            files_completed: 0,
            total_files_estimate: 0,
        }
    }
}

/// Bookkeeping behind the reported percentage.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub files_completed: usize,
    pub total_files_estimate: usize,
    /// Percent of the whole load the current file is worth.
    pub current_file_weight: f64,
    pub last_reported_percent: f64,
    model_count: usize,
    /// Percent reached by completed files.
    completed_percent: f64,
    current_percent: f64,
    phase: LoadPhase,
}

impl ProgressState {
    fn new(model_count: usize) -> Self {
        Self {
            files_completed: 0,
            total_files_estimate: ProgressConfig::FILES_PER_MODEL * model_count,
            current_file_weight: 0.0,
            last_reported_percent: 0.0,
            model_count,
            completed_percent: ProgressConfig::PRELUDE_END,
            current_percent: 0.0,
            phase: LoadPhase::Resolving,
        }
    }

    fn slot_span(&self) -> f64 {
        let body = ProgressConfig::BODY_END - ProgressConfig::PRELUDE_END;
        if self.model_count == 0 {
            body
        } else {
            body / self.model_count as f64
        }
    }

    // Values only move forward and never leave the body band early.
    fn advance(&mut self, percent: f64, ceiling: f64) {
        let percent = round_tenth(percent.min(ceiling));
        if percent > self.current_percent {
            self.current_percent = percent;
        }
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Tracks a single load's progress and forwards throttled updates to a callback.
pub struct ProgressReporter {
    pair: String,
    state: Mutex<ProgressState>,
    last_emit: Mutex<Option<Instant>>,
    throttle: Duration,
    callback: ProgressCallback,
}

impl ProgressReporter {
    pub fn new(pair: impl Into<String>, model_count: usize, callback: ProgressCallback) -> Self {
        Self {
            pair: pair.into(),
            state: Mutex::new(ProgressState::new(model_count)),
            last_emit: Mutex::new(None),
            throttle: ProgressConfig::THROTTLE_INTERVAL,
            callback,
        }
    }

    /// Reporter that discards every update.
    pub fn silent(pair: impl Into<String>, model_count: usize) -> Self {
        Self::new(pair, model_count, Arc::new(|_| {}))
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Snapshot of the internal state.
    pub fn state(&self) -> ProgressState {
        self.lock_state().clone()
    }

    /// Current (possibly not yet emitted) percentage.
    pub fn percent(&self) -> f64 {
        self.lock_state().current_percent
    }

    /// Change the number of models once the route is known.
    pub fn set_model_count(&self, model_count: usize) {
        let mut state = self.lock_state();
        state.model_count = model_count;
        state.total_files_estimate = ProgressConfig::FILES_PER_MODEL * model_count;
    }

    /// Registry parsed and route resolved.
    pub fn prelude_done(&self) {
        self.update(|state| {
            state.phase = LoadPhase::Downloading;
            state.advance(ProgressConfig::PRELUDE_END, ProgressConfig::PRELUDE_END);
        });
    }

    /// Start a file of the given role.
    pub fn begin_file(&self, role: FileRole) {
        let mut state = self.lock_state();
        state.current_file_weight = state.slot_span() * role.slot_weight();
    }

    /// Fraction (0.0..=1.0) of the current file done.
    pub fn file_progress(&self, fraction: f64) {
        self.update(|state| {
            let fraction = fraction.clamp(0.0, 1.0);
            let percent = state.completed_percent + state.current_file_weight * fraction;
            state.advance(percent, ProgressConfig::BODY_END);
        });
    }

    /// Current file finished.
    pub fn file_done(&self) {
        self.update(|state| {
            state.completed_percent += state.current_file_weight;
            state.files_completed += 1;
            state.current_file_weight = 0.0;
            let percent = state.completed_percent;
            state.advance(percent, ProgressConfig::BODY_END);
        });
    }

    /// Every file is local; jump to the end of the body band.
    pub fn body_done(&self) {
        self.update(|state| {
            state.phase = LoadPhase::Initializing;
            state.advance(ProgressConfig::BODY_END, ProgressConfig::BODY_END);
        });
    }

    /// Worker initialized; trial translation pending.
    pub fn initialized(&self) {
        self.update(|state| {
            state.phase = LoadPhase::Verifying;
            state.advance(ProgressConfig::INITIALIZED, ProgressConfig::INITIALIZED);
        });
    }

    /// Load complete. Always emits 100 regardless of throttling.
    pub fn finish(&self) {
        let progress = {
            let mut state = self.lock_state();
            state.phase = LoadPhase::Ready;
            state.advance(ProgressConfig::COMPLETE, ProgressConfig::COMPLETE);
            if state.last_reported_percent >= ProgressConfig::COMPLETE {
                return;
            }
            state.last_reported_percent = state.current_percent;
            self.snapshot(&state)
        };
        *self.lock_emit() = Some(Instant::now());
        (self.callback)(progress);
    }

    fn update(&self, apply: impl FnOnce(&mut ProgressState)) {
        let progress = {
            let mut state = self.lock_state();
            apply(&mut state);
            if state.current_percent <= state.last_reported_percent {
                return;
            }

            let mut last_emit = self.lock_emit();
            let now = Instant::now();
            if let Some(last) = *last_emit {
                if now.duration_since(last) < self.throttle {
                    return;
                }
            }
            *last_emit = Some(now);
            state.last_reported_percent = state.current_percent;
            self.snapshot(&state)
        };
        (self.callback)(progress);
    }

    fn snapshot(&self, state: &ProgressState) -> LoadProgress {
        LoadProgress {
            pair: self.pair.clone(),
            percent: state.current_percent,
            phase: state.phase,
            files_completed: state.files_completed,
            total_files_estimate: state.total_files_estimate,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_emit(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.last_emit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(model_count: usize) -> (ProgressReporter, Arc<Mutex<Vec<LoadProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(
            "en-fr",
            model_count,
            Arc::new(move |p| sink.lock().unwrap().push(p)),
        )
        .with_throttle(Duration::ZERO);
        (reporter, seen)
    }

    fn run_files(reporter: &ProgressReporter, roles: &[FileRole]) {
        for role in roles {
            reporter.begin_file(*role);
            for step in [0.25, 0.5, 0.75, 1.0] {
                reporter.file_progress(step);
            }
            reporter.file_done();
        }
    }

    #[test]
    fn test_total_files_estimate() {
        assert_eq!(ProgressReporter::silent("a-b", 1).state().total_files_estimate, 3);
        assert_eq!(ProgressReporter::silent("a-c", 2).state().total_files_estimate, 6);
    }

    #[test]
    fn test_role_weights_direct_and_pivot() {
        let direct = ProgressReporter::silent("en-fr", 1);
        direct.begin_file(FileRole::Model);
        assert!((direct.state().current_file_weight - 85.0 * 0.70).abs() < 1e-9);

        let pivot = ProgressReporter::silent("ja-fr", 2);
        pivot.begin_file(FileRole::Model);
        assert!((pivot.state().current_file_weight - 85.0 * 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_direct_load_is_monotonic_and_ends_at_100() {
        let (reporter, seen) = recording(1);
        reporter.prelude_done();
        run_files(
            &reporter,
            &[FileRole::Model, FileRole::Vocab, FileRole::LexicalShortlist],
        );
        reporter.body_done();
        reporter.initialized();
        reporter.finish();

        let seen = seen.lock().unwrap();
        let percents: Vec<f64> = seen.iter().map(|p| p.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]), "{:?}", percents);
        assert_eq!(percents.first(), Some(&5.0));
        assert_eq!(percents.last(), Some(&100.0));
        assert!(percents.contains(&90.0));
        assert!(percents.contains(&95.0));
        assert_eq!(seen.last().unwrap().files_completed, 3);
        assert_eq!(seen.last().unwrap().phase, LoadPhase::Ready);
    }

    #[test]
    fn test_pivot_load_reaches_body_end() {
        let (reporter, seen) = recording(2);
        reporter.prelude_done();
        let roles = [FileRole::Model, FileRole::Vocab, FileRole::LexicalShortlist];
        run_files(&reporter, &roles);
        assert!((reporter.percent() - 47.5).abs() < 0.05);
        run_files(&reporter, &roles);
        assert!((reporter.percent() - 90.0).abs() < 0.05);

        reporter.finish();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.last().unwrap().total_files_estimate, 6);
        assert_eq!(seen.last().unwrap().percent, 100.0);
    }

    #[test]
    fn test_values_never_go_backwards() {
        let (reporter, seen) = recording(1);
        reporter.prelude_done();
        reporter.begin_file(FileRole::Model);
        reporter.file_progress(0.8);
        reporter.file_progress(0.3);
        reporter.file_progress(0.8);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_drops_rapid_updates_but_not_finish() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter =
            ProgressReporter::new("en-fr", 1, Arc::new(move |p| sink.lock().unwrap().push(p)));

        reporter.prelude_done();
        reporter.begin_file(FileRole::Model);
        reporter.file_progress(0.5);
        reporter.file_progress(1.0);
        assert_eq!(seen.lock().unwrap().len(), 1);

        tokio::time::advance(Duration::from_millis(150)).await;
        reporter.file_done();
        assert_eq!(seen.lock().unwrap().len(), 2);

        reporter.finish();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last().unwrap().percent, 100.0);
    }
}
