use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::speed::SpeedMeter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub usize);

#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub advance: Option<u64>,
    pub total: Option<u64>,
    pub visible: Option<bool>,
    pub message: Option<String>,
}

impl TaskUpdate {
    pub fn advance(bytes: u64) -> Self {
        Self {
            advance: Some(bytes),
            ..Default::default()
        }
    }

    pub fn total(total: u64) -> Self {
        Self {
            total: Some(total),
            ..Default::default()
        }
    }

    pub fn hide() -> Self {
        Self {
            visible: Some(false),
            ..Default::default()
        }
    }
}

/// Sink for download progress, shared by every fetch of a downloader.
pub trait Progress: Send + Sync {
    fn add_task(&self, description: &str, total: Option<u64>) -> TaskId;

    fn update(&self, task: TaskId, update: TaskUpdate);

    fn total(&self, task: TaskId) -> Option<u64>;

    /// Aggregate bytes/s across all active tasks.
    fn active_speed(&self) -> f64;

    fn advance(&self, task: TaskId, bytes: u64) {
        if bytes > 0 {
            self.update(task, TaskUpdate::advance(bytes));
        }
    }

    /// Add `bytes` to whatever total the task already has.
    fn grow_total(&self, task: TaskId, bytes: u64) {
        let total = self.total(task).unwrap_or(0) + bytes;
        self.update(task, TaskUpdate::total(total));
    }
}

#[derive(Debug, Default)]
struct TaskState {
    total: Option<u64>,
    completed: u64,
    visible: bool,
}

/// Keeps totals and speed but draws nothing.
#[derive(Debug, Default)]
pub struct SilentProgress {
    tasks: Mutex<Vec<TaskState>>,
    meter: SpeedMeter,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self, task: TaskId) -> u64 {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.get(task.0).map(|t| t.completed).unwrap_or(0)
    }

    pub fn visible(&self, task: TaskId) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.get(task.0).map(|t| t.visible).unwrap_or(false)
    }
}

impl Progress for SilentProgress {
    fn add_task(&self, _description: &str, total: Option<u64>) -> TaskId {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(TaskState {
            total,
            completed: 0,
            visible: true,
        });
        TaskId(tasks.len() - 1)
    }

    fn update(&self, task: TaskId, update: TaskUpdate) {
        if let Some(bytes) = update.advance {
            self.meter.record(bytes);
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = tasks.get_mut(task.0) {
            if let Some(bytes) = update.advance {
                state.completed += bytes;
            }
            if let Some(total) = update.total {
                state.total = Some(total);
            }
            if let Some(visible) = update.visible {
                state.visible = visible;
            }
        }
    }

    fn total(&self, task: TaskId) -> Option<u64> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.get(task.0).and_then(|t| t.total)
    }

    fn active_speed(&self) -> f64 {
        self.meter.speed()
    }
}

/// Terminal progress bars with a summary header.
pub struct CliProgress {
    multi_progress: MultiProgress,
    header_pb: ProgressBar,
    bars: Mutex<HashMap<TaskId, (ProgressBar, Option<u64>)>>,
    next_id: AtomicUsize,
    finished: AtomicUsize,
    downloaded: AtomicU64,
    meter: SpeedMeter,
}

impl CliProgress {
    pub fn new() -> Self {
        let multi_progress = MultiProgress::new();
        multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

        let header_pb = multi_progress.add(ProgressBar::new(0));
        header_pb.set_style(
            ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        header_pb.set_message("Summary: Tasks: 0/0 | Downloaded: 0 B");

        Self {
            multi_progress,
            header_pb,
            bars: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            downloaded: AtomicU64::new(0),
            meter: SpeedMeter::new(),
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }

    fn refresh_header(&self) {
        self.header_pb.set_message(format!(
            "Summary: Tasks: {}/{} | Downloaded: {} | {}/s",
            self.finished.load(Ordering::Relaxed),
            self.next_id.load(Ordering::Relaxed),
            HumanBytes(self.downloaded.load(Ordering::Relaxed)),
            HumanBytes(self.meter.speed() as u64),
        ));
    }

    fn bar_style(known_total: bool) -> ProgressStyle {
        let template = if known_total {
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4} {msg}"
        } else {
            "{spinner:.green} [{elapsed_precise}] {bytes:>12} {bytes_per_sec:>12} {msg}"
        };
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }
}

impl Default for CliProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for CliProgress {
    fn add_task(&self, description: &str, total: Option<u64>) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pb = self.multi_progress.add(ProgressBar::new(total.unwrap_or(0)));
        pb.set_style(Self::bar_style(total.is_some()));
        pb.set_message(description.to_string());
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (pb, total));
        self.refresh_header();
        id
    }

    fn update(&self, task: TaskId, update: TaskUpdate) {
        if let Some(bytes) = update.advance {
            self.meter.record(bytes);
            self.downloaded.fetch_add(bytes, Ordering::Relaxed);
        }
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((pb, known)) = bars.get_mut(&task) {
            if let Some(total) = update.total {
                if known.is_none() {
                    pb.set_style(Self::bar_style(true));
                }
                *known = Some(total);
                pb.set_length(total);
            }
            if let Some(bytes) = update.advance {
                pb.inc(bytes);
            }
            if let Some(message) = update.message {
                pb.set_message(message);
            }
            if update.visible == Some(false) && !pb.is_finished() {
                pb.finish_and_clear();
                self.finished.fetch_add(1, Ordering::Relaxed);
            }
        }
        drop(bars);
        self.refresh_header();
    }

    fn total(&self, task: TaskId) -> Option<u64> {
        let bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        bars.get(&task).and_then(|(_, total)| *total)
    }

    fn active_speed(&self) -> f64 {
        self.meter.speed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_progress_tracks_tasks() {
        let progress = SilentProgress::new();
        let a = progress.add_task("a", None);
        let b = progress.add_task("b", Some(10));
        assert_ne!(a, b);
        assert_eq!(progress.total(a), None);

        progress.grow_total(a, 40);
        progress.grow_total(a, 2);
        assert_eq!(progress.total(a), Some(42));

        progress.advance(b, 4);
        progress.advance(b, 0);
        assert_eq!(progress.completed(b), 4);
        assert!(progress.active_speed() > 0.0);

        progress.update(b, TaskUpdate::hide());
        assert!(!progress.visible(b));
        assert!(progress.visible(a));
    }

    #[test]
    fn test_cli_progress_totals() {
        let progress = CliProgress::new();
        progress.multi_progress().set_draw_target(ProgressDrawTarget::hidden());
        let task = progress.add_task("file.bin", None);
        assert_eq!(progress.total(task), None);
        progress.grow_total(task, 100);
        progress.advance(task, 30);
        assert_eq!(progress.total(task), Some(100));
        progress.update(task, TaskUpdate::hide());
        assert_eq!(progress.finished.load(Ordering::Relaxed), 1);
    }
}
