// Plugverify
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::cancellation::CancellationToken;
use crate::error::{TaskError, TaskResult};

/// Unique identifier for scheduled tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Receives progress updates of running tasks
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, task: TaskId, name: &str, fraction: f64);
}

/// Receives the terminal result of a task, at most once per task
pub trait ResultSink<T>: Send + Sync {
    fn on_result(&self, task: TaskId, result: &TaskResult<T>);
}

/// Monotonic completion fraction in `[0, 1]`
pub struct ProgressIndicator {
    task: TaskId,
    name: String,
    bits: AtomicU64,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProgressIndicator {
    pub fn new(task: TaskId, name: impl Into<String>, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            task,
            name: name.into(),
            bits: AtomicU64::new(0f64.to_bits()),
            sink,
        }
    }

    /// Detached indicator for running a task outside a scheduler
    pub fn detached() -> Self {
        Self::new(TaskId::next(), "detached", None)
    }

    /// Raises the fraction; values below the current one are ignored
    pub fn set(&self, fraction: f64) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            if fraction <= f64::from_bits(current) {
                return;
            }
            match self.bits.compare_exchange_weak(current, fraction.to_bits(), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if let Some(sink) = &self.sink {
            sink.on_progress(self.task, &self.name, fraction);
        }
    }

    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

impl fmt::Debug for ProgressIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressIndicator").field("task", &self.task).field("fraction", &self.fraction()).finish()
    }
}

/// Scheduler-side bookkeeping of one task
#[derive(Debug)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    state: Mutex<TaskState>,
    pub progress: ProgressIndicator,
    pub token: CancellationToken,
}

impl TaskRecord {
    pub(crate) fn new(name: String, token: CancellationToken, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        let id = TaskId::next();
        Self {
            id,
            progress: ProgressIndicator::new(id, name.clone(), sink),
            name,
            state: Mutex::new(TaskState::Queued),
            token,
        }
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }
}

/// Write-once result cell a handle can block on
pub(crate) struct ResultSlot<T> {
    value: Mutex<Option<TaskResult<T>>>,
    ready: Condvar,
}

impl<T> ResultSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn complete(&self, result: TaskResult<T>) {
        let mut value = self.value.lock();
        if value.is_none() {
            *value = Some(result);
            self.ready.notify_all();
        }
    }
}

impl<T: Clone> ResultSlot<T> {
    pub(crate) fn wait(&self) -> TaskResult<T> {
        let mut value = self.value.lock();
        loop {
            if let Some(result) = value.as_ref() {
                return result.clone();
            }
            self.ready.wait(&mut value);
        }
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<TaskResult<T>> {
        let mut value = self.value.lock();
        if value.is_none() {
            let _ = self.ready.wait_for(&mut value, timeout);
        }
        value.clone()
    }

    pub(crate) fn peek(&self) -> Option<TaskResult<T>> {
        self.value.lock().clone()
    }
}

/// Unit of work executed by a [`TaskScheduler`](super::TaskScheduler)
///
/// Implementations should poll `token` at safe points and raise `progress`
/// as they go; the scheduler marks the task complete on return.
pub trait ServiceTask: Send + 'static {
    type Output: Send + 'static;

    fn name(&self) -> String;

    fn execute(self, progress: &ProgressIndicator, token: &CancellationToken) -> TaskResult<Self::Output>;
}
