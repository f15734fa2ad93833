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

//! Priority-ordered task execution on a fixed pool of worker threads
//!
//! Tasks are ordered by a caller supplied comparator over their keys, ties
//! broken by submission order. Cancelling a queued task removes it from the
//! queue; cancelling a running task flips its token and leaves the decision
//! to stop to the task itself.

mod cancellation;
mod task;

pub use cancellation::CancellationToken;
pub use task::{ProgressIndicator, ProgressSink, ResultSink, ServiceTask, TaskId, TaskRecord, TaskState};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::panic_message;
use crate::error::{TaskError, TaskResult};
use task::ResultSlot;

/// Orders task keys; `Greater` runs first
pub type TaskComparator<K> = Arc<dyn Fn(&K, &K) -> Ordering + Send + Sync>;

/// Type-erased queued work
trait Job: Send {
    fn run(self: Box<Self>, record: &TaskRecord);
    fn abort(self: Box<Self>, record: &TaskRecord, error: TaskError);
}

struct TypedJob<S: ServiceTask> {
    task: S,
    slot: Arc<ResultSlot<S::Output>>,
    sink: Option<Arc<dyn ResultSink<S::Output>>>,
}

impl<S: ServiceTask> Job for TypedJob<S> {
    fn run(self: Box<Self>, record: &TaskRecord) {
        let TypedJob { task, slot, sink } = *self;
        if let Err(error) = record.token.check() {
            finish(record, &slot, sink.as_ref(), Err(error));
            return;
        }

        record.set_state(TaskState::Running);
        debug!(task_id = %record.id, name = %record.name, "Task started");
        let result = match catch_unwind(AssertUnwindSafe(|| task.execute(&record.progress, &record.token))) {
            Ok(result) => result,
            Err(panic) => Err(TaskError::Panicked(panic_message(panic.as_ref()))),
        };
        finish(record, &slot, sink.as_ref(), result);
    }

    fn abort(self: Box<Self>, record: &TaskRecord, error: TaskError) {
        let TypedJob { slot, sink, .. } = *self;
        finish(record, &slot, sink.as_ref(), Err(error));
    }
}

fn finish<T>(record: &TaskRecord, slot: &ResultSlot<T>, sink: Option<&Arc<dyn ResultSink<T>>>, result: TaskResult<T>) {
    let state = match &result {
        Ok(_) => {
            record.progress.set(1.0);
            info!(task_id = %record.id, name = %record.name, "Task succeeded");
            TaskState::Succeeded
        }
        Err(error) if error.is_cancelled() => {
            info!(task_id = %record.id, name = %record.name, reason = %error, "Task cancelled");
            TaskState::Cancelled
        }
        Err(error) => {
            warn!(task_id = %record.id, name = %record.name, error = %error, "Task failed");
            TaskState::Failed
        }
    };
    record.set_state(state);
    if let Some(sink) = sink {
        sink.on_result(record.id, &result);
    }
    slot.complete(result);
}

struct QueuedTask<K> {
    key: K,
    seq: u64,
    record: Arc<TaskRecord>,
    job: Box<dyn Job>,
    comparator: TaskComparator<K>,
}

impl<K> Ord for QueuedTask<K> {
    /// Comparator first, earlier submission wins ties
    fn cmp(&self, other: &Self) -> Ordering {
        (self.comparator)(&self.key, &other.key).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<K> PartialOrd for QueuedTask<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> PartialEq for QueuedTask<K> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<K> Eq for QueuedTask<K> {}

trait QueueControl: Send + Sync {
    fn cancel_queued(&self, id: TaskId, reason: &str) -> bool;
}

struct Shared<K> {
    queue: Mutex<BinaryHeap<QueuedTask<K>>>,
    available: Condvar,
    shutdown: AtomicBool,
    comparator: TaskComparator<K>,
    /// Queued and running tasks
    active: DashMap<TaskId, Arc<TaskRecord>>,
    running: AtomicUsize,
    sequence: AtomicU64,
    progress_sink: RwLock<Option<Arc<dyn ProgressSink>>>,
    task_timeout: RwLock<Option<Duration>>,
}

impl<K: Send + 'static> QueueControl for Shared<K> {
    fn cancel_queued(&self, id: TaskId, reason: &str) -> bool {
        let removed = {
            let mut queue = self.queue.lock();
            take_task(&mut queue, id)
        };
        match removed {
            Some(task) => {
                self.active.remove(&id);
                task.job.abort(&task.record, TaskError::Cancelled(reason.to_string()));
                true
            }
            None => false,
        }
    }
}

fn take_task<K>(queue: &mut BinaryHeap<QueuedTask<K>>, id: TaskId) -> Option<QueuedTask<K>> {
    if !queue.iter().any(|task| task.record.id == id) {
        return None;
    }
    let mut tasks = std::mem::take(queue).into_vec();
    let removed = tasks.iter().position(|task| task.record.id == id).map(|position| tasks.swap_remove(position));
    *queue = BinaryHeap::from(tasks);
    removed
}

fn worker_loop<K>(shared: Arc<Shared<K>>) {
    loop {
        let next = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }
                if let Some(task) = queue.pop() {
                    break task;
                }
                shared.available.wait(&mut queue);
            }
        };

        shared.running.fetch_add(1, AtomicOrdering::AcqRel);
        let QueuedTask { record, job, .. } = next;
        job.run(&record);
        shared.active.remove(&record.id);
        shared.running.fetch_sub(1, AtomicOrdering::AcqRel);
    }
}

/// Caller side of a submitted task
pub struct TaskHandle<T> {
    record: Arc<TaskRecord>,
    slot: Arc<ResultSlot<T>>,
    queue: Weak<dyn QueueControl>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn state(&self) -> TaskState {
        self.record.state()
    }

    pub fn progress(&self) -> f64 {
        self.record.progress.fraction()
    }

    /// Removes a queued task or signals a running one to stop
    pub fn cancel(&self) {
        let reason = "Cancelled by request";
        self.record.token.cancel(reason);
        if let Some(queue) = self.queue.upgrade() {
            queue.cancel_queued(self.record.id, reason);
        }
    }
}

impl<T: Clone> TaskHandle<T> {
    /// Blocks until the task reaches a terminal state
    pub fn await_result(&self) -> TaskResult<T> {
        self.slot.wait()
    }

    pub fn await_result_timeout(&self, timeout: Duration) -> Option<TaskResult<T>> {
        self.slot.wait_timeout(timeout)
    }

    pub fn try_result(&self) -> Option<TaskResult<T>> {
        self.slot.peek()
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.record.id).field("name", &self.record.name).field("state", &self.state()).finish()
    }
}

pub struct TaskScheduler<K: Send + 'static> {
    shared: Arc<Shared<K>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl<K: Ord + Send + 'static> TaskScheduler<K> {
    /// Scheduler running higher keys first
    pub fn new(workers: usize) -> Self {
        Self::with_comparator(workers, Arc::new(|a: &K, b: &K| a.cmp(b)))
    }
}

impl<K: Send + 'static> TaskScheduler<K> {
    pub fn with_comparator(workers: usize, comparator: TaskComparator<K>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            comparator,
            active: DashMap::new(),
            running: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            progress_sink: RwLock::new(None),
            task_timeout: RwLock::new(None),
        });

        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let worker_shared = Arc::clone(&shared);
            match thread::Builder::new().name(format!("plugverify-worker-{index}")).spawn(move || worker_loop(worker_shared)) {
                Ok(handle) => handles.push(handle),
                Err(error) => error!(index, error = %error, "Failed to spawn worker thread"),
            }
        }
        info!(workers = handles.len(), "Task scheduler started");

        Self {
            shared,
            worker_count: handles.len(),
            workers: Mutex::new(handles),
        }
    }

    /// Sink notified of progress of tasks submitted from now on
    pub fn set_progress_sink(&self, sink: Arc<dyn ProgressSink>) {
        *self.shared.progress_sink.write() = Some(sink);
    }

    /// Deadline applied to tasks submitted from now on, counted from submission
    pub fn set_task_timeout(&self, timeout: Option<Duration>) {
        *self.shared.task_timeout.write() = timeout;
    }

    pub fn submit<S: ServiceTask>(&self, key: K, task: S) -> TaskResult<TaskHandle<S::Output>> {
        self.enqueue(key, task, None)
    }

    pub fn submit_with_sink<S: ServiceTask>(&self, key: K, task: S, sink: Arc<dyn ResultSink<S::Output>>) -> TaskResult<TaskHandle<S::Output>> {
        self.enqueue(key, task, Some(sink))
    }

    fn enqueue<S: ServiceTask>(&self, key: K, task: S, sink: Option<Arc<dyn ResultSink<S::Output>>>) -> TaskResult<TaskHandle<S::Output>> {
        let token = match *self.shared.task_timeout.read() {
            Some(timeout) => CancellationToken::with_timeout(timeout),
            None => CancellationToken::new(),
        };
        let record = Arc::new(TaskRecord::new(task.name(), token, self.shared.progress_sink.read().clone()));
        let slot = Arc::new(ResultSlot::new());
        let job = Box::new(TypedJob {
            task,
            slot: Arc::clone(&slot),
            sink,
        });
        let queue: Weak<dyn QueueControl> = Arc::downgrade(&self.shared) as Weak<dyn QueueControl>;
        let handle = TaskHandle {
            record: Arc::clone(&record),
            slot,
            queue,
        };

        {
            let mut queue = self.shared.queue.lock();
            if self.shared.shutdown.load(AtomicOrdering::Acquire) {
                return Err(TaskError::SchedulerShutDown);
            }
            self.shared.active.insert(record.id, Arc::clone(&record));
            queue.push(QueuedTask {
                key,
                seq: self.shared.sequence.fetch_add(1, AtomicOrdering::Relaxed),
                record,
                job,
                comparator: Arc::clone(&self.shared.comparator),
            });
        }
        self.shared.available.notify_one();
        debug!(task_id = %handle.id(), name = %handle.name(), "Task queued");
        Ok(handle)
    }

    /// State of a queued or running task.
    ///
    /// Finished tasks are not retained; this returns `None` once a task has
    /// reached a terminal state, which stays readable through its [`TaskHandle`].
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.shared.active.get(&id).map(|record| record.state()).filter(|state| !state.is_terminal())
    }

    pub fn cancel(&self, id: TaskId) -> bool {
        let reason = "Cancelled by request";
        let Some(record) = self.shared.active.get(&id).map(|record| Arc::clone(record.value())) else {
            return false;
        };
        record.token.cancel(reason);
        self.shared.cancel_queued(id, reason);
        true
    }

    pub fn queued_count(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn running_count(&self) -> usize {
        self.shared.running.load(AtomicOrdering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(AtomicOrdering::Acquire)
    }

    /// Cancels queued tasks, signals running ones and joins the workers
    pub fn shutdown(&self) {
        let drained = {
            let mut queue = self.shared.queue.lock();
            if self.shared.shutdown.swap(true, AtomicOrdering::AcqRel) {
                return;
            }
            std::mem::take(&mut *queue).into_vec()
        };
        self.shared.available.notify_all();
        info!(queued = drained.len(), "Shutting down task scheduler");

        for task in drained {
            self.shared.active.remove(&task.record.id);
            task.job.abort(&task.record, TaskError::SchedulerShutDown);
        }
        let running: Vec<Arc<TaskRecord>> = self.shared.active.iter().map(|entry| Arc::clone(entry.value())).collect();
        for record in running {
            record.token.cancel("Scheduler shut down");
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        info!("Task scheduler shut down");
    }
}

impl<K: Send + 'static> Drop for TaskScheduler<K> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    struct FnTask<F> {
        name: String,
        body: F,
    }

    impl<T, F> ServiceTask for FnTask<F>
    where
        T: Send + 'static,
        F: FnOnce(&ProgressIndicator, &CancellationToken) -> TaskResult<T> + Send + 'static,
    {
        type Output = T;

        fn name(&self) -> String {
            self.name.clone()
        }

        fn execute(self, progress: &ProgressIndicator, token: &CancellationToken) -> TaskResult<T> {
            (self.body)(progress, token)
        }
    }

    fn task<T, F>(name: &str, body: F) -> FnTask<F>
    where
        F: FnOnce(&ProgressIndicator, &CancellationToken) -> TaskResult<T> + Send + 'static,
    {
        FnTask { name: name.to_string(), body }
    }

    /// Occupies the single worker until the returned sender fires
    fn blocker(scheduler: &TaskScheduler<u64>) -> (mpsc::Sender<()>, TaskHandle<()>) {
        let (release, gate) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let handle = scheduler
            .submit(
                u64::MAX,
                task("blocker", move |_, token: &CancellationToken| {
                    let _ = started_tx.send(());
                    while gate.recv_timeout(Duration::from_millis(5)).is_err() {
                        token.check()?;
                    }
                    Ok(())
                }),
            )
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        (release, handle)
    }

    fn recording(order: &Arc<Mutex<Vec<u64>>>, value: u64) -> FnTask<impl FnOnce(&ProgressIndicator, &CancellationToken) -> TaskResult<u64> + Send + 'static> {
        let order = Arc::clone(order);
        task(&format!("task {value}"), move |_, _| {
            order.lock().push(value);
            Ok(value)
        })
    }

    #[test]
    fn test_higher_key_starts_first() {
        let scheduler = TaskScheduler::<u64>::new(1);
        let (release, _blocker) = blocker(&scheduler);
        let order = Arc::new(Mutex::new(Vec::new()));

        let low = scheduler.submit(50, recording(&order, 50)).unwrap();
        let high = scheduler.submit(100, recording(&order, 100)).unwrap();
        assert_eq!(scheduler.queued_count(), 2);
        release.send(()).unwrap();

        assert_eq!(low.await_result(), Ok(50));
        assert_eq!(high.await_result(), Ok(100));
        assert_eq!(*order.lock(), vec![100, 50]);
    }

    #[test]
    fn test_finished_tasks_are_only_tracked_by_their_handle() {
        let scheduler = TaskScheduler::<u64>::new(1);
        let (release, blocker) = blocker(&scheduler);
        let queued = scheduler.submit(1, task("queued", |_, _| Ok(1u32))).unwrap();

        assert_eq!(scheduler.state(blocker.id()), Some(TaskState::Running));
        assert_eq!(scheduler.state(queued.id()), Some(TaskState::Queued));
        release.send(()).unwrap();
        assert_eq!(queued.await_result(), Ok(1));

        assert_eq!(scheduler.state(queued.id()), None);
        assert_eq!(queued.state(), TaskState::Succeeded);
    }

    #[test]
    fn test_equal_keys_run_in_submission_order() {
        let scheduler = TaskScheduler::<u64>::new(1);
        let (release, _blocker) = blocker(&scheduler);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (1..=4).map(|value| scheduler.submit(7, recording(&order, value)).unwrap()).collect();
        release.send(()).unwrap();
        for handle in &handles {
            handle.await_result().unwrap();
        }

        assert_eq!(*order.lock(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_custom_comparator_runs_lower_keys_first() {
        let scheduler = TaskScheduler::<u64>::with_comparator(1, Arc::new(|a: &u64, b: &u64| b.cmp(a)));
        let (release, gate) = mpsc::channel::<()>();
        let _first = scheduler
            .submit(0, task("gate", move |_, _| gate.recv_timeout(Duration::from_secs(5)).map_err(|e| TaskError::Failed(e.to_string()))))
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        let order = Arc::new(Mutex::new(Vec::new()));

        let late = scheduler.submit(100, recording(&order, 100)).unwrap();
        let early = scheduler.submit(50, recording(&order, 50)).unwrap();
        release.send(()).unwrap();
        early.await_result().unwrap();
        late.await_result().unwrap();

        assert_eq!(*order.lock(), vec![50, 100]);
    }

    #[test]
    fn test_cancel_queued_task_never_runs() {
        let scheduler = TaskScheduler::<u64>::new(1);
        let (release, _blocker) = blocker(&scheduler);
        let order = Arc::new(Mutex::new(Vec::new()));

        let queued = scheduler.submit(1, recording(&order, 1)).unwrap();
        queued.cancel();

        assert_eq!(queued.await_result(), Err(TaskError::Cancelled("Cancelled by request".into())));
        assert_eq!(queued.state(), TaskState::Cancelled);
        assert_eq!(scheduler.queued_count(), 0);
        release.send(()).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(order.lock().is_empty());
    }

    #[test]
    fn test_cancel_running_task_through_token() {
        let scheduler = TaskScheduler::<u64>::new(1);
        let (release, handle) = blocker(&scheduler);
        assert_eq!(handle.state(), TaskState::Running);
        assert!(scheduler.cancel(handle.id()));

        assert!(matches!(handle.await_result(), Err(TaskError::Cancelled(_))));
        assert_eq!(handle.state(), TaskState::Cancelled);
        drop(release);
    }

    #[test]
    fn test_panic_is_reported_as_task_error() {
        let scheduler = TaskScheduler::<u64>::new(1);
        let handle = scheduler.submit(1, task("boom", |_, _| -> TaskResult<()> { panic!("bad descriptor") })).unwrap();

        assert_eq!(handle.await_result(), Err(TaskError::Panicked("bad descriptor".into())));
        assert_eq!(handle.state(), TaskState::Failed);

        let next = scheduler.submit(1, task("after", |_, _| Ok(5))).unwrap();
        assert_eq!(next.await_result(), Ok(5));
    }

    #[test]
    fn test_result_sink_receives_single_callback() {
        struct Collect(Mutex<Vec<(TaskId, TaskResult<u32>)>>);

        impl ResultSink<u32> for Collect {
            fn on_result(&self, task: TaskId, result: &TaskResult<u32>) {
                self.0.lock().push((task, result.clone()));
            }
        }

        let scheduler = TaskScheduler::<u64>::new(2);
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let handle = scheduler
            .submit_with_sink(
                1,
                task("progress", |progress: &ProgressIndicator, _| {
                    progress.set(0.5);
                    Ok(3)
                }),
                sink.clone(),
            )
            .unwrap();

        assert_eq!(handle.await_result(), Ok(3));
        handle.cancel();
        assert_eq!(handle.progress(), 1.0);
        assert_eq!(*sink.0.lock(), vec![(handle.id(), Ok(3))]);
    }

    #[test]
    fn test_shutdown_cancels_queued_and_rejects_new_tasks() {
        let scheduler = TaskScheduler::<u64>::new(1);
        let (_release, running) = blocker(&scheduler);
        let queued = scheduler.submit(1, task("queued", |_, _| Ok(()))).unwrap();

        scheduler.shutdown();

        assert_eq!(queued.await_result(), Err(TaskError::SchedulerShutDown));
        assert!(running.await_result().unwrap_err().is_cancelled());
        assert!(matches!(scheduler.submit(1, task("late", |_, _| Ok(()))), Err(TaskError::SchedulerShutDown)));
        scheduler.shutdown();
    }

    #[test]
    fn test_task_timeout_cancels_through_token() {
        let scheduler = TaskScheduler::<u64>::new(1);
        scheduler.set_task_timeout(Some(Duration::from_millis(20)));
        let started = Instant::now();

        let handle = scheduler
            .submit(
                1,
                task("slow", |_, token: &CancellationToken| -> TaskResult<()> {
                    loop {
                        token.check()?;
                        thread::sleep(Duration::from_millis(2));
                    }
                }),
            )
            .unwrap();

        assert_eq!(handle.await_result(), Err(TaskError::Cancelled("Timeout".into())));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
