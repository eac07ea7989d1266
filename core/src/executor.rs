//! The executor: a single-consumer FIFO task queue that gives the store
//! its atomicity guarantee — nothing but the executor thread ever
//! mutates collection state, so two submitted operations can never
//! interleave.
//!
//! Built on `crossbeam_channel`'s unbounded MPSC channel. The buffered
//! pre-ready phase defers queued operations issued before a persisted
//! stream has finished loading.

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// The pre-ready flag and its buffer live behind one lock so a
/// concurrent `push` and `set_ready` can never interleave: either the
/// push is decided (and, if buffered, queued) before the drain starts,
/// or it lands after the drain and goes straight to the channel.
/// Splitting this into two separate locks would open a window where a
/// racing push reads `ready == true` and sends directly, jumping ahead
/// of buffered tasks `set_ready` hasn't drained yet.
struct Gate {
    ready: bool,
    buffer: Vec<Task>,
}

/// A single-consumer FIFO executor.
///
/// Before `set_ready` is called, submitted tasks are held in an internal
/// buffer rather than handed to the worker thread — this lets a store
/// queue up operations issued during database load without running them
/// out of order against the load itself.
pub struct Executor {
    sender: Sender<Task>,
    gate: Arc<Mutex<Gate>>,
    _worker: JoinHandle<()>,
}

impl Executor {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded::<Task>();
        let worker = std::thread::spawn(move || {
            while let Ok(task) = receiver.recv() {
                task();
            }
        });
        Executor {
            sender,
            gate: Arc::new(Mutex::new(Gate { ready: true, buffer: Vec::new() })),
            _worker: worker,
        }
    }

    /// Start in the not-ready state: tasks submitted before [`Executor::set_ready`]
    /// queue in the buffer instead of running immediately.
    pub fn new_buffered() -> Self {
        let exec = Self::new();
        exec.gate.lock().ready = false;
        exec
    }

    /// Submit a task. If the executor isn't ready yet, the task is held
    /// in the pre-ready buffer and runs (in submission order) once
    /// [`Executor::set_ready`] is called — unless `force_queuing` is set,
    /// in which case it bypasses the buffer and goes straight to the
    /// worker thread regardless of readiness. This lets an internal boot
    /// task (replaying persisted state) run ahead of whatever user work
    /// is already sitting in the pre-ready buffer.
    pub fn push(&self, task: Task, force_queuing: bool) {
        let mut gate = self.gate.lock();
        if force_queuing || gate.ready {
            let _ = self.sender.send(task);
        } else {
            gate.buffer.push(task);
        }
    }

    /// Mark the executor ready and drain the pre-ready buffer onto the
    /// worker thread, preserving submission order.
    pub fn set_ready(&self) {
        let mut gate = self.gate.lock();
        gate.ready = true;
        for task in gate.buffer.drain(..) {
            let _ = self.sender.send(task);
        }
    }

    /// Submit `f` and block until it has run, returning its result. This
    /// is how the store turns an async-shaped queue into the synchronous
    /// `Result`-returning API the rest of this crate exposes.
    pub fn submit<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_inner(f, false)
    }

    /// Like [`Executor::submit`], but forces the task ahead of any
    /// buffered pre-ready work instead of joining the back of it. Used
    /// for the boot task that replays persisted state: it must run (and
    /// this call must return) before `set_ready` can safely drain
    /// whatever user work arrived first.
    pub fn submit_boot<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_inner(f, true)
    }

    fn submit_inner<F, T>(&self, f: F, force_queuing: bool) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        self.push(
            Box::new(move || {
                let _ = tx.send(f());
            }),
            force_queuing,
        );
        rx.recv().expect("executor worker thread must still be alive")
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn tasks_run_in_submission_order() {
        let exec = Executor::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..50 {
            let order = order.clone();
            handles.push(exec.submit(move || {
                order.lock().push(i);
                i
            }));
        }
        assert_eq!(*order.lock(), (0..50).collect::<Vec<_>>());
        assert_eq!(handles, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn buffered_tasks_wait_for_ready() {
        let exec = Executor::new_buffered();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        exec.push(
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            false,
        );
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        exec.set_ready();
        let result = exec.submit(|| 1);
        assert_eq!(result, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forced_task_runs_ahead_of_buffer_before_ready() {
        let exec = Executor::new_buffered();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        exec.push(Box::new(move || o.lock().push("buffered")), false);

        let boot_result = exec.submit_boot(|| {
            order.lock().push("boot");
            "booted"
        });
        assert_eq!(boot_result, "booted");
        assert_eq!(*order.lock(), vec!["boot"]);

        exec.set_ready();
        let _ = exec.submit(|| ());
        assert_eq!(*order.lock(), vec!["boot", "buffered"]);
    }
}
