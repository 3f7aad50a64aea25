//! Bounded worker pool feeding per-device polling jobs.
//!
//! Modeled directly on the original's `ThreadPoolExecutor(max_workers=5)`
//! (`examples/original_source/services/polling_service.py`): a fixed number
//! of OS threads pull jobs off a shared queue, and a submitted job's
//! completion can be awaited with a timeout, mirroring `future.result(timeout=...)`.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize, thread_name_prefix: &str) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..size)
            .map(|i| {
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("{thread_name_prefix}-{i}"))
                    .spawn(move || loop {
                        let job = receiver.lock().unwrap().recv();
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn worker pool thread")
            })
            .collect();
        Self { sender: Some(sender), workers }
    }

    /// Submits `job` and returns a handle whose completion can be awaited
    /// with a timeout. Jobs queue if every worker is busy.
    pub fn submit<F>(&self, job: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let wrapped: Job = Box::new(move || {
            job();
            let _ = done_tx.send(());
        });
        self.sender
            .as_ref()
            .expect("worker pool submitted to after shutdown")
            .send(wrapped)
            .expect("worker pool channel closed unexpectedly");
        TaskHandle { done: done_rx }
    }

    /// Cancels pending (unstarted) jobs by closing the queue, then joins
    /// every worker thread — `ThreadPoolExecutor.shutdown(cancel_futures=True)`.
    pub fn shutdown(mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// A handle to a submitted job's completion signal.
pub struct TaskHandle {
    done: Receiver<()>,
}

impl TaskHandle {
    /// Blocks until the job completes or `timeout` elapses; `false` means
    /// the job did not finish within the ceiling (it may still be running).
    pub fn wait(&self, timeout: Duration) -> bool {
        self.done.recv_timeout(timeout).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn submitted_jobs_all_run() {
        let pool = WorkerPool::new(3, "test-pool");
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.wait(Duration::from_secs(1)));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        pool.shutdown();
    }

    #[test]
    fn wait_times_out_on_slow_job() {
        let pool = WorkerPool::new(1, "slow-pool");
        let handle = pool.submit(|| thread::sleep(Duration::from_millis(200)));
        assert!(!handle.wait(Duration::from_millis(10)));
        assert!(handle.wait(Duration::from_secs(1)));
        pool.shutdown();
    }
}
