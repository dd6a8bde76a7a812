//! Fixed pool of inference threads
//!
//! Blocking work is sent over a channel to dedicated OS threads and the
//! result comes back on a oneshot, so the async caller only suspends. A panic
//! in the work is caught on the worker and reported to the caller; the worker
//! keeps serving.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, error, info};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OffloadError {
    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("worker pool is shut down")]
    PoolClosed,
}

/// Handle to the worker threads; the threads stop once every handle is gone
pub struct WorkerPool {
    sender: mpsc::UnboundedSender<Task>,
    size: usize,
}

impl WorkerPool {
    /// Start `size` workers (at least one)
    pub fn new(size: usize) -> io::Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));

        for index in 0..size {
            let receiver = Arc::clone(&receiver);
            thread::Builder::new()
                .name(format!("inference-worker-{}", index))
                .spawn(move || worker_loop(index, receiver))?;
        }

        info!("Started {} inference worker(s)", size);
        Ok(Self { sender, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `work` on a worker and wait for its result
    ///
    /// Dropping the returned future does not stop `work`: it runs to
    /// completion and its result is discarded.
    pub async fn run<F, R>(&self, work: F) -> Result<R, OffloadError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let task: Task = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work))
                .map_err(|payload| OffloadError::Panicked(panic_message(payload.as_ref())));
            if reply.send(outcome).is_err() {
                debug!("Caller went away, discarding worker result");
            }
        });

        self.sender.send(task).map_err(|_| OffloadError::PoolClosed)?;
        result.await.map_err(|_| OffloadError::PoolClosed)?
    }
}

fn worker_loop(index: usize, receiver: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>) {
    debug!("Inference worker {} started", index);
    loop {
        let next = match receiver.lock() {
            Ok(mut rx) => rx.blocking_recv(),
            Err(_) => {
                error!("Inference worker {} found the task queue poisoned", index);
                None
            }
        };
        match next {
            Some(task) => task(),
            None => break,
        }
    }
    debug!("Inference worker {} stopped", index);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn work_runs_off_the_runtime() {
        let pool = WorkerPool::new(1).unwrap();
        let name = pool
            .run(|| thread::current().name().map(str::to_string))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("inference-worker-0"));
    }

    #[tokio::test]
    async fn panics_become_errors_and_the_worker_survives() {
        let pool = WorkerPool::new(1).unwrap();

        let err = pool.run(|| -> u32 { panic!("boom") }).await.unwrap_err();
        assert_eq!(err, OffloadError::Panicked("boom".to_string()));

        assert_eq!(pool.run(|| 7).await, Ok(7));
    }

    #[tokio::test]
    async fn abandoned_work_still_completes() {
        let pool = WorkerPool::new(1).unwrap();
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let call = pool.run(move || {
            thread::sleep(Duration::from_millis(50));
            done_tx.send(()).unwrap();
        });
        assert!(tokio::time::timeout(Duration::from_millis(5), call).await.is_err());

        let finished = tokio::task::spawn_blocking(move || done_rx.recv_timeout(Duration::from_secs(2)))
            .await
            .unwrap();
        assert!(finished.is_ok());
    }

    #[test]
    fn zero_workers_means_one() {
        assert_eq!(WorkerPool::new(0).unwrap().size(), 1);
    }
}
