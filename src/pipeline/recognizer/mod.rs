pub mod classifier;
pub mod common;
pub mod ort;
pub mod palm;

use std::{
    sync::{Arc, Mutex},
    thread,
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::{
    error::SubmitError,
    types::{Completion, Frame, GestureCandidate, HandLandmarks},
};

/// Synchronous hand detection used to decide whether a frame is worth
/// submitting for gesture inference.
pub trait HandLandmarkDetector {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandLandmarks>>;

    /// Frees model resources. Called once when the capture loop ends.
    fn release(&mut self) {}
}

/// Asynchronous gesture inference.
///
/// Each accepted submission eventually produces one [`Completion`] on the
/// engine's completion handler, possibly on another thread and in any order
/// relative to other submissions. Timestamps must strictly increase.
pub trait GestureInferenceEngine {
    fn submit_async(&self, image: Arc<Frame>, timestamp: u64) -> Result<(), SubmitError>;
}

/// Per-image gesture recognition run by one inference worker.
pub trait GestureModel: Send + 'static {
    /// One ranked candidate list per detected hand.
    fn recognize(&mut self, frame: &Frame) -> anyhow::Result<Vec<Vec<GestureCandidate>>>;
}

pub type CompletionHandler = Arc<dyn Fn(Completion) + Send + Sync>;

struct Job {
    image: Arc<Frame>,
    timestamp: u64,
}

/// Fixed pool of worker threads, each owning one [`GestureModel`], fed from a
/// bounded queue. A full queue drops the submission instead of blocking the
/// capture loop.
pub struct InferencePool {
    job_tx: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    last_timestamp: Mutex<Option<u64>>,
}

impl InferencePool {
    pub fn spawn<M: GestureModel>(
        models: Vec<M>,
        queue_depth: usize,
        on_complete: CompletionHandler,
    ) -> Self {
        let (job_tx, job_rx) = bounded(queue_depth.max(1));

        let workers = models
            .into_iter()
            .enumerate()
            .map(|(id, model)| {
                let job_rx = job_rx.clone();
                let on_complete = Arc::clone(&on_complete);
                thread::Builder::new()
                    .name(format!("inference-{id}"))
                    .spawn(move || run_worker(id, model, job_rx, on_complete))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    log::error!("failed to spawn inference worker: {err}");
                    None
                }
            })
            .collect::<Vec<_>>();

        log::info!("inference pool running with {} workers", workers.len());

        Self {
            job_tx: Some(job_tx),
            workers,
            last_timestamp: Mutex::new(None),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting work, lets workers drain the queue and joins them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.job_tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("inference worker panicked");
            }
        }
    }
}

impl GestureInferenceEngine for InferencePool {
    fn submit_async(&self, image: Arc<Frame>, timestamp: u64) -> Result<(), SubmitError> {
        let job_tx = self.job_tx.as_ref().ok_or(SubmitError::Closed)?;
        if self.workers.is_empty() {
            return Err(SubmitError::Closed);
        }

        let mut last = self
            .last_timestamp
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(last) = *last {
            if timestamp <= last {
                return Err(SubmitError::NonMonotonic { timestamp, last });
            }
        }

        match job_tx.try_send(Job { image, timestamp }) {
            Ok(()) => {
                *last = Some(timestamp);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                *last = Some(timestamp);
                Err(SubmitError::Busy(timestamp))
            }
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Closed),
        }
    }
}

impl Drop for InferencePool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<M: GestureModel>(
    id: usize,
    mut model: M,
    job_rx: Receiver<Job>,
    on_complete: CompletionHandler,
) {
    while let Ok(Job { image, timestamp }) = job_rx.recv() {
        match model.recognize(&image) {
            Ok(hands) => on_complete(Completion {
                timestamp,
                hands,
                image,
            }),
            Err(err) => {
                log::warn!("gesture inference failed on worker {id} at timestamp {timestamp}: {err:?}");
            }
        }
    }
    log::debug!("inference worker {id} stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::gesture::Gesture;

    struct FixedModel(Gesture);

    impl GestureModel for FixedModel {
        fn recognize(&mut self, _frame: &Frame) -> anyhow::Result<Vec<Vec<GestureCandidate>>> {
            Ok(vec![vec![GestureCandidate::new(self.0, 1.0, 0)]])
        }
    }

    /// Blocks inside `recognize` until released, so the queue can be filled.
    struct GatedModel(Arc<Mutex<()>>);

    impl GestureModel for GatedModel {
        fn recognize(&mut self, _frame: &Frame) -> anyhow::Result<Vec<Vec<GestureCandidate>>> {
            let _open = self.0.lock().unwrap();
            Ok(Vec::new())
        }
    }

    fn image() -> Arc<Frame> {
        Arc::new(Frame::new(vec![0; 4], 1, 1))
    }

    fn collecting() -> (CompletionHandler, mpsc::Receiver<Completion>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler: CompletionHandler = Arc::new(move |c| {
            let _ = tx.lock().unwrap().send(c);
        });
        (handler, rx)
    }

    #[test]
    fn every_submission_completes_once() {
        let (handler, completions) = collecting();
        let pool = InferencePool::spawn(
            vec![FixedModel(Gesture::Victory), FixedModel(Gesture::Victory)],
            8,
            handler,
        );
        assert_eq!(pool.worker_count(), 2);

        for ts in 0..5 {
            pool.submit_async(image(), ts).unwrap();
        }
        pool.shutdown();

        let mut stamps: Vec<u64> = completions.try_iter().map(|c| c.timestamp).collect();
        stamps.sort();
        assert_eq!(stamps, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn rejects_repeated_or_decreasing_timestamps() {
        let (handler, _completions) = collecting();
        let pool = InferencePool::spawn(vec![FixedModel(Gesture::OpenPalm)], 8, handler);

        pool.submit_async(image(), 10).unwrap();
        assert_eq!(
            pool.submit_async(image(), 10),
            Err(SubmitError::NonMonotonic {
                timestamp: 10,
                last: 10
            })
        );
        assert!(pool.submit_async(image(), 3).is_err());
        pool.submit_async(image(), 11).unwrap();
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        let (handler, completions) = collecting();
        let pool = InferencePool::spawn(vec![GatedModel(Arc::clone(&gate))], 1, handler);

        // First job is picked up by the worker and blocks; wait until it has
        // left the queue, then fill the single slot.
        pool.submit_async(image(), 0).unwrap();
        let mut ts = 1;
        while pool.submit_async(image(), ts).is_err() {
            ts += 1;
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.submit_async(image(), ts + 1), Err(SubmitError::Busy(ts + 1)));

        drop(held);
        pool.shutdown();
        assert_eq!(completions.try_iter().count(), 2);
    }

    #[test]
    fn pool_without_workers_is_closed() {
        let (handler, _completions) = collecting();
        let pool = InferencePool::spawn(Vec::<FixedModel>::new(), 4, handler);
        assert_eq!(pool.submit_async(image(), 0), Err(SubmitError::Closed));
    }
}
