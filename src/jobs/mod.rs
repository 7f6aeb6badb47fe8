//! Two-priority job execution.
//!
//! Jobs are a closed set of typed descriptors carrying chunk slots. Workers
//! prefer the high-priority queue, park on both channels when idle, and wake
//! when work or shutdown arrives. Shutdown drops the senders; workers drain
//! what is queued, then exit. Each worker owns a scratch arena and wraps
//! every job in a temporary scope.

use crate::memory::{Arena, TempArena};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

pub const MAX_WORKERS: usize = 16;
pub const JOB_QUEUE_CAP: usize = 16 * 1024;
pub const WORKER_ARENA_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Generate a chunk and patch it from its delta file.
    Load { slot: u32 },
    /// Re-tessellate one sub-chunk.
    MeshSubChunk { slot: u32, sub_index: usize },
    /// Serialize a dirty chunk's delta file.
    Save { slot: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

pub trait JobExecutor: Send + Sync + 'static {
    fn execute(&self, job: Job, temp: &TempArena<'_>);
}

pub struct JobSystem {
    high: Sender<Job>,
    low: Sender<Job>,
    in_flight: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

/// Worker thread count for this machine: everything except the main thread
/// and the dedicated light thread.
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cores.saturating_sub(2).clamp(1, MAX_WORKERS)
}

impl JobSystem {
    pub fn start<E: JobExecutor>(executor: Arc<E>, worker_count: usize) -> Self {
        let worker_count = worker_count.clamp(1, MAX_WORKERS);
        let (high_tx, high_rx) = bounded(JOB_QUEUE_CAP);
        let (low_tx, low_rx) = bounded(JOB_QUEUE_CAP);
        let in_flight = Arc::new(AtomicUsize::new(0));

        let workers = (0..worker_count)
            .map(|index| {
                let executor = executor.clone();
                let high = high_rx.clone();
                let low = low_rx.clone();
                let in_flight = in_flight.clone();
                std::thread::Builder::new()
                    .name(format!("worker-{index}"))
                    .spawn(move || worker_loop(executor, high, low, in_flight))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        info!("job system started with {worker_count} workers");
        Self {
            high: high_tx,
            low: low_tx,
            in_flight,
            workers,
        }
    }

    pub fn dispatch(&self, job: Job, priority: Priority) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let queue = match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        };
        queue.send(job).expect("job queue closed while dispatching");
    }

    /// Jobs dispatched but not yet finished executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    /// Closes the queues and joins the workers after they drain.
    pub fn shutdown(self) {
        drop(self.high);
        drop(self.low);
        for worker in self.workers {
            let _ = worker.join();
        }
        debug!("job system stopped");
    }
}

fn worker_loop<E: JobExecutor>(
    executor: Arc<E>,
    high: Receiver<Job>,
    low: Receiver<Job>,
    in_flight: Arc<AtomicUsize>,
) {
    let mut arena = Arena::new(WORKER_ARENA_BYTES);
    loop {
        let job = match next_job(&high, &low) {
            Some(job) => job,
            None => break,
        };
        arena.with_temp(|temp| executor.execute(job, temp));
        in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// High queue first, then low; blocks on both when neither has work.
/// Returns None when the queues are closed and drained.
fn next_job(high: &Receiver<Job>, low: &Receiver<Job>) -> Option<Job> {
    loop {
        match high.try_recv() {
            Ok(job) => return Some(job),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }
        match low.try_recv() {
            Ok(job) => return Some(job),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }

        crossbeam_channel::select! {
            recv(high) -> msg => match msg {
                Ok(job) => return Some(job),
                Err(_) => {
                    // High side closed; take whatever low still holds.
                    return low.try_recv().ok();
                }
            },
            recv(low) -> msg => match msg {
                Ok(job) => return Some(job),
                Err(_) => {
                    return high.try_recv().ok();
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        order: Mutex<Vec<Job>>,
        gate: Mutex<()>,
    }

    impl JobExecutor for Recorder {
        fn execute(&self, job: Job, temp: &TempArena<'_>) {
            // Every job gets arena scratch.
            let scratch: &mut [u64] = temp.alloc_slice(32);
            scratch[0] = 1;
            let _gate = self.gate.lock();
            self.order.lock().push(job);
        }
    }

    #[test]
    fn executes_dispatched_jobs() {
        let recorder = Arc::new(Recorder {
            order: Mutex::new(Vec::new()),
            gate: Mutex::new(()),
        });
        let jobs = JobSystem::start(recorder.clone(), 2);
        for slot in 0..16 {
            jobs.dispatch(Job::Load { slot }, Priority::Low);
        }
        jobs.shutdown();
        assert_eq!(recorder.order.lock().len(), 16);
    }

    #[test]
    fn high_priority_overtakes_low() {
        let recorder = Arc::new(Recorder {
            order: Mutex::new(Vec::new()),
            gate: Mutex::new(()),
        });

        // Hold the gate so queued jobs pile up behind the first one, then
        // observe which of the queued jobs runs first.
        let gate = recorder.gate.lock();
        let jobs = JobSystem::start(recorder.clone(), 1);
        jobs.dispatch(Job::Load { slot: 0 }, Priority::Low);
        // Give the worker time to pick up the blocker.
        std::thread::sleep(std::time::Duration::from_millis(50));
        jobs.dispatch(Job::Load { slot: 1 }, Priority::Low);
        jobs.dispatch(Job::Save { slot: 2 }, Priority::High);
        drop(gate);
        jobs.shutdown();

        let order = recorder.order.lock();
        assert_eq!(order.len(), 3);
        assert_eq!(order[1], Job::Save { slot: 2 });
        assert_eq!(order[2], Job::Load { slot: 1 });
    }

    #[test]
    fn in_flight_reaches_zero_after_shutdown() {
        let recorder = Arc::new(Recorder {
            order: Mutex::new(Vec::new()),
            gate: Mutex::new(()),
        });
        let jobs = JobSystem::start(recorder, 4);
        for slot in 0..64 {
            jobs.dispatch(
                Job::MeshSubChunk {
                    slot,
                    sub_index: 0,
                },
                Priority::High,
            );
        }
        while !jobs.is_idle() {
            std::thread::yield_now();
        }
        jobs.shutdown();
    }
}
