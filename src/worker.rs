//! Background correction worker
//!
//! A single dedicated thread executes one job at a time. Callers never block
//! on a fit: they submit a job with a callback and receive progress and the
//! final result through it. At most one job may be in flight process-wide;
//! a second submission while one is active is rejected with `Busy`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::error::{CorrectionError, Result};
use crate::job::{run_job, FitJob, JobReport, JobServices, JobStage};
use crate::kernel::CancelToken;

/// Set while a job is queued or running anywhere in the process
static JOB_IN_FLIGHT: AtomicBool = AtomicBool::new(false);

/// Event delivered to a job's callback
#[derive(Debug)]
pub enum WorkerEvent {
    Progress(JobStage),
    Finished(Result<JobReport>),
}

type Callback = Box<dyn Fn(WorkerEvent) + Send>;

struct WorkItem {
    job: FitJob,
    services: JobServices,
    cancel: CancelToken,
    callback: Callback,
}

/// Handle to a submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    cancel: CancelToken,
}

impl JobHandle {
    /// Request cancellation; any running kernel is terminated
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Clears the in-flight flag when a job ends, including by panic
struct InFlightGuard;

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        JOB_IN_FLIGHT.store(false, Ordering::SeqCst);
    }
}

/// Single-thread executor for correction jobs
pub struct CorrectionWorker {
    sender: Option<mpsc::Sender<WorkItem>>,
    handle: Option<JoinHandle<()>>,
}

impl CorrectionWorker {
    /// Spawn the worker thread
    ///
    /// # Errors
    ///
    /// `Io` if the thread cannot be spawned.
    pub fn new() -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<WorkItem>();
        let handle = thread::Builder::new()
            .name("correction-worker".to_string())
            .spawn(move || worker_loop(receiver))
            .map_err(|e| CorrectionError::io("spawning correction worker", e))?;
        info!("Correction worker started");
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Whether any job is in flight in this process
    pub fn is_busy() -> bool {
        JOB_IN_FLIGHT.load(Ordering::SeqCst)
    }

    /// Queue `job` for execution
    ///
    /// The callback runs on the worker thread, once per progress stage and
    /// once with the final result. The in-flight flag is cleared before the
    /// final event, so the callback may submit a follow-up job.
    ///
    /// # Errors
    ///
    /// `Busy` while another job is in flight.
    pub fn submit<F>(&self, job: FitJob, services: JobServices, callback: F) -> Result<JobHandle>
    where
        F: Fn(WorkerEvent) + Send + 'static,
    {
        if JOB_IN_FLIGHT
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Rejected correction job: another job is in progress");
            return Err(CorrectionError::Busy);
        }

        let cancel = CancelToken::new();
        let item = WorkItem {
            job,
            services,
            cancel: cancel.clone(),
            callback: Box::new(callback),
        };
        let sent = self.sender.as_ref().map(|sender| sender.send(item));
        match sent {
            Some(Ok(())) => Ok(JobHandle { cancel }),
            _ => {
                JOB_IN_FLIGHT.store(false, Ordering::SeqCst);
                Err(CorrectionError::io(
                    "submitting correction job",
                    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stopped"),
                ))
            }
        }
    }

    /// Stop accepting jobs and wait for the current one to finish
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Correction worker panicked");
            }
            info!("Correction worker shut down");
        }
    }
}

impl Drop for CorrectionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(receiver: mpsc::Receiver<WorkItem>) {
    while let Ok(item) = receiver.recv() {
        let WorkItem {
            job,
            services,
            cancel,
            callback,
        } = item;
        let guard = InFlightGuard;
        debug!(inputs = job.inputs.len(), kind = %job.config.kind, "Running correction job");

        let result = run_job(&job, &services, &cancel, &|stage| callback(WorkerEvent::Progress(stage)));
        match &result {
            Ok(report) => info!(path = %report.path.display(), "Correction job finished"),
            Err(CorrectionError::Cancelled) => info!("Correction job cancelled"),
            Err(err) => warn!(error = %err, "Correction job failed"),
        }

        drop(guard);
        callback(WorkerEvent::Finished(result));
    }
}
