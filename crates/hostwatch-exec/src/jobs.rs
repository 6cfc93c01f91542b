//! Background job tracking.
//!
//! Job records live in a single map behind one mutex; the fields a runner
//! thread touches are atomics (plus the output mutex) so completion updates
//! never take the map lock. Runners share only the cancel flag and the
//! record itself, so there is no owning cycle to leak.

use crate::runner::{self, RunSpec};
use hostwatch_common::audit::AuditLog;
use hostwatch_common::error::AgentError;
use hostwatch_common::types::JobSnapshot;
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const JOB_ID_LEN: usize = 12;
const JOB_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub struct JobSpec {
    pub argv: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

struct Job {
    job_id: String,
    completed: AtomicBool,
    timed_out: AtomicBool,
    cancel_requested: Arc<AtomicBool>,
    truncated: AtomicBool,
    exit_code: AtomicI32,
    started_at: AtomicU64,
    completed_at: AtomicU64,
    output: Mutex<String>,
}

impl Job {
    fn new(job_id: String) -> Self {
        Self {
            job_id,
            completed: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            truncated: AtomicBool::new(false),
            exit_code: AtomicI32::new(-1),
            started_at: AtomicU64::new(now_secs()),
            completed_at: AtomicU64::new(0),
            output: Mutex::new(String::new()),
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            completed: self.completed.load(Ordering::Acquire),
            timed_out: self.timed_out.load(Ordering::Acquire),
            cancel_requested: self.cancel_requested.load(Ordering::Acquire),
            truncated: self.truncated.load(Ordering::Acquire),
            exit_code: self.exit_code.load(Ordering::Acquire),
            started_at: self.started_at.load(Ordering::Acquire),
            completed_at: self.completed_at.load(Ordering::Acquire),
            output: self.output.lock().unwrap().clone(),
        }
    }
}

pub struct JobManager {
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    audit: Arc<AuditLog>,
}

impl JobManager {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            audit,
        }
    }

    /// Admit and launch a job, or fail with RESOURCE_EXHAUSTED when
    /// `max_concurrent` jobs are still running.
    pub fn start(&self, spec: JobSpec, max_concurrent: usize) -> Result<String, AgentError> {
        let job = {
            let mut jobs = self.jobs.lock().unwrap();
            let running = jobs
                .values()
                .filter(|job| !job.completed.load(Ordering::Acquire))
                .count();
            if running >= max_concurrent {
                return Err(AgentError::ResourceExhausted(format!(
                    "{running} jobs already running (limit {max_concurrent})"
                )));
            }
            let job = Arc::new(Job::new(unique_id(&jobs)));
            jobs.insert(job.job_id.clone(), Arc::clone(&job));
            job
        };

        self.audit.record(&format!("JOB_START id={}", job.job_id));
        tracing::info!(job_id = %job.job_id, "job started");

        let audit = Arc::clone(&self.audit);
        let record = Arc::clone(&job);
        let run_spec = RunSpec {
            argv: spec.argv,
            env: spec.env,
            cwd: spec.cwd,
            timeout: spec.timeout,
            max_output_bytes: spec.max_output_bytes,
            cancel: Arc::clone(&record.cancel_requested),
        };
        std::thread::spawn(move || {
            match runner::run(run_spec) {
                Ok(result) => {
                    *record.output.lock().unwrap() = result.combined;
                    record.truncated.store(result.truncated, Ordering::Release);
                    record.timed_out.store(result.timed_out, Ordering::Release);
                    record.exit_code.store(result.exit_code, Ordering::Release);
                }
                Err(err) => {
                    *record.output.lock().unwrap() = format!("spawn failed: {err}");
                    tracing::warn!(job_id = %record.job_id, error = %err, "job spawn failed");
                }
            }
            record.completed_at.store(now_secs(), Ordering::Release);
            record.completed.store(true, Ordering::Release);
            audit.record(&format!(
                "JOB_COMPLETE id={} exit={}",
                record.job_id,
                record.exit_code.load(Ordering::Acquire)
            ));
        });

        Ok(job.job_id.clone())
    }

    pub fn get(&self, job_id: &str) -> Result<JobSnapshot, AgentError> {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(job_id)
            .map(|job| job.snapshot())
            .ok_or_else(|| AgentError::not_found(format!("Unknown job id: {job_id}")))
    }

    /// Request cancellation. The runner observes the flag at its next poll
    /// tick. Cancelling a completed job is a no-op success.
    pub fn cancel(&self, job_id: &str) -> Result<(), AgentError> {
        let job = {
            let jobs = self.jobs.lock().unwrap();
            jobs.get(job_id)
                .cloned()
                .ok_or_else(|| AgentError::not_found(format!("Unknown job id: {job_id}")))?
        };
        if !job.completed.load(Ordering::Acquire) {
            job.cancel_requested.store(true, Ordering::Release);
        }
        self.audit.record(&format!("JOB_KILL id={job_id}"));
        Ok(())
    }

    /// Drop completed jobs older than the retention window, then list the rest.
    pub fn list(&self, retention: Duration) -> Vec<JobSnapshot> {
        self.purge(retention);
        let jobs = self.jobs.lock().unwrap();
        let mut snapshots: Vec<JobSnapshot> = jobs.values().map(|job| job.snapshot()).collect();
        snapshots.sort_by_key(|snap| (snap.started_at, snap.job_id.clone()));
        snapshots
    }

    pub fn purge(&self, retention: Duration) {
        let now = now_secs();
        let mut jobs = self.jobs.lock().unwrap();
        jobs.retain(|_, job| {
            !(job.completed.load(Ordering::Acquire)
                && now.saturating_sub(job.completed_at.load(Ordering::Acquire))
                    > retention.as_secs())
        });
    }

    pub fn running_count(&self) -> usize {
        let jobs = self.jobs.lock().unwrap();
        jobs.values()
            .filter(|job| !job.completed.load(Ordering::Acquire))
            .count()
    }
}

fn unique_id(jobs: &HashMap<String, Arc<Job>>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let id: String = (0..JOB_ID_LEN)
            .map(|_| JOB_ID_CHARSET[rng.gen_range(0..JOB_ID_CHARSET.len())] as char)
            .collect();
        if !jobs.contains_key(&id) {
            return id;
        }
    }
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
