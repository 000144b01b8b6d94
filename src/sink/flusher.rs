//! Batch flush loop
//!
//! Samples and alert transitions stream into the flusher over a channel and
//! are written to the store in batches on a fixed cadence, decoupled from
//! the sampling intervals. Transient store failures are retried with bounded
//! exponential backoff; past the ceiling the batch is dropped and counted.
//! Data loss is explicit and observable, never silent beyond the counter.

use crate::config::StorageConfig;
use crate::error::FlushError;
use crate::sink::storage::{Record, SampleStore};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Retry schedule for transient flush failures
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    fn from_config(config: &StorageConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Attempt a batch append, retrying transient failures
///
/// `keep_trying` is consulted before each backoff sleep so a shutdown can
/// abandon the retry loop within a bounded grace period.
pub(crate) fn flush_with_retry(
    store: &mut dyn SampleStore,
    batch: &[Record],
    policy: &RetryPolicy,
    keep_trying: &dyn Fn() -> bool,
) -> Result<(), FlushError> {
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        match store.append(batch) {
            Ok(()) => return Ok(()),
            Err(FlushError::Permanent(reason)) => {
                return Err(FlushError::Permanent(reason));
            }
            Err(FlushError::Transient(reason)) => {
                attempt += 1;
                if attempt > policy.max_retries {
                    return Err(FlushError::Transient(format!(
                        "{} (after {} retries)",
                        reason, policy.max_retries
                    )));
                }
                if !keep_trying() {
                    return Err(FlushError::Transient(format!(
                        "{} (abandoned during shutdown)",
                        reason
                    )));
                }
                debug!(
                    "Transient flush failure (attempt {}/{}), retrying in {:?}: {}",
                    attempt, policy.max_retries, backoff, reason
                );
                thread::sleep(backoff);
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }
}

/// Background thread flushing records to durable storage
pub struct Flusher {
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<Mutex<bool>>,
    records_dropped: Arc<AtomicU64>,
}

impl Flusher {
    /// Start the flush thread over a record channel
    pub fn start(
        mut store: Box<dyn SampleStore>,
        receiver: Receiver<Record>,
        config: &StorageConfig,
    ) -> Self {
        let running = Arc::new(Mutex::new(true));
        let records_dropped = Arc::new(AtomicU64::new(0));

        let policy = RetryPolicy::from_config(config);
        let flush_interval = Duration::from_millis(config.flush_interval_ms);
        let thread_running = Arc::clone(&running);
        let thread_dropped = Arc::clone(&records_dropped);

        let handle = thread::spawn(move || {
            info!("Flusher started with interval {:?}", flush_interval);
            let mut pending: Vec<Record> = Vec::new();
            let mut last_flush = Instant::now();

            loop {
                match receiver.recv_timeout(Duration::from_millis(100)) {
                    Ok(record) => pending.push(record),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        debug!("Record channel disconnected");
                        break;
                    }
                }

                let shutting_down = !*thread_running.lock().unwrap();
                if shutting_down {
                    // Drain whatever is still queued before the final flush
                    while let Ok(record) = receiver.try_recv() {
                        pending.push(record);
                    }
                }

                if !pending.is_empty()
                    && (shutting_down || last_flush.elapsed() >= flush_interval)
                {
                    Self::flush_pending(
                        store.as_mut(),
                        &mut pending,
                        &policy,
                        &thread_running,
                        &thread_dropped,
                    );
                    last_flush = Instant::now();
                }

                if shutting_down {
                    break;
                }
            }

            // Flush anything left after a channel disconnect
            if !pending.is_empty() {
                Self::flush_pending(
                    store.as_mut(),
                    &mut pending,
                    &policy,
                    &thread_running,
                    &thread_dropped,
                );
            }
            info!("Flusher stopped");
        });

        Self {
            thread_handle: Some(handle),
            running,
            records_dropped,
        }
    }

    fn flush_pending(
        store: &mut dyn SampleStore,
        pending: &mut Vec<Record>,
        policy: &RetryPolicy,
        running: &Arc<Mutex<bool>>,
        dropped: &Arc<AtomicU64>,
    ) {
        let keep_trying = || *running.lock().unwrap();
        match flush_with_retry(store, pending, policy, &keep_trying) {
            Ok(()) => {
                debug!("Flushed {} records", pending.len());
                pending.clear();
            }
            Err(e) => {
                let lost = pending.len() as u64;
                let total = dropped.fetch_add(lost, Ordering::Relaxed) + lost;
                error!(
                    "Dropping {} records after exhausted flush attempts ({} dropped total): {}",
                    lost, total, e
                );
                pending.clear();
            }
        }
    }

    /// Total records dropped after exhausted flush attempts
    pub fn dropped_records(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    /// Stop the flush thread, flushing queued records first
    pub fn stop(&mut self) {
        info!("Stopping flusher");
        {
            let mut running = self.running.lock().unwrap();
            *running = false;
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Flusher thread panicked during shutdown");
            }
        }
    }
}
