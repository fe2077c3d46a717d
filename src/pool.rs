// In: src/pool.rs

//! A fixed-size pool of OS threads executing independent work units.
//!
//! The whole unit queue is pushed into a channel before any worker starts, so the
//! queue is a read-only snapshot and no unit can be handed out twice. Workers send
//! their outcomes back over a second channel; the coordinator only assembles the
//! final list once every worker has been joined.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel;

use crate::error::BloarkError;
use crate::logging::ProgressSink;

/// Stops dispatch of new units. Units already running finish normally.
///
/// A cancel applies to the run in progress; every `WorkerPool::run` starts uncancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What happened to one unit.
#[derive(Debug)]
pub enum UnitOutcome<T> {
    Succeeded { unit: PathBuf, value: T },
    Failed { unit: PathBuf, error: BloarkError },
    /// Never dispatched because the run was cancelled.
    NotRun { unit: PathBuf },
}

impl<T> UnitOutcome<T> {
    pub fn unit(&self) -> &Path {
        match self {
            UnitOutcome::Succeeded { unit, .. }
            | UnitOutcome::Failed { unit, .. }
            | UnitOutcome::NotRun { unit } => unit,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Succeeded { .. })
    }
}

enum PoolEvent<T> {
    Started(usize),
    Finished(usize, Result<T, BloarkError>),
}

#[derive(Debug)]
pub struct WorkerPool {
    workers: usize,
    cancel: CancelHandle,
}

impl WorkerPool {
    /// A pool without workers can never make progress, so it is refused outright.
    pub fn new(workers: usize) -> Result<Self, BloarkError> {
        if workers == 0 {
            return Err(BloarkError::Pool("worker pool needs at least one worker".into()));
        }
        Ok(Self {
            workers,
            cancel: CancelHandle::default(),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Runs `job` once for every unit and returns the outcomes in queue order.
    ///
    /// `job` receives the unit's queue index and path. A panicking job is caught and
    /// recorded as a `WorkerFailure`; its worker moves on to the next unit.
    pub fn run<T, F>(
        &self,
        units: &[PathBuf],
        progress: &dyn ProgressSink,
        job: F,
    ) -> Result<Vec<UnitOutcome<T>>, BloarkError>
    where
        T: Send,
        F: Fn(usize, &Path) -> Result<T, BloarkError> + Sync,
    {
        self.cancel.reset();
        let total = units.len();
        let (queue_tx, queue_rx) = channel::unbounded::<(usize, &Path)>();
        for (idx, unit) in units.iter().enumerate() {
            // The receiver is alive in this scope, so sending cannot fail.
            let _ = queue_tx.send((idx, unit.as_path()));
        }
        drop(queue_tx);

        let (event_tx, event_rx) = channel::unbounded::<PoolEvent<T>>();
        let mut results: Vec<Option<Result<T, BloarkError>>> = (0..total).map(|_| None).collect();
        let worker_count = self.workers.min(total.max(1));

        thread::scope(|s| -> Result<(), BloarkError> {
            let mut spawned = 0;
            for worker_id in 0..worker_count {
                let queue_rx = queue_rx.clone();
                let event_tx = event_tx.clone();
                let cancel = self.cancel.clone();
                let job = &job;
                let handle = thread::Builder::new()
                    .name(format!("bloark-worker-{}", worker_id))
                    .spawn_scoped(s, move || worker_loop(worker_id, queue_rx, event_tx, cancel, job));
                match handle {
                    Ok(_) => spawned += 1,
                    Err(e) => log::warn!("Could not spawn worker {}: {}", worker_id, e),
                }
            }
            // Only workers hold senders now; the loop below ends when they all exit.
            drop(event_tx);

            if spawned == 0 {
                return Err(BloarkError::Pool("no worker thread could be started".into()));
            }
            log::debug!("Worker pool running {} units on {} workers", total, spawned);

            let mut done = 0;
            for event in event_rx.iter() {
                match event {
                    PoolEvent::Started(idx) => progress.on_unit_started(&display(&units[idx])),
                    PoolEvent::Finished(idx, result) => {
                        done += 1;
                        let name = display(&units[idx]);
                        match &result {
                            Ok(_) => progress.on_unit_completed(&name, done, total),
                            Err(e) => progress.on_unit_failed(&name, &e.to_string(), done, total),
                        }
                        results[idx] = Some(result);
                    }
                }
            }
            Ok(())
        })?;

        let outcomes: Vec<UnitOutcome<T>> = units
            .iter()
            .zip(results)
            .map(|(unit, result)| match result {
                Some(Ok(value)) => UnitOutcome::Succeeded {
                    unit: unit.clone(),
                    value,
                },
                Some(Err(error)) => UnitOutcome::Failed {
                    unit: unit.clone(),
                    error,
                },
                None => UnitOutcome::NotRun { unit: unit.clone() },
            })
            .collect();

        let not_run = outcomes
            .iter()
            .filter(|o| matches!(o, UnitOutcome::NotRun { .. }))
            .count();
        if not_run > 0 {
            log::warn!("Run cancelled, {} units were not started", not_run);
        }
        Ok(outcomes)
    }
}

fn worker_loop<T, F>(
    worker_id: usize,
    queue: channel::Receiver<(usize, &Path)>,
    events: channel::Sender<PoolEvent<T>>,
    cancel: CancelHandle,
    job: &F,
) where
    F: Fn(usize, &Path) -> Result<T, BloarkError>,
{
    log::trace!("Worker {} started", worker_id);
    while !cancel.is_cancelled() {
        let (idx, unit) = match queue.recv() {
            Ok(next) => next,
            Err(_) => break,
        };
        let _ = events.send(PoolEvent::Started(idx));

        let result = match panic::catch_unwind(AssertUnwindSafe(|| job(idx, unit))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                log::error!("Worker {} crashed on {}: {}", worker_id, unit.display(), reason);
                Err(BloarkError::WorkerFailure(format!("{}: {}", unit.display(), reason)))
            }
        };
        if events.send(PoolEvent::Finished(idx, result)).is_err() {
            break;
        }
    }
    log::trace!("Worker {} exiting", worker_id);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn display(unit: &Path) -> String {
    unit.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| unit.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogProgressSink, ProgressEvent, RecordingProgressSink};
    use std::sync::atomic::AtomicUsize;

    fn units(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("unit-{i:02}"))).collect()
    }

    #[test]
    fn test_every_unit_runs_exactly_once_despite_a_crash() {
        let pool = WorkerPool::new(3).unwrap();
        let units = units(10);
        let runs: Vec<AtomicUsize> = (0..10).map(|_| AtomicUsize::new(0)).collect();

        let outcomes = pool
            .run(&units, &LogProgressSink, |idx, _| {
                runs[idx].fetch_add(1, Ordering::SeqCst);
                if idx == 4 {
                    panic!("simulated worker crash");
                }
                Ok(idx * 2)
            })
            .unwrap();

        assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));
        assert_eq!(outcomes.len(), 10);
        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 9);
        match &outcomes[4] {
            UnitOutcome::Failed { unit, error } => {
                assert_eq!(unit, &PathBuf::from("unit-04"));
                assert!(matches!(error, BloarkError::WorkerFailure(m) if m.contains("simulated")));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        match &outcomes[9] {
            UnitOutcome::Succeeded { value, .. } => assert_eq!(*value, 18),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_unit_errors_are_reported_to_progress_sink() {
        let pool = WorkerPool::new(2).unwrap();
        let sink = RecordingProgressSink::new();
        let outcomes = pool
            .run(&units(3), &sink, |idx, _| {
                if idx == 1 {
                    Err(BloarkError::corrupt("unit-01", "no trailer"))
                } else {
                    Ok(())
                }
            })
            .unwrap();

        assert!(matches!(
            outcomes[1],
            UnitOutcome::Failed {
                error: BloarkError::CorruptWarehouse { .. },
                ..
            }
        ));
        let events = sink.events();
        let started = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Started(_)))
            .count();
        let failed: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Failed { unit, total, .. } => Some((unit.clone(), *total)),
                _ => None,
            })
            .collect();
        assert_eq!(started, 3);
        assert_eq!(failed, vec![("unit-01".to_string(), 3)]);
    }

    #[test]
    fn test_cancel_stops_dispatch_of_remaining_units() {
        let pool = WorkerPool::new(1).unwrap();
        let cancel = pool.cancel_handle();
        let outcomes = pool
            .run(&units(5), &LogProgressSink, |idx, _| {
                if idx == 1 {
                    cancel.cancel();
                }
                Ok(())
            })
            .unwrap();

        assert!(outcomes[0].is_success());
        assert!(outcomes[1].is_success());
        for outcome in &outcomes[2..] {
            assert!(matches!(outcome, UnitOutcome::NotRun { .. }));
        }
    }

    #[test]
    fn test_cancelled_pool_runs_again_afterwards() {
        let pool = WorkerPool::new(2).unwrap();
        let cancel = pool.cancel_handle();
        let first = pool
            .run(&units(3), &LogProgressSink, |_, _| {
                cancel.cancel();
                Ok(())
            })
            .unwrap();
        assert!(first.iter().any(|o| matches!(o, UnitOutcome::NotRun { .. })));
        assert!(cancel.is_cancelled());

        let second = pool.run(&units(3), &LogProgressSink, |_, _| Ok(())).unwrap();
        assert!(second.iter().all(UnitOutcome::is_success));
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_zero_workers_is_fatal() {
        let err = WorkerPool::new(0).unwrap_err();
        assert_eq!(err.scope(), crate::error::ErrorScope::Fatal);
    }

    #[test]
    fn test_empty_queue_finishes_immediately() {
        let pool = WorkerPool::new(4).unwrap();
        let outcomes: Vec<UnitOutcome<()>> =
            pool.run(&[], &LogProgressSink, |_, _| Ok(())).unwrap();
        assert!(outcomes.is_empty());
    }
}
