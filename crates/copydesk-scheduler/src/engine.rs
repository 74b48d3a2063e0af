use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use copydesk_core::config::SchedulerConfig;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Result, SchedulerError};
use crate::executor::TaskRunner;
use crate::schedule::compute_next_fire;
use crate::store::TaskStore;
use crate::types::{FireOrigin, ScheduledTask, SchedulerEvent, SchedulerStatus};

type EventReceiver = mpsc::UnboundedReceiver<SchedulerEvent>;

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the next-fire timeline of every active task and dispatches firings
/// under a process-wide concurrency ceiling.
///
/// Cheap to clone; all clones drive the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    tasks: TaskStore,
    runner: Arc<dyn TaskRunner>,
    tz: FixedOffset,
    misfire_grace: chrono::Duration,
    tick: Duration,
    /// task id -> next UTC fire time. A random-interval task is absent while
    /// one of its firings is in flight.
    triggers: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Random-interval tasks fired from their trigger and owed a re-arm once
    /// the firing completes. `remove` and `stop` withdraw the debt.
    rearm_pending: Mutex<HashSet<String>>,
    permits: Arc<Semaphore>,
    in_flight: TaskTracker,
    running: AtomicBool,
    paused: AtomicBool,
    events_tx: mpsc::UnboundedSender<SchedulerEvent>,
    /// Parked here while the loop is not running.
    events_rx: Mutex<Option<EventReceiver>>,
    shutdown: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<EventReceiver>>>,
}

impl Scheduler {
    pub fn new(tasks: TaskStore, runner: Arc<dyn TaskRunner>, config: &SchedulerConfig) -> Result<Self> {
        let tz = config
            .timezone()
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                tasks,
                runner,
                tz,
                misfire_grace: chrono::Duration::seconds(config.misfire_grace_secs as i64),
                tick: Duration::from_millis(config.tick_millis.max(1)),
                triggers: Mutex::new(HashMap::new()),
                rearm_pending: Mutex::new(HashSet::new()),
                permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
                in_flight: TaskTracker::new(),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                shutdown,
                loop_handle: Mutex::new(None),
            }),
        })
    }

    /// Arm every active task and spawn the timer loop. A second call while
    /// running does nothing.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.in_flight.reopen();
        self.inner.shutdown.send_replace(false);

        let now = Utc::now();
        let mut armed = 0;
        for task in self.inner.tasks.list_active()? {
            match self.arm(&task, now) {
                Ok(_) => armed += 1,
                Err(e) => warn!(task_id = %task.id, error = %e, "could not arm task"),
            }
        }

        let Some(events) = guard(&self.inner.events_rx).take() else {
            return Ok(());
        };
        let handle = tokio::spawn(self.clone().run_loop(events, self.inner.shutdown.subscribe()));
        *guard(&self.inner.loop_handle) = Some(handle);
        info!(armed, "scheduler started");
        Ok(())
    }

    /// Drop every pending trigger, stop the timer loop and wait for firings
    /// already running. In-flight work is never aborted.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.shutdown.send_replace(true);
        guard(&self.inner.triggers).clear();
        guard(&self.inner.rearm_pending).clear();

        let handle = guard(&self.inner.loop_handle).take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(events) => *guard(&self.inner.events_rx) = Some(events),
                Err(e) => error!("scheduler loop panicked: {e}"),
            }
        }

        self.inner.in_flight.close();
        self.inner.in_flight.wait().await;
        info!("scheduler stopped");
    }

    async fn run_loop(self, mut events: EventReceiver, mut shutdown: watch::Receiver<bool>) -> EventReceiver {
        let mut interval = tokio::time::interval(self.inner.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_at(Utc::now()) {
                        error!("scheduler tick error: {e}");
                    }
                }
                Some(event) = events.recv() => {
                    if let Err(e) = self.handle_event(event) {
                        warn!(error = %e, "scheduler event not applied");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("scheduler loop shutting down");
                        break;
                    }
                }
            }
        }
        events
    }

    /// Compute and install the trigger for `task` from `now`, persisting
    /// `next_run_at`. Inactive tasks lose their trigger instead.
    fn arm(&self, task: &ScheduledTask, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if !task.is_active {
            guard(&self.inner.triggers).remove(&task.id);
            guard(&self.inner.rearm_pending).remove(&task.id);
            self.inner.tasks.set_next_run(&task.id, None)?;
            return Ok(None);
        }
        let local_now = now.with_timezone(&self.inner.tz);
        let next = compute_next_fire(&task.schedule, task.active_hours, &local_now, &mut rand::thread_rng())?;
        guard(&self.inner.triggers).insert(task.id.clone(), next);
        guard(&self.inner.rearm_pending).remove(&task.id);
        self.inner.tasks.set_next_run(&task.id, Some(&next))?;
        debug!(task_id = %task.id, next = %next, "trigger armed");
        Ok(Some(next))
    }

    /// Re-read one task and (re)install its trigger.
    ///
    /// If the new trigger cannot be computed the previous one stays in place
    /// and the error is returned.
    #[instrument(skip(self))]
    pub fn upsert(&self, task_id: &str) -> Result<Option<DateTime<Utc>>> {
        let task = self.inner.tasks.require(task_id)?;
        match self.arm(&task, Utc::now()) {
            Ok(next) => {
                info!(next = ?next, "task trigger updated");
                Ok(next)
            }
            Err(e) => {
                warn!(error = %e, "trigger not updated, keeping the previous one");
                Err(e)
            }
        }
    }

    /// Drop the trigger of one task, including the re-arm owed to a
    /// random-interval firing still in flight. No-op when it has neither.
    pub fn remove(&self, task_id: &str) {
        let had_trigger = guard(&self.inner.triggers).remove(task_id).is_some();
        let had_rearm = guard(&self.inner.rearm_pending).remove(task_id);
        if had_trigger || had_rearm {
            info!(task_id, "task trigger removed");
        }
    }

    /// Fire a task immediately. The regular trigger is left untouched.
    #[instrument(skip(self))]
    pub fn trigger_now(&self, task_id: &str) -> Result<()> {
        let task = self.inner.tasks.require(task_id)?;
        self.dispatch(task.id, FireOrigin::Manual);
        Ok(())
    }

    pub fn pause_all(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        info!("scheduler paused");
    }

    pub fn resume_all(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        info!("scheduler resumed");
    }

    pub fn status(&self) -> Result<SchedulerStatus> {
        Ok(SchedulerStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            paused: self.inner.paused.load(Ordering::SeqCst),
            active_task_count: self.inner.tasks.count_active()?,
            pending_fire_count: guard(&self.inner.triggers).len(),
        })
    }

    /// Next fire time currently installed for a task.
    pub fn next_fire(&self, task_id: &str) -> Option<DateTime<Utc>> {
        guard(&self.inner.triggers).get(task_id).copied()
    }

    /// Fire every trigger due at `now`; returns how many were dispatched.
    ///
    /// A trigger more than the misfire grace late is skipped and re-armed
    /// from `now`. Cron and fixed-interval tasks are re-armed as they fire;
    /// random-interval tasks wait for `SchedulerEvent::FiringCompleted`.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Result<usize> {
        if self.inner.paused.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let due: Vec<(String, DateTime<Utc>)> = {
            let mut triggers = guard(&self.inner.triggers);
            let ids: Vec<String> = triggers
                .iter()
                .filter(|(_, at)| **at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| triggers.remove(&id).map(|at| (id, at)))
                .collect()
        };

        let mut fired = 0;
        for (task_id, at) in due {
            let Some(task) = self.inner.tasks.get(&task_id)? else {
                debug!(task_id = %task_id, "trigger for a deleted task dropped");
                continue;
            };
            if now - at > self.inner.misfire_grace {
                warn!(task_id = %task_id, due = %at, "misfired trigger skipped");
                self.rearm_logged(&task, now);
                continue;
            }
            if task.schedule.is_random() {
                guard(&self.inner.rearm_pending).insert(task_id.clone());
            } else {
                self.rearm_logged(&task, now);
            }
            self.dispatch(task_id, FireOrigin::Scheduled);
            fired += 1;
        }
        Ok(fired)
    }

    fn rearm_logged(&self, task: &ScheduledTask, now: DateTime<Utc>) {
        if let Err(e) = self.arm(task, now) {
            error!(task_id = %task.id, error = %e, "could not re-arm task");
        }
    }

    /// Apply an event from a finished firing.
    pub fn handle_event(&self, event: SchedulerEvent) -> Result<()> {
        match event {
            SchedulerEvent::FiringCompleted {
                task_id,
                origin: FireOrigin::Scheduled,
            } => {
                if !guard(&self.inner.rearm_pending).remove(&task_id) {
                    debug!(task_id = %task_id, "no re-arm owed, trigger left as is");
                    return Ok(());
                }
                let Some(task) = self.inner.tasks.get(&task_id)? else {
                    return Ok(());
                };
                if task.schedule.is_random() {
                    self.arm(&task, Utc::now())?;
                }
                Ok(())
            }
            SchedulerEvent::FiringCompleted {
                origin: FireOrigin::Manual,
                ..
            } => Ok(()),
        }
    }

    /// Run one firing in the background, waiting for a permit first.
    fn dispatch(&self, task_id: String, origin: FireOrigin) {
        let runner = self.inner.runner.clone();
        let permits = self.inner.permits.clone();
        let events = self.inner.events_tx.clone();
        self.inner.in_flight.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match runner.run(&task_id, origin).await {
                Ok(report) if report.success => info!(task_id = %task_id, ?origin, "firing finished"),
                Ok(report) => warn!(task_id = %task_id, error = ?report.error, "firing finished with errors"),
                Err(e) => error!(task_id = %task_id, error = %e, "firing failed"),
            }
            let _ = events.send(SchedulerEvent::FiringCompleted { task_id, origin });
        });
    }
}
