//! The Background Task Scheduler (§4.1): priority-aware run loops for
//! periodic, scheduled, one-shot, and monitor tasks, with retry, jitter,
//! idle/tempo/time-of-day gating, a global circuit breaker, advisory
//! dependency tracking, and hot-reload of task definitions.

pub mod jitter;
pub mod schedule;
pub mod task;

pub use task::*;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::error::TaskError;
use crate::state_store::{SqliteStateStore, TaskDefRow};

/// Emits operator-facing notifications. The production default just logs
/// (§9 "NotificationSink trait with tracing-backed default"); a real
/// deployment can swap in a push/email sink behind the same trait.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, priority: Priority, message: &str);
}

pub struct TracingNotificationSink;

#[async_trait::async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, priority: Priority, message: &str) {
        match priority {
            Priority::Critical => tracing::error!(message, "critical notification"),
            Priority::High => tracing::warn!(message, "high-priority notification"),
            _ => tracing::info!(message, "notification"),
        }
    }
}

/// Reports whether the user is currently idle, gating `idle_only` tasks.
pub trait IdleChecker: Send + Sync {
    fn is_idle(&self) -> bool;
}

/// Always-idle default: a headless deployment has no interactive user to
/// wait on, so idle-gated tasks should simply run.
pub struct AlwaysIdle;

impl IdleChecker for AlwaysIdle {
    fn is_idle(&self) -> bool {
        true
    }
}

/// Supplies the current cognitive tempo (§3 "Nexus Layer State" adjacent
/// concept used purely as a scheduling gate here).
pub trait TempoProvider: Send + Sync {
    fn current_tempo(&self) -> Tempo;
}

pub struct FixedTempo(pub Tempo);

impl TempoProvider for FixedTempo {
    fn current_tempo(&self) -> Tempo {
        self.0
    }
}

/// A task body: an async closure producing `Result<(), TaskError>`, looked
/// up by name out of the scheduler's internal registry rather than stored
/// as a raw function pointer on `Task` (§3 "declarative description").
pub type TaskBody = Arc<dyn Fn() -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// A read-only snapshot of one task's registration and counters, returned by
/// `status()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub kind: TaskKind,
    pub priority: Priority,
    pub enabled: bool,
    pub dependencies: Vec<String>,
    pub estimated_duration: Option<Duration>,
    pub metrics: RuntimeMetrics,
}

struct GlobalBreaker {
    error_ring: Mutex<VecDeque<Instant>>,
    tripped: AtomicBool,
    reset_time: Mutex<Option<Instant>>,
}

impl GlobalBreaker {
    fn new() -> Self {
        Self {
            error_ring: Mutex::new(VecDeque::new()),
            tripped: AtomicBool::new(false),
            reset_time: Mutex::new(None),
        }
    }

    /// §4.1 "Global circuit breaker": ring of error timestamps over a
    /// 5-minute window; trips once more than 10 errors fall in that window.
    async fn record_failure(&self, sink: &dyn NotificationSink) {
        let now = Instant::now();
        let mut ring = self.error_ring.lock().await;
        ring.push_back(now);
        while ring
            .front()
            .map(|t| now.duration_since(*t) > Duration::from_secs(300))
            .unwrap_or(false)
        {
            ring.pop_front();
        }
        if ring.len() > 10 && !self.tripped.load(Ordering::SeqCst) {
            self.tripped.store(true, Ordering::SeqCst);
            *self.reset_time.lock().await = Some(now + Duration::from_secs(600));
            sink.notify(
                Priority::Critical,
                "global circuit breaker tripped: more than 10 task failures in 5 minutes",
            )
            .await;
        }
    }

    /// Returns true if execution should be silently skipped.
    async fn should_skip(&self) -> bool {
        if !self.tripped.load(Ordering::SeqCst) {
            return false;
        }
        let reset_at = *self.reset_time.lock().await;
        match reset_at {
            Some(t) if Instant::now() >= t => {
                self.tripped.store(false, Ordering::SeqCst);
                *self.reset_time.lock().await = None;
                false
            }
            _ => true,
        }
    }
}

/// The scheduler itself. Holds task registrations, their live run-loop
/// handles, the shared gates (idle/tempo), the global breaker, and the
/// internal task-body registry.
pub struct Scheduler {
    tasks: Arc<DashMap<String, Task>>,
    handles: DashMap<String, JoinHandle<()>>,
    trigger_notify: DashMap<String, Arc<Notify>>,
    bodies: Arc<RwLock<std::collections::HashMap<String, TaskBody>>>,
    breaker: Arc<GlobalBreaker>,
    idle: Arc<dyn IdleChecker>,
    tempo: Arc<dyn TempoProvider>,
    sink: Arc<dyn NotificationSink>,
    night_start: chrono::NaiveTime,
    night_end: chrono::NaiveTime,
    store: Option<Arc<SqliteStateStore>>,
}

impl Scheduler {
    pub fn new(
        idle: Arc<dyn IdleChecker>,
        tempo: Arc<dyn TempoProvider>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            handles: DashMap::new(),
            trigger_notify: DashMap::new(),
            bodies: Arc::new(RwLock::new(std::collections::HashMap::new())),
            breaker: Arc::new(GlobalBreaker::new()),
            idle,
            tempo,
            sink,
            night_start: chrono::NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
            night_end: chrono::NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            store: None,
        }
    }

    pub fn with_state_store(mut self, store: Arc<SqliteStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registers a named body handler for `Body::Internal { handler }`
    /// dispatch.
    pub async fn register_body(&self, handler: impl Into<String>, body: TaskBody) {
        self.bodies.write().await.insert(handler.into(), body);
    }

    /// Idempotent by name (§4.1): a second registration overwrites. If the
    /// scheduler is already running (has at least one live loop) and this
    /// task is enabled, its run loop starts immediately.
    pub fn register(self: &Arc<Self>, task: Task) {
        let name = task.name.clone();
        let enabled = task.enabled;
        self.tasks.insert(name.clone(), task);
        self.trigger_notify
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Notify::new()));
        if enabled {
            self.start_loop(&name);
        }
    }

    fn start_loop(self: &Arc<Self>, name: &str) {
        if self.handles.contains_key(name) {
            return;
        }
        let scheduler = Arc::clone(self);
        let owned_name = name.to_string();
        let handle = tokio::spawn(async move {
            scheduler.run_loop(owned_name).await;
        });
        self.handles.insert(name.to_string(), handle);
    }

    /// Cancels the run loop cooperatively and removes the registration.
    pub fn unregister(&self, name: &str) {
        self.tasks.remove(name);
        if let Some((_, handle)) = self.handles.remove(name) {
            handle.abort();
        }
        self.trigger_notify.remove(name);
    }

    pub fn enable(self: &Arc<Self>, name: &str) {
        if let Some(mut t) = self.tasks.get_mut(name) {
            t.enabled = true;
            drop(t);
            self.start_loop(name);
        }
    }

    pub fn disable(&self, name: &str) {
        if let Some(mut t) = self.tasks.get_mut(name) {
            t.enabled = false;
        }
    }

    /// Enqueues an immediate one-shot execution; fails if already running.
    pub fn trigger(&self, name: &str) -> Result<(), TaskError> {
        let task = self
            .tasks
            .get(name)
            .ok_or_else(|| TaskError::Body(format!("unknown task {name}")))?;
        if task.metrics.currently_running {
            return Err(TaskError::Transient(format!("{name} is already running")));
        }
        drop(task);
        if let Some(notify) = self.trigger_notify.get(name) {
            notify.notify_one();
        }
        Ok(())
    }

    pub fn status(&self) -> Vec<TaskStatus> {
        self.tasks
            .iter()
            .map(|entry| {
                let t = entry.value();
                TaskStatus {
                    name: t.name.clone(),
                    kind: t.kind,
                    priority: t.priority,
                    enabled: t.enabled,
                    dependencies: t.dependencies.clone(),
                    estimated_duration: t.estimated_duration,
                    metrics: t.metrics.clone(),
                }
            })
            .collect()
    }

    /// Tasks whose `next_run` falls within `window_seconds`, sorted by
    /// (priority desc, seconds-until asc).
    pub fn upcoming(&self, window_seconds: i64) -> Vec<TaskStatus> {
        let now = model_now();
        let mut items: Vec<TaskStatus> = self
            .status()
            .into_iter()
            .filter(|s| s.enabled)
            .filter(|s| {
                s.metrics
                    .next_run
                    .map(|nr| nr - now <= window_seconds)
                    .unwrap_or(false)
            })
            .collect();
        items.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| {
                let sa = a.metrics.next_run.unwrap_or(i64::MAX);
                let sb = b.metrics.next_run.unwrap_or(i64::MAX);
                sa.cmp(&sb)
            }).then_with(|| {
                let da = a.estimated_duration.unwrap_or(Duration::MAX);
                let db = b.estimated_duration.unwrap_or(Duration::MAX);
                da.cmp(&db)
            })
        });
        items
    }

    /// §4.1 "Hot reload": rescans task-definition rows and (re)registers any
    /// whose content changed. Deletions on disk never unregister (editor
    /// races); disabling requires an explicit `enabled=false` in the row or a
    /// direct `disable()` call.
    pub async fn hot_reload(self: &Arc<Self>, rows: Vec<TaskDefRow>) {
        for row in rows {
            let changed = self
                .tasks
                .get(&row.name)
                .map(|t| task_def_row_of(&t) != row)
                .unwrap_or(true);
            if !changed {
                continue;
            }
            match task_from_row(row) {
                Ok(task) => self.register(task),
                Err(e) => tracing::warn!(error = %e, "hot-reload: skipping malformed task definition"),
            }
        }
    }

    async fn run_loop(self: Arc<Self>, name: String) {
        let trigger = self
            .trigger_notify
            .get(&name)
            .map(|n| Arc::clone(n.value()));
        loop {
            let (kind, enabled) = match self.tasks.get(&name) {
                Some(t) => (t.kind, t.enabled),
                None => return,
            };
            if !enabled {
                return;
            }

            let sleep_secs = self.next_sleep_seconds(&name, kind);
            if let Some(trig) = &trigger {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => {}
                    _ = trig.notified() => {}
                }
            } else {
                tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
            }

            if !self.tasks.get(&name).map(|t| t.enabled).unwrap_or(false) {
                return;
            }

            self.execute_once(&name).await;

            if matches!(kind, TaskKind::OneShot) {
                self.disable(&name);
                return;
            }
        }
    }

    fn next_sleep_seconds(&self, name: &str, kind: TaskKind) -> u64 {
        let task = match self.tasks.get(name) {
            Some(t) => t,
            None => return 3600,
        };
        // A pending jittered retry (scheduled by `on_failure`) takes
        // priority over the task's normal cadence until it's in the past.
        if let Some(next_run) = task.metrics.next_run {
            let wait = next_run - model_now();
            if wait > 0 {
                return wait as u64;
            }
        }
        match (&task.timing, kind) {
            (Timing::IntervalSeconds(s), _) => *s,
            (Timing::ScheduleExpr(expr), _) => schedule::seconds_until_next(expr).max(0) as u64,
            (Timing::DelaySeconds(s), _) => *s,
        }
    }

    /// The gating sequence + execution of §4.1 "Gating sequence inside run
    /// body".
    async fn execute_once(self: &Arc<Self>, name: &str) {
        if self.breaker.should_skip().await {
            return;
        }

        let (priority, idle_only, min_tempo, time_of_day, dependencies, handler_name) = {
            let task = match self.tasks.get(name) {
                Some(t) => t,
                None => return,
            };
            (
                task.priority,
                task.idle_only,
                task.min_tempo,
                task.time_of_day,
                task.dependencies.clone(),
                dispatch_key(&task.body),
            )
        };

        for dep in &dependencies {
            if let Some(dep_task) = self.tasks.get(dep) {
                if dep_task.metrics.error_count > 0 {
                    tracing::info!(task = name, dependency = dep, "dependency unhealthy, proceeding (advisory only)");
                }
            }
        }

        if idle_only && !self.idle.is_idle() && priority != Priority::Background {
            return;
        }
        if idle_only && priority == Priority::Background {
            return;
        }
        if let Some(required) = min_tempo {
            if self.tempo.current_tempo() < required {
                return;
            }
        }
        if matches!(time_of_day, TimeOfDayGate::Night) {
            let now = chrono::Local::now().time();
            if !schedule::in_night_window(now, self.night_start, self.night_end) {
                return;
            }
        }

        let body = self.bodies.read().await.get(&handler_name).cloned();
        let body = match body {
            Some(b) => b,
            None => {
                tracing::error!(task = name, handler = handler_name, "no registered body for task");
                return;
            }
        };

        let start = Instant::now();
        self.set_running(name, true);
        let result = body().await;
        let duration_ms = start.elapsed().as_millis() as u64;
        self.set_running(name, false);

        match result {
            Ok(()) => self.on_success(name, duration_ms),
            Err(e) => self.on_failure(name, duration_ms, e).await,
        }
    }

    fn set_running(&self, name: &str, running: bool) {
        if let Some(mut t) = self.tasks.get_mut(name) {
            t.metrics.currently_running = running;
        }
    }

    fn on_success(&self, name: &str, duration_ms: u64) {
        if let Some(mut t) = self.tasks.get_mut(name) {
            t.metrics.run_count += 1;
            t.metrics.last_duration_ms = Some(duration_ms);
            t.metrics.last_run = Some(model_now());
            t.metrics.consecutive_failures = 0;
            t.metrics.next_run = None;
        }
    }

    /// Schedules a jittered retry, or disables the task past `max_retries`.
    /// `critical` priority instead notifies on every failure and never
    /// retries or disables; `background` priority never gets a scheduled
    /// retry or exceeded-retries disablement at all, and just resumes on
    /// its normal cadence next tick.
    async fn on_failure(&self, name: &str, duration_ms: u64, err: TaskError) {
        self.breaker.record_failure(self.sink.as_ref()).await;

        let (priority, consecutive_failures, max_retries, retry_delay) = {
            let mut t = match self.tasks.get_mut(name) {
                Some(t) => t,
                None => return,
            };
            t.metrics.error_count += 1;
            t.metrics.last_duration_ms = Some(duration_ms);
            t.metrics.last_error = Some(err.to_string());
            t.metrics.consecutive_failures += 1;
            (
                t.priority,
                t.metrics.consecutive_failures,
                t.max_retries,
                t.retry_delay(),
            )
        };

        if priority == Priority::Critical {
            self.sink
                .notify(
                    Priority::Critical,
                    &format!("task {name} failed: {err}"),
                )
                .await;
            return;
        }

        if priority != Priority::Background && consecutive_failures <= max_retries {
            let mult = jitter::jitter_multiplier(name, consecutive_failures);
            let delay = Duration::from_secs_f64(retry_delay.as_secs_f64() * mult);
            if let Some(mut t) = self.tasks.get_mut(name) {
                t.metrics.next_run = Some(model_now() + delay.as_secs() as i64);
            }
        } else if priority != Priority::Background {
            self.disable(name);
            self.sink
                .notify(
                    Priority::High,
                    &format!("task {name} exceeded max_retries and was disabled: {err}"),
                )
                .await;
        }
    }
}

fn model_now() -> i64 {
    crate::state_store::model::now_unix()
}

fn dispatch_key(body: &Body) -> String {
    match body {
        Body::Internal { handler } => handler.clone(),
        Body::Prompt { .. } => "agent_prompt".to_string(),
    }
}

fn task_def_row_of(task: &Task) -> TaskDefRow {
    TaskDefRow {
        name: task.name.clone(),
        kind: format!("{:?}", task.kind).to_lowercase(),
        enabled: task.enabled,
        schedule: match &task.timing {
            Timing::ScheduleExpr(e) => Some(e.clone()),
            _ => None,
        },
        idle_only: task.idle_only,
        priority: format!("{:?}", task.priority).to_lowercase(),
        description: task.description.clone(),
        prompt: match &task.body {
            Body::Prompt { prompt, .. } => Some(prompt.clone()),
            _ => None,
        },
        config: serde_json::to_value(task).unwrap_or(serde_json::json!({})),
    }
}

fn task_from_row(row: TaskDefRow) -> Result<Task, String> {
    serde_json::from_value(row.config).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn test_scheduler() -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            Arc::new(AlwaysIdle),
            Arc::new(FixedTempo(Tempo::Deep)),
            Arc::new(TracingNotificationSink),
        ))
    }

    fn base_task(name: &str) -> Task {
        Task {
            name: name.to_string(),
            kind: TaskKind::OneShot,
            timing: Timing::DelaySeconds(0),
            body: Body::Internal {
                handler: "noop".into(),
            },
            enabled: true,
            priority: Priority::Medium,
            idle_only: false,
            min_tempo: None,
            time_of_day: TimeOfDayGate::Any,
            dependencies: vec![],
            max_retries: 2,
            retry_delay_secs: 1,
            description: "test task".into(),
            estimated_duration: None,
            metrics: RuntimeMetrics::default(),
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_by_name() {
        let sched = test_scheduler();
        sched.register_body(
            "noop",
            Arc::new(|| Box::pin(async { Ok(()) }) as BoxFuture<'static, Result<(), TaskError>>),
        )
        .await;
        sched.register(base_task("t1"));
        sched.register(base_task("t1"));
        assert_eq!(sched.status().len(), 1);
    }

    #[tokio::test]
    async fn priority_never_auto_disables_on_repeated_failure() {
        let sched = test_scheduler();
        sched
            .register_body(
                "always_fail",
                Arc::new(|| {
                    Box::pin(async { Err(TaskError::Transient("boom".into())) })
                        as BoxFuture<'static, Result<(), TaskError>>
                }),
            )
            .await;
        let mut task = base_task("critical_task");
        task.priority = Priority::Critical;
        task.body = Body::Internal {
            handler: "always_fail".into(),
        };
        sched.tasks.insert(task.name.clone(), task);

        for _ in 0..5 {
            sched.execute_once("critical_task").await;
        }
        assert!(sched.tasks.get("critical_task").unwrap().enabled);
    }

    #[tokio::test]
    async fn non_critical_disables_after_exceeding_max_retries() {
        let sched = test_scheduler();
        sched
            .register_body(
                "always_fail",
                Arc::new(|| {
                    Box::pin(async { Err(TaskError::Transient("boom".into())) })
                        as BoxFuture<'static, Result<(), TaskError>>
                }),
            )
            .await;
        let mut task = base_task("flaky_task");
        task.max_retries = 1;
        task.body = Body::Internal {
            handler: "always_fail".into(),
        };
        sched.tasks.insert(task.name.clone(), task);

        for _ in 0..3 {
            sched.execute_once("flaky_task").await;
        }
        assert!(!sched.tasks.get("flaky_task").unwrap().enabled);
    }

    #[tokio::test]
    async fn failure_schedules_next_sleep_from_the_jittered_retry_delay() {
        let sched = test_scheduler();
        sched
            .register_body(
                "always_fail",
                Arc::new(|| {
                    Box::pin(async { Err(TaskError::Transient("boom".into())) })
                        as BoxFuture<'static, Result<(), TaskError>>
                }),
            )
            .await;
        let mut task = base_task("retry_task");
        task.timing = Timing::IntervalSeconds(3600);
        task.retry_delay_secs = 30;
        task.body = Body::Internal {
            handler: "always_fail".into(),
        };
        sched.tasks.insert(task.name.clone(), task);

        sched.execute_once("retry_task").await;
        let sleep = sched.next_sleep_seconds("retry_task", TaskKind::Periodic);
        // Jitter samples in [0.8, 1.2] of the 30s retry delay; well short of
        // the task's normal 3600s cadence either way.
        assert!(sleep > 0 && sleep <= 36, "expected a short retry sleep, got {sleep}");
    }

    #[tokio::test]
    async fn background_priority_never_schedules_a_retry() {
        let sched = test_scheduler();
        sched
            .register_body(
                "always_fail",
                Arc::new(|| {
                    Box::pin(async { Err(TaskError::Transient("boom".into())) })
                        as BoxFuture<'static, Result<(), TaskError>>
                }),
            )
            .await;
        let mut task = base_task("bg_retry_task");
        task.priority = Priority::Background;
        task.timing = Timing::IntervalSeconds(300);
        task.max_retries = 1;
        task.body = Body::Internal {
            handler: "always_fail".into(),
        };
        sched.tasks.insert(task.name.clone(), task);

        for _ in 0..3 {
            sched.execute_once("bg_retry_task").await;
        }
        let t = sched.tasks.get("bg_retry_task").unwrap();
        assert!(t.enabled, "background tasks are never auto-disabled either");
        assert!(t.metrics.next_run.is_none());
        assert_eq!(
            sched.next_sleep_seconds("bg_retry_task", TaskKind::Periodic),
            300
        );
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let sched = test_scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        sched
            .register_body(
                "flaky",
                Arc::new(move || {
                    let calls = Arc::clone(&calls2);
                    Box::pin(async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n == 0 {
                            Err(TaskError::Transient("first call fails".into()))
                        } else {
                            Ok(())
                        }
                    }) as BoxFuture<'static, Result<(), TaskError>>
                }),
            )
            .await;
        let mut task = base_task("flaky_then_ok");
        task.body = Body::Internal {
            handler: "flaky".into(),
        };
        sched.tasks.insert(task.name.clone(), task);

        sched.execute_once("flaky_then_ok").await;
        sched.execute_once("flaky_then_ok").await;
        let t = sched.tasks.get("flaky_then_ok").unwrap();
        assert_eq!(t.metrics.consecutive_failures, 0);
        assert_eq!(t.metrics.run_count, 1);
    }

    #[tokio::test]
    async fn idle_only_background_task_never_runs_even_when_idle() {
        let sched = test_scheduler();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        sched
            .register_body(
                "mark_ran",
                Arc::new(move || {
                    let ran = Arc::clone(&ran2);
                    Box::pin(async move {
                        ran.store(true, Ordering::SeqCst);
                        Ok(())
                    }) as BoxFuture<'static, Result<(), TaskError>>
                }),
            )
            .await;
        let mut task = base_task("bg_task");
        task.priority = Priority::Background;
        task.idle_only = true;
        task.body = Body::Internal {
            handler: "mark_ran".into(),
        };
        sched.tasks.insert(task.name.clone(), task);

        sched.execute_once("bg_task").await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
