//! Task record (§3 "Task") and the small enums that parametrize it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Periodic,
    Scheduled,
    OneShot,
    Monitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    // Ordered low-to-high so `Ord` sorts "most urgent first" when reversed;
    // `upcoming()` sorts by (priority, seconds-until) using this ordering.
    Background,
    Low,
    Medium,
    High,
    Critical,
}

/// Ordinal tempo gate (§4.1 "min_tempo"): FOCUSED is the least receptive to
/// interruption, DEEP the most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tempo {
    Focused,
    Alert,
    Reflective,
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeOfDayGate {
    Any,
    Night,
}

/// How a task body is located: the orchestrator dispatches by name into an
/// internal registry of async closures rather than holding function
/// pointers directly, so a `Task` just carries the dispatch key plus an
/// optional prompt/tool-allowlist for prompt-driven tasks (§3 "Execution").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Body {
    /// Dispatch key into the scheduler's internal task-body registry.
    Internal { handler: String },
    /// A prompt run through the agent engine with a restricted tool set.
    Prompt {
        prompt: String,
        tool_allowlist: Vec<String>,
    },
}

/// Exactly one of {interval, schedule, delay} is set, matching the kind
/// (§3 invariant "exactly one of {interval, schedule, delay}").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Timing {
    IntervalSeconds(u64),
    ScheduleExpr(String),
    DelaySeconds(u64),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    pub last_run: Option<i64>,
    pub next_run: Option<i64>,
    pub run_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<u64>,
    pub currently_running: bool,
    pub consecutive_failures: u32,
}

/// A registered background task (§3 "Task").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub kind: TaskKind,
    pub timing: Timing,
    pub body: Body,
    pub enabled: bool,
    pub priority: Priority,
    pub idle_only: bool,
    pub min_tempo: Option<Tempo>,
    pub time_of_day: TimeOfDayGate,
    pub dependencies: Vec<String>,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub description: String,

    /// Advisory runtime estimate carried over from the original `Task`
    /// dataclass; consulted only by `upcoming()`'s sort (shorter jobs
    /// surface first among otherwise-tied tasks), never by gating.
    #[serde(default)]
    pub estimated_duration: Option<Duration>,

    #[serde(default)]
    pub metrics: RuntimeMetrics,
}

impl Task {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}
