// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job record and state machine.
//!
//! A [`Job`] is one unit of background fetch work. Its lifecycle is
//! `waiting → active → (completed | failed)`, with `delayed` as the
//! parking state while a retry backs off. A failed attempt below the
//! attempt cap re-enters the queue through `delayed`; only exhausting
//! the cap (or a non-retryable error) lands in terminal `failed`.
//!
//! Transitions are methods that reject illegal moves with [`JobError`],
//! so the state machine is testable without any backend behind it.

use crate::clock::Clock;
use crate::heartbeat::WorkerId;
use crate::identity::{compute_identity, Identity};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a job instance.
    ///
    /// Distinct from the job's [`Identity`]: the identity names the
    /// logical work (and deduplicates it), the ID names this attempt
    /// at it.
    pub struct JobId("job-");
}

/// Admission priority for a job.
///
/// `High` is manual/user-triggered work and preempts scheduled work:
/// it bypasses dedup and rate limiting at admission and is claimed
/// ahead of `Normal` work in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    High,
    Normal,
}

impl JobPriority {
    /// Numeric rank used for queue ordering. Lower runs sooner.
    pub fn rank(self) -> u8 {
        match self {
            JobPriority::High => 0,
            JobPriority::Normal => 1,
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

crate::simple_display! {
    JobPriority {
        High => "high",
        Normal => "normal",
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued, claimable by any worker.
    Waiting,
    /// Claimed by a worker, fetch in progress.
    Active,
    /// Parked until `not_before_ms` while a retry backs off.
    Delayed,
    /// Terminal success.
    Completed,
    /// Terminal failure (attempt cap exhausted or non-retryable).
    Failed,
}

impl JobState {
    /// True for terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// True while the job still occupies its identity: queued, running,
    /// or backing off. Enqueues for the same identity are duplicates
    /// for as long as this holds.
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobState::Waiting | JobState::Active | JobState::Delayed)
    }
}

crate::simple_display! {
    JobState {
        Waiting => "waiting",
        Active => "active",
        Delayed => "delayed",
        Completed => "completed",
        Failed => "failed",
    }
}

/// How conversions are attributed when the upstream aggregates them.
///
/// Changes the numbers a report returns for the same entity and window,
/// so it participates in the job identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMode {
    /// Attribute conversions to the date of the originating click.
    ClickDate,
    /// Attribute conversions to the date they occurred.
    ConversionDate,
}

impl Default for ConversionMode {
    fn default() -> Self {
        ConversionMode::ClickDate
    }
}

crate::simple_display! {
    ConversionMode {
        ClickDate => "click-date",
        ConversionDate => "conversion-date",
    }
}

/// Comparison operator of a [`FilterPredicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

crate::simple_display! {
    FilterOp {
        Eq => "eq",
        Neq => "neq",
        Gt => "gt",
        Gte => "gte",
        Lt => "lt",
        Lte => "lte",
        Contains => "contains",
    }
}

/// One filter applied to the upstream report query.
///
/// Ordered by (field, op, value) so a filter set can be sorted into a
/// canonical form regardless of the order the caller supplied it in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

impl FilterPredicate {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

/// Inclusive date window of a fetch, as `YYYY-MM-DD` day strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start_day: String,
    pub end_day: String,
}

impl DateWindow {
    pub fn new(start_day: impl Into<String>, end_day: impl Into<String>) -> Self {
        Self {
            start_day: start_day.into(),
            end_day: end_day.into(),
        }
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start_day, self.end_day)
    }
}

/// Parameters of one background fetch.
///
/// `provider`/`owner`/`entity`/`window` say *what* to fetch; the
/// remaining fields are result-shape modifiers: they change the data a
/// semantically "same" fetch returns, so every one of them feeds the
/// job identity. Adding a field here without routing it through
/// [`compute_identity`] would make distinct requests collide in the
/// dedup layer and in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Upstream dependency that serves this fetch (circuit-breaker scope).
    pub provider: String,
    /// Upstream account the fetch bills against (rate-limit scope).
    pub owner: String,
    /// Target entity within the account (campaign, site, keyword group).
    pub entity: String,
    pub window: DateWindow,
    /// Requested report columns. Order-insensitive.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Filter predicates. Order-insensitive.
    #[serde(default)]
    pub filters: Vec<FilterPredicate>,
    #[serde(default)]
    pub conversion_mode: ConversionMode,
    /// Include the still-accumulating current period in the result.
    #[serde(default)]
    pub include_partial: bool,
    /// Caller timezone the upstream buckets days by.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl JobPayload {
    pub fn new(
        provider: impl Into<String>,
        owner: impl Into<String>,
        entity: impl Into<String>,
        window: DateWindow,
    ) -> Self {
        Self {
            provider: provider.into(),
            owner: owner.into(),
            entity: entity.into(),
            window,
            columns: Vec::new(),
            filters: Vec::new(),
            conversion_mode: ConversionMode::default(),
            include_partial: false,
            timezone: default_timezone(),
        }
    }

    crate::setters! {
        into {
            timezone: String,
        }
        set {
            columns: Vec<String>,
            filters: Vec<FilterPredicate>,
            conversion_mode: ConversionMode,
            include_partial: bool,
        }
    }
}

/// Error from an illegal job state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },
}

/// A unit of background fetch work, as persisted in the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Deterministic dedup key derived from the payload.
    pub identity: Identity,
    pub payload: JobPayload,
    pub priority: JobPriority,
    pub state: JobState,
    /// Executions started (claims), including the one in progress.
    pub attempts: u32,
    pub enqueued_at_ms: u64,
    /// Earliest claimable time while `delayed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Job {
    /// Create a new waiting job. The identity is computed from the
    /// payload here, once, and never changes afterwards.
    pub fn new(payload: JobPayload, priority: JobPriority, clock: &impl Clock) -> Self {
        Self::new_with_epoch_ms(payload, priority, clock.epoch_ms())
    }

    /// Create a new waiting job with an explicit enqueue timestamp.
    pub fn new_with_epoch_ms(payload: JobPayload, priority: JobPriority, epoch_ms: u64) -> Self {
        let identity = compute_identity(&payload);
        Self {
            id: JobId::new(),
            identity,
            payload,
            priority,
            state: JobState::Waiting,
            attempts: 0,
            enqueued_at_ms: epoch_ms,
            not_before_ms: None,
            claimed_at_ms: None,
            claimed_by: None,
            finished_at_ms: None,
            last_error: None,
        }
    }

    /// Waiting → Active. Counts the attempt and records the claim.
    pub fn claim(&mut self, worker: WorkerId, now_ms: u64) -> Result<(), JobError> {
        self.guard(JobState::Waiting, JobState::Active)?;
        self.state = JobState::Active;
        self.attempts += 1;
        self.claimed_at_ms = Some(now_ms);
        self.claimed_by = Some(worker);
        Ok(())
    }

    /// Active → Completed.
    pub fn complete(&mut self, now_ms: u64) -> Result<(), JobError> {
        self.guard(JobState::Active, JobState::Completed)?;
        self.state = JobState::Completed;
        self.finished_at_ms = Some(now_ms);
        Ok(())
    }

    /// Active → Failed (terminal).
    pub fn fail(&mut self, error: impl Into<String>, now_ms: u64) -> Result<(), JobError> {
        self.guard(JobState::Active, JobState::Failed)?;
        self.state = JobState::Failed;
        self.last_error = Some(error.into());
        self.finished_at_ms = Some(now_ms);
        Ok(())
    }

    /// Active → Delayed, parking the retry until `not_before_ms`.
    pub fn delay(&mut self, error: impl Into<String>, not_before_ms: u64) -> Result<(), JobError> {
        self.guard(JobState::Active, JobState::Delayed)?;
        self.state = JobState::Delayed;
        self.last_error = Some(error.into());
        self.not_before_ms = Some(not_before_ms);
        self.claimed_at_ms = None;
        self.claimed_by = None;
        Ok(())
    }

    /// Delayed → Waiting, once the backoff is due.
    pub fn promote(&mut self) -> Result<(), JobError> {
        self.guard(JobState::Delayed, JobState::Waiting)?;
        self.state = JobState::Waiting;
        self.not_before_ms = None;
        Ok(())
    }

    /// Active → Delayed with the attempt handed back, for work
    /// interrupted before the upstream was ever called (open circuit).
    /// The retry cap meters real upstream attempts only.
    pub fn defer(&mut self, error: impl Into<String>, not_before_ms: u64) -> Result<(), JobError> {
        self.delay(error, not_before_ms)?;
        self.attempts = self.attempts.saturating_sub(1);
        Ok(())
    }

    /// Active → Waiting, reclaiming a job from a stalled or dead worker.
    /// The attempt stays counted, so a job that stalls every time still
    /// reaches terminal `failed` at the attempt cap.
    pub fn release(&mut self, error: impl Into<String>) -> Result<(), JobError> {
        self.guard(JobState::Active, JobState::Waiting)?;
        self.state = JobState::Waiting;
        self.last_error = Some(error.into());
        self.claimed_at_ms = None;
        self.claimed_by = None;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.is_in_flight()
    }

    fn guard(&self, from: JobState, to: JobState) -> Result<(), JobError> {
        if self.state != from {
            return Err(JobError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        Ok(())
    }
}

crate::builder! {
    pub struct JobPayloadBuilder => JobPayload {
        into {
            provider: String = "ads",
            owner: String = "acct-1",
            entity: String = "campaign-1",
            timezone: String = "UTC",
        }
        set {
            window: DateWindow = DateWindow::new("2025-01-01", "2025-01-31"),
            columns: Vec<String> = Vec::new(),
            filters: Vec<FilterPredicate> = Vec::new(),
            conversion_mode: ConversionMode = ConversionMode::ClickDate,
            include_partial: bool = false,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
