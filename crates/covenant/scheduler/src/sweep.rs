use crate::sink::NotificationSink;
use chrono::{DateTime, NaiveDate, Utc};
use covenant_audit::AuditRecorder;
use covenant_risk::compute_risk;
use covenant_storage::{ClaimOutcome, CovenantStorage};
use covenant_types::{
    Assignment, AssignmentStatus, CoreError, CoreResult, EngineConfig, Notification,
    NotificationId, NotificationKind, NotificationState, Obligation, ObligationId, UserId,
};
use std::sync::Arc;

/// Deterministic key guaranteeing at-most-one notification per
/// (obligation, recipient, day, kind), across retries and concurrent
/// sweep instances.
pub fn idempotency_key(
    obligation_id: &ObligationId,
    recipient: &UserId,
    bucket_date: NaiveDate,
    kind: NotificationKind,
) -> String {
    let payload = serde_json::json!([obligation_id, recipient, bucket_date, kind.as_str()]);
    blake3::hash(payload.to_string().as_bytes())
        .to_hex()
        .to_string()
}

/// Plan the reminders one sweep at `now` should attempt.
///
/// Pure: no clock, no storage. The caller feeds it the incomplete
/// (obligation, assignment) pairs and decides what to do with the planned
/// notifications, which keeps timer mechanics out of the logic under test.
pub fn plan_reminders(
    now: DateTime<Utc>,
    pairs: &[(Obligation, Assignment)],
    lookahead_days: &[i64],
) -> Vec<Notification> {
    let today = now.date_naive();
    let mut planned = Vec::new();

    for (obligation, assignment) in pairs {
        if assignment.status == AssignmentStatus::Completed {
            continue;
        }
        let Some(due) = obligation.due_date else {
            continue;
        };

        let (kind, message) = if today > due {
            let days = (today - due).num_days();
            (
                NotificationKind::Overdue,
                format!(
                    "Obligation \"{}\" is overdue by {} day(s)",
                    obligation.description, days
                ),
            )
        } else {
            let days = (due - today).num_days();
            if !lookahead_days.contains(&days) {
                continue;
            }
            (
                NotificationKind::DueSoon,
                format!(
                    "Obligation \"{}\" is due in {} day(s)",
                    obligation.description, days
                ),
            )
        };

        planned.push(Notification {
            id: NotificationId::generate(),
            idempotency_key: idempotency_key(&obligation.id, &assignment.assignee, today, kind),
            obligation_id: obligation.id.clone(),
            recipient: assignment.assignee.clone(),
            kind,
            bucket_date: today,
            message,
            state: NotificationState::Claimed,
            created_at: now,
        });
    }
    planned
}

/// Drives reminder sweeps and edge-triggered risk alerts.
///
/// Idempotency keys are the only concurrency-safety mechanism here:
/// claims are atomic insert-if-absent in storage, so concurrent sweeps
/// from several instances cannot double-send.
#[derive(Clone)]
pub struct NotificationScheduler {
    storage: Arc<dyn CovenantStorage>,
    sink: Arc<dyn NotificationSink>,
    audit: AuditRecorder,
    config: EngineConfig,
}

/// Per-sweep counters, also recorded in the audit trail.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub reminders_sent: usize,
    pub risk_alerts_sent: usize,
    pub risk_recomputed: usize,
}

impl NotificationScheduler {
    pub fn new(
        storage: Arc<dyn CovenantStorage>,
        sink: Arc<dyn NotificationSink>,
        audit: AuditRecorder,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            sink,
            audit,
            config,
        }
    }

    /// Run one reminder sweep at `now`; returns how many notifications
    /// were sent.
    ///
    /// Also recomputes a risk snapshot for every open obligation, assigned
    /// or not, so the daily sweep keeps scores current even without
    /// mutations, and fires threshold alerts for any upward crossing that
    /// produces.
    pub async fn run_reminder_sweep(&self, now: DateTime<Utc>) -> CoreResult<SweepReport> {
        let pairs = self
            .storage
            .list_incomplete()
            .await
            .map_err(CoreError::from)?;

        let mut report = SweepReport::default();
        for notification in plan_reminders(now, &pairs, &self.config.reminder_lookahead_days) {
            if self.claim_and_send(notification).await? {
                report.reminders_sent += 1;
            }
        }

        // Reminders need an assignee, risk does not: the recompute walks
        // every obligation that is still open.
        let active = self
            .storage
            .list_active_obligations()
            .await
            .map_err(CoreError::from)?;
        for obligation in &active {
            let contract = self
                .storage
                .get_contract(&obligation.contract_id)
                .await
                .map_err(CoreError::from)?;
            let previous = self
                .storage
                .latest_risk(&obligation.id)
                .await
                .map_err(CoreError::from)?
                .map(|risk| risk.score)
                .unwrap_or(0.0);
            let risk = compute_risk(
                obligation,
                contract.and_then(|c| c.value_minor),
                false,
                now.date_naive(),
            );
            let new_score = risk.score;
            self.storage
                .append_risk(risk)
                .await
                .map_err(CoreError::from)?;
            report.risk_recomputed += 1;
            report.risk_alerts_sent += self
                .notify_on_risk_threshold_crossing(&obligation.id, previous, new_score)
                .await?;
        }

        self.audit
            .log(
                None,
                None,
                "sweep.run",
                "notification",
                None,
                serde_json::json!({
                    "reminders_sent": report.reminders_sent,
                    "risk_alerts_sent": report.risk_alerts_sent,
                    "risk_recomputed": report.risk_recomputed,
                }),
                None,
            )
            .await?;
        tracing::info!(
            reminders = report.reminders_sent,
            risk_alerts = report.risk_alerts_sent,
            "reminder sweep finished"
        );
        Ok(report)
    }

    /// Fire a risk alert to every assignee if the score crossed the
    /// threshold upward. Edge-triggered: nothing fires while the score
    /// stays above the threshold, so recomputation storms cannot spam.
    pub async fn notify_on_risk_threshold_crossing(
        &self,
        obligation_id: &ObligationId,
        previous_score: f64,
        new_score: f64,
    ) -> CoreResult<usize> {
        let threshold = self.config.risk_alert_threshold;
        if !(previous_score <= threshold && new_score > threshold) {
            return Ok(0);
        }

        let obligation = self
            .storage
            .get_obligation(obligation_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("obligation {obligation_id} not found")))?;
        let assignments = self
            .storage
            .list_assignments(obligation_id)
            .await
            .map_err(CoreError::from)?;
        if assignments.is_empty() {
            tracing::debug!(obligation = %obligation_id, "risk crossing with no assignee");
            return Ok(0);
        }

        let today = Utc::now().date_naive();
        let mut sent = 0;
        for assignment in assignments {
            let notification = Notification {
                id: NotificationId::generate(),
                idempotency_key: idempotency_key(
                    obligation_id,
                    &assignment.assignee,
                    today,
                    NotificationKind::RiskThreshold,
                ),
                obligation_id: obligation_id.clone(),
                recipient: assignment.assignee.clone(),
                kind: NotificationKind::RiskThreshold,
                bucket_date: today,
                message: format!(
                    "Penalty risk for obligation \"{}\" rose to {:.2}",
                    obligation.description, new_score
                ),
                state: NotificationState::Claimed,
                created_at: Utc::now(),
            };
            if self.claim_and_send(notification).await? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Claim the key, deliver, then confirm. A failed delivery leaves the
    /// claim unconfirmed and is retried by a later sweep. A key already
    /// claimed by an equally fresh concurrent sweep is left alone.
    async fn claim_and_send(&self, notification: Notification) -> CoreResult<bool> {
        let outcome = self
            .storage
            .claim_notification(notification.clone())
            .await
            .map_err(CoreError::from)?;
        match outcome {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadySent => return Ok(false),
            ClaimOutcome::AlreadyClaimed => {
                tracing::debug!(
                    recipient = %notification.recipient,
                    kind = notification.kind.as_str(),
                    "key claimed by a concurrent sweep; skipping"
                );
                return Ok(false);
            }
        }

        match self.sink.deliver(&notification).await {
            Ok(()) => {
                self.storage
                    .mark_sent(&notification.idempotency_key)
                    .await
                    .map_err(CoreError::from)?;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(
                    recipient = %notification.recipient,
                    kind = notification.kind.as_str(),
                    error = %err,
                    "notification delivery failed; will retry next sweep"
                );
                Ok(false)
            }
        }
    }
}
