use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::clock::Clock;
use crate::domain::guardrail::{Guardrail, GuardrailId, NewGuardrail};
use crate::domain::intent::{
    IntentId, IntentStatus, IntentView, PendingIntentSummary, PurchaseDetails, TransactionIntent,
};
use crate::domain::principal::{AgentId, Principal, User, UserId};
use crate::domain::transaction::{Transaction, TransactionId};
use crate::errors::{ApplicationError, DomainError};
use crate::guardrails::{GuardrailEvaluator, GuardrailInput};
use crate::ledger::{now_micros, ApprovalMode, AuditSigner, LedgerService};
use crate::lifecycle::machine::{IntentEvent, IntentStateMachine};
use crate::notify::{dispatch, NotificationEvent, NotificationSink, Outbound, Topic};
use crate::store::Store;

pub const REJECTION_REASON: &str = "User rejected";
pub const DEFAULT_SWEEP_BATCH_SIZE: u32 = 100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreatedIntent {
    pub intent_id: IntentId,
    pub status: IntentStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub auto_approved: bool,
    pub transaction_id: Option<TransactionId>,
    pub matched_guardrail: Option<GuardrailId>,
    #[serde(skip)]
    pub notifications: Vec<Outbound>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovedIntent {
    pub intent_id: IntentId,
    pub transaction_id: TransactionId,
    pub status: IntentStatus,
    pub approved_at: DateTime<Utc>,
    #[serde(skip)]
    pub notifications: Vec<Outbound>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectedIntent {
    pub intent_id: IntentId,
    pub status: IntentStatus,
    pub rejected_at: DateTime<Utc>,
    #[serde(skip)]
    pub notifications: Vec<Outbound>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user: User,
    /// Newest first.
    pub guardrails: Vec<Guardrail>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: Vec<IntentId>,
    /// Intents that left `pending` between the scan and the swap.
    pub skipped: usize,
}

/// Drives intents through their lifecycle.
///
/// Every transition goes through [`IntentStateMachine`] and lands in storage
/// through a compare-and-swap, so concurrent approve, reject and sweep calls
/// on one intent produce exactly one winner. Notifications are produced as
/// values, returned with each outcome, and dispatched to the injected sink
/// after the write commits.
pub struct LifecycleService<S: ?Sized> {
    store: Arc<S>,
    evaluator: GuardrailEvaluator,
    machine: IntentStateMachine,
    ledger: LedgerService<S>,
    notifications: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl<S> LifecycleService<S>
where
    S: Store + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        signer: AuditSigner,
        notifications: Arc<dyn NotificationSink>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = LedgerService::new(Arc::clone(&store), signer, Arc::clone(&clock));
        Self {
            store,
            evaluator: GuardrailEvaluator,
            machine: IntentStateMachine,
            ledger,
            notifications,
            audit,
            clock,
        }
    }

    pub fn ledger(&self) -> &LedgerService<S> {
        &self.ledger
    }

    fn now(&self) -> DateTime<Utc> {
        now_micros(&*self.clock)
    }

    fn publish(&self, notifications: &[Outbound]) {
        let reached = dispatch(&*self.notifications, notifications);
        for outbound in notifications {
            info!(
                event_name = "notify.dispatched",
                topic = %outbound.topic,
                event_type = outbound.event.event_type(),
                "notification dispatched"
            );
        }
        tracing::debug!(event_name = "notify.dispatch.reach", receivers = reached, "dispatch complete");
    }

    /// Submits a purchase on behalf of `agent_id`. The intent is persisted as
    /// `pending`, then moved to `approved` in the same call when one of the
    /// user's active guardrails clears it. If the guardrail read or the
    /// auto-approval write fails, the intent stays `pending`, the user still
    /// receives `created`, and the error is returned.
    pub async fn create_intent(
        &self,
        agent_id: &AgentId,
        details: PurchaseDetails,
        correlation_id: &str,
    ) -> Result<CreatedIntent, ApplicationError> {
        let details = details.validate()?;

        if self.store.find_user(&details.user_id).await?.is_none() {
            return Err(ApplicationError::not_found("user", details.user_id.0.clone()));
        }
        if self.store.find_agent(agent_id).await?.is_none() {
            return Err(ApplicationError::not_found("agent", agent_id.0.clone()));
        }

        let now = self.now();
        let intent = TransactionIntent::pending(IntentId::generate(), agent_id.clone(), details, now);
        self.store.insert_intent(&intent).await?;

        let guardrails = match self.store.list_guardrails(&intent.user_id).await {
            Ok(guardrails) => guardrails,
            Err(error) => return Err(self.left_pending(&intent, correlation_id, error.into())),
        };
        let decision = self.evaluator.evaluate(
            &GuardrailInput {
                amount_cents: intent.amount_cents,
                merchant_name: &intent.merchant_name,
                merchant_category: &intent.merchant_category,
            },
            &guardrails,
        );
        let matched_guardrail = decision.matched_rule.as_ref().map(|rule| rule.id.clone());
        let audit = AuditContext::new(
            Some(intent.id.clone()),
            correlation_id,
            format!("agent:{agent_id}"),
        );

        let (status, transaction_id, notifications) = if decision.auto_approve {
            let change = match self.machine.apply_with_audit(
                &intent.id,
                intent.status,
                IntentEvent::GuardrailCleared,
                now,
                &*self.audit,
                &audit,
            ) {
                Ok(change) => change,
                Err(error) => {
                    return Err(self.left_pending(&intent, correlation_id, DomainError::from(error).into()))
                }
            };
            let transaction = Transaction::processing(&intent, None, now);
            let opening = self.ledger.signer().opening_entry(&transaction, ApprovalMode::Auto, now);
            match self.store.commit_approval(&change, &transaction, &opening).await {
                Ok(true) => {}
                Ok(false) => {
                    self.machine.record_lost(&change, IntentEvent::GuardrailCleared, &*self.audit, &audit);
                    return Err(DomainError::InvariantViolation(format!(
                        "freshly created intent {} left pending before auto-approval",
                        intent.id
                    ))
                    .into());
                }
                Err(error) => return Err(self.left_pending(&intent, correlation_id, error.into())),
            }
            self.machine.record_applied(&change, IntentEvent::GuardrailCleared, &*self.audit, &audit);

            self.audit.emit(
                AuditEvent::new(&audit, "guardrail.auto_approved", AuditCategory::Guardrail, AuditOutcome::Success)
                    .with_metadata("guardrail_id", matched_guardrail.as_ref().map(|id| id.0.clone()).unwrap_or_default())
                    .with_metadata("amount_cents", intent.amount_cents.to_string()),
            );
            let notification = NotificationEvent::AutoApproved {
                intent_id: intent.id.clone(),
                amount: intent.amount_cents,
                merchant: intent.merchant_name.clone(),
            };
            let user_topic = Topic::User(intent.user_id.clone());
            (IntentStatus::Approved, Some(transaction.id), vec![Outbound::new(user_topic, notification)])
        } else {
            (IntentStatus::Pending, None, vec![created_notification(&intent)])
        };

        info!(
            event_name = "lifecycle.intent.created",
            correlation_id,
            intent_id = %intent.id,
            user_id = %intent.user_id,
            agent_id = %agent_id,
            amount_cents = intent.amount_cents,
            auto_approved = decision.auto_approve,
            "intent created"
        );
        self.publish(&notifications);

        Ok(CreatedIntent {
            intent_id: intent.id,
            status,
            expires_at: intent.expires_at,
            created_at: intent.created_at,
            auto_approved: decision.auto_approve,
            transaction_id,
            matched_guardrail,
            notifications,
        })
    }

    /// Approves a pending intent owned by `user_id` and opens its
    /// transaction. A lapsed window expires the intent instead.
    pub async fn approve_intent(
        &self,
        intent_id: &IntentId,
        user_id: &UserId,
        payment_method_ref: &str,
        correlation_id: &str,
    ) -> Result<ApprovedIntent, ApplicationError> {
        let payment_method_ref = payment_method_ref.trim();
        if payment_method_ref.is_empty() {
            return Err(ApplicationError::validation("payment_method_id is required"));
        }

        let intent = self.load_pending_for_owner(intent_id, user_id).await?;
        let audit = AuditContext::new(Some(intent.id.clone()), correlation_id, format!("user:{user_id}"));
        let now = self.now();

        if intent.is_expired_at(now) {
            return Err(self.expire_on_access(&intent, now, &audit).await);
        }

        let change = self.machine.apply_with_audit(
            &intent.id,
            intent.status,
            IntentEvent::UserApproved,
            now,
            &*self.audit,
            &audit,
        )?;
        let transaction = Transaction::processing(&intent, Some(payment_method_ref.to_owned()), now);
        let opening = self.ledger.signer().opening_entry(&transaction, ApprovalMode::Manual, now);

        if !self.store.commit_approval(&change, &transaction, &opening).await? {
            warn!(
                event_name = "lifecycle.intent.approve_lost_race",
                correlation_id,
                intent_id = %intent.id,
                "intent left pending before approval committed"
            );
            self.machine.record_lost(&change, IntentEvent::UserApproved, &*self.audit, &audit);
            return Err(self.lost_race_error(&intent).await);
        }
        self.machine.record_applied(&change, IntentEvent::UserApproved, &*self.audit, &audit);

        let notifications = vec![Outbound::new(
            Topic::Agent(intent.agent_id.clone()),
            NotificationEvent::Approved {
                intent_id: intent.id.clone(),
                transaction_id: transaction.id.clone(),
                amount: intent.amount_cents,
            },
        )];

        info!(
            event_name = "lifecycle.intent.approved",
            correlation_id,
            intent_id = %intent.id,
            transaction_id = %transaction.id,
            user_id = %user_id,
            "intent approved"
        );
        self.publish(&notifications);

        Ok(ApprovedIntent {
            intent_id: intent.id,
            transaction_id: transaction.id,
            status: IntentStatus::Approved,
            approved_at: now,
            notifications,
        })
    }

    /// Rejects a pending intent owned by `user_id`. No transaction is made.
    pub async fn reject_intent(
        &self,
        intent_id: &IntentId,
        user_id: &UserId,
        correlation_id: &str,
    ) -> Result<RejectedIntent, ApplicationError> {
        let intent = self.load_pending_for_owner(intent_id, user_id).await?;
        let audit = AuditContext::new(Some(intent.id.clone()), correlation_id, format!("user:{user_id}"));
        let now = self.now();

        let change = self.machine.apply_with_audit(
            &intent.id,
            intent.status,
            IntentEvent::UserRejected,
            now,
            &*self.audit,
            &audit,
        )?;
        if !self.store.transition(&change).await? {
            self.machine.record_lost(&change, IntentEvent::UserRejected, &*self.audit, &audit);
            return Err(pending_not_found(intent_id));
        }
        self.machine.record_applied(&change, IntentEvent::UserRejected, &*self.audit, &audit);

        let notifications = vec![Outbound::new(
            Topic::Agent(intent.agent_id.clone()),
            NotificationEvent::Rejected {
                intent_id: intent.id.clone(),
                reason: REJECTION_REASON.to_owned(),
            },
        )];

        info!(
            event_name = "lifecycle.intent.rejected",
            correlation_id,
            intent_id = %intent.id,
            user_id = %user_id,
            "intent rejected"
        );
        self.publish(&notifications);

        Ok(RejectedIntent { intent_id: intent.id, status: IntentStatus::Rejected, rejected_at: now, notifications })
    }

    /// Users read their own intents; agents read the intents they submitted.
    pub async fn read_intent(
        &self,
        intent_id: &IntentId,
        principal: &Principal,
    ) -> Result<IntentView, ApplicationError> {
        let intent = self
            .store
            .find_intent(intent_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("intent", intent_id.0.clone()))?;

        match principal {
            Principal::User(user_id) if *user_id != intent.user_id => {
                return Err(ApplicationError::AccessDenied("intent belongs to another user".to_owned()));
            }
            Principal::Agent(agent_id) if *agent_id != intent.agent_id => {
                return Err(ApplicationError::AccessDenied(
                    "intent was submitted by another agent".to_owned(),
                ));
            }
            _ => {}
        }

        let agent = self
            .store
            .find_agent(&intent.agent_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("agent", intent.agent_id.0.clone()))?;
        let user = self
            .store
            .find_user(&intent.user_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", intent.user_id.0.clone()))?;

        Ok(IntentView { intent, agent_name: agent.name, user_email: user.email })
    }

    pub async fn list_pending_intents(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PendingIntentSummary>, ApplicationError> {
        Ok(self.store.list_pending_intents(user_id).await?)
    }

    pub async fn create_guardrail(
        &self,
        user_id: &UserId,
        guardrail: NewGuardrail,
        correlation_id: &str,
    ) -> Result<Guardrail, ApplicationError> {
        let guardrail = guardrail.validate()?;
        if self.store.find_user(user_id).await?.is_none() {
            return Err(ApplicationError::not_found("user", user_id.0.clone()));
        }

        let guardrail = guardrail.into_guardrail(GuardrailId::generate(), user_id.clone(), self.now());
        self.store.insert_guardrail(&guardrail).await?;

        info!(
            event_name = "guardrail.created",
            correlation_id,
            user_id = %user_id,
            guardrail_id = %guardrail.id,
            rule_type = guardrail.rule.rule_type().as_str(),
            auto_approve = guardrail.auto_approve,
            "guardrail created"
        );
        Ok(guardrail)
    }

    pub async fn set_guardrail_active(
        &self,
        user_id: &UserId,
        guardrail_id: &GuardrailId,
        is_active: bool,
        correlation_id: &str,
    ) -> Result<Guardrail, ApplicationError> {
        let guardrail = self
            .store
            .set_guardrail_active(user_id, guardrail_id, is_active)
            .await?
            .ok_or_else(|| ApplicationError::not_found("guardrail", guardrail_id.0.clone()))?;

        info!(
            event_name = "guardrail.toggled",
            correlation_id,
            user_id = %user_id,
            guardrail_id = %guardrail_id,
            is_active,
            "guardrail toggled"
        );
        Ok(guardrail)
    }

    pub async fn user_profile(&self, user_id: &UserId) -> Result<UserProfile, ApplicationError> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", user_id.0.clone()))?;
        let mut guardrails = self.store.list_guardrails(user_id).await?;
        guardrails.reverse();
        Ok(UserProfile { user, guardrails })
    }

    /// Expires every pending intent whose window has closed, in batches.
    /// Emits no notifications.
    pub async fn sweep_expired(&self, batch_size: u32) -> Result<SweepReport, ApplicationError> {
        let batch_size = batch_size.max(1);
        let audit = AuditContext::new(None, "sweeper", "system:sweeper");
        let mut report = SweepReport::default();

        loop {
            let now = self.now();
            let batch = self.store.list_expired_pending(now, batch_size).await?;
            let batch_len = batch.len();
            report.scanned += batch_len;

            for intent in batch {
                let change = self.machine.apply(&intent.id, intent.status, IntentEvent::WindowElapsed, now)?;
                if self.store.transition(&change).await? {
                    info!(
                        event_name = "lifecycle.intent.expired",
                        intent_id = %intent.id,
                        user_id = %intent.user_id,
                        expires_at = %intent.expires_at,
                        "intent expired by sweep"
                    );
                    report.expired.push(intent.id);
                } else {
                    report.skipped += 1;
                }
            }

            if batch_len < batch_size as usize {
                break;
            }
        }

        self.audit.emit(
            AuditEvent::new(&audit, "lifecycle.sweep", AuditCategory::Lifecycle, AuditOutcome::Success)
                .with_metadata("scanned", report.scanned.to_string())
                .with_metadata("expired", report.expired.len().to_string()),
        );
        Ok(report)
    }

    async fn load_pending_for_owner(
        &self,
        intent_id: &IntentId,
        user_id: &UserId,
    ) -> Result<TransactionIntent, ApplicationError> {
        self.store
            .find_intent(intent_id)
            .await?
            .filter(|intent| intent.user_id == *user_id && intent.status == IntentStatus::Pending)
            .ok_or_else(|| pending_not_found(intent_id))
    }

    /// Moves a lapsed intent to `expired` and builds the error the caller
    /// sees. A concurrent expiry counts the same as our own.
    async fn expire_on_access(
        &self,
        intent: &TransactionIntent,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> ApplicationError {
        let change = match self.machine.apply_with_audit(
            &intent.id,
            intent.status,
            IntentEvent::WindowElapsed,
            now,
            &*self.audit,
            audit,
        ) {
            Ok(change) => change,
            Err(error) => return DomainError::from(error).into(),
        };

        match self.store.transition(&change).await {
            Ok(true) => {
                self.machine.record_applied(&change, IntentEvent::WindowElapsed, &*self.audit, audit);
                info!(
                    event_name = "lifecycle.intent.expired",
                    correlation_id = %audit.correlation_id,
                    intent_id = %intent.id,
                    "intent expired on approval attempt"
                );
                expired_error(intent)
            }
            Ok(false) => {
                self.machine.record_lost(&change, IntentEvent::WindowElapsed, &*self.audit, audit);
                self.lost_race_error(intent).await
            }
            Err(error) => error.into(),
        }
    }

    /// Auto-approval could not finish; the intent is still `pending`.
    fn left_pending(
        &self,
        intent: &TransactionIntent,
        correlation_id: &str,
        error: ApplicationError,
    ) -> ApplicationError {
        warn!(
            event_name = "lifecycle.intent.auto_approval_failed",
            correlation_id,
            intent_id = %intent.id,
            error = %error,
            "auto-approval failed; intent left pending"
        );
        self.publish(&[created_notification(intent)]);
        error
    }

    async fn lost_race_error(&self, intent: &TransactionIntent) -> ApplicationError {
        match self.store.find_intent(&intent.id).await {
            Ok(Some(current)) if current.status == IntentStatus::Expired => expired_error(intent),
            Ok(_) => pending_not_found(&intent.id),
            Err(error) => error.into(),
        }
    }
}

fn created_notification(intent: &TransactionIntent) -> Outbound {
    Outbound::new(
        Topic::User(intent.user_id.clone()),
        NotificationEvent::Created {
            intent_id: intent.id.clone(),
            amount: intent.amount_cents,
            merchant: intent.merchant_name.clone(),
            description: intent.description.clone(),
            reasoning: intent.agent_reasoning.clone(),
            alternatives: intent.alternatives.clone(),
        },
    )
}

fn pending_not_found(intent_id: &IntentId) -> ApplicationError {
    ApplicationError::not_found("pending intent", intent_id.0.clone())
}

fn expired_error(intent: &TransactionIntent) -> ApplicationError {
    ApplicationError::Expired { intent_id: intent.id.0.clone(), expired_at: intent.expires_at }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use super::LifecycleService;
    use crate::audit::InMemoryAuditSink;
    use crate::clock::ManualClock;
    use crate::domain::guardrail::{GuardrailRule, NewGuardrail, SpendingLimit};
    use crate::domain::intent::{IntentStatus, PurchaseDetails};
    use crate::domain::principal::{Agent, AgentId, User, UserId};
    use crate::errors::ErrorKind;
    use crate::ledger::AuditSigner;
    use crate::notify::RecordingSink;
    use crate::store::InMemoryStore;

    struct Harness {
        service: LifecycleService<InMemoryStore>,
        clock: ManualClock,
        audit: InMemoryAuditSink,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).single().expect("valid time");
        store.insert_user(User { id: UserId("user-1".to_owned()), email: "one@flux.test".to_owned(), created_at: start }).await;
        store
            .insert_agent(Agent {
                id: AgentId("agent-1".to_owned()),
                name: "TravelGPT".to_owned(),
                trust_score: 0.8,
                is_active: true,
                created_at: start,
            })
            .await;
        let clock = ManualClock::new(start);
        let audit = InMemoryAuditSink::default();
        let service = LifecycleService::new(
            store,
            AuditSigner::new("unit-test-signing-key"),
            Arc::new(RecordingSink::default()),
            Arc::new(audit.clone()),
            Arc::new(clock.clone()),
        );
        Harness { service, clock, audit }
    }

    fn details(amount_cents: i64) -> PurchaseDetails {
        PurchaseDetails {
            user_id: UserId("user-1".to_owned()),
            description: "Weekend hotel".to_owned(),
            merchant_name: "Hilton".to_owned(),
            merchant_category: "travel".to_owned(),
            amount_cents,
            currency: None,
            agent_reasoning: None,
            alternatives: Vec::new(),
        }
    }

    #[tokio::test]
    async fn created_outcome_carries_user_notification() {
        let harness = harness().await;
        let created = harness
            .service
            .create_intent(&AgentId("agent-1".to_owned()), details(12_000), "req-1")
            .await
            .expect("create");

        assert_eq!(created.notifications.len(), 1);
        assert_eq!(created.notifications[0].topic.to_string(), "user:user-1");
        assert_eq!(created.notifications[0].event.event_type(), "created");
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found() {
        let harness = harness().await;
        let error = harness
            .service
            .create_intent(&AgentId("ghost".to_owned()), details(100), "req-2")
            .await
            .expect_err("agent must exist");
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn approve_requires_payment_method() {
        let harness = harness().await;
        let created = harness
            .service
            .create_intent(&AgentId("agent-1".to_owned()), details(100), "req-3")
            .await
            .expect("create");

        let error = harness
            .service
            .approve_intent(&created.intent_id, &UserId("user-1".to_owned()), "  ", "req-4")
            .await
            .expect_err("blank payment method");
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn reject_after_window_still_rejects() {
        let harness = harness().await;
        let created = harness
            .service
            .create_intent(&AgentId("agent-1".to_owned()), details(100), "req-5")
            .await
            .expect("create");
        harness.clock.advance(Duration::minutes(10));

        let rejected = harness
            .service
            .reject_intent(&created.intent_id, &UserId("user-1".to_owned()), "req-6")
            .await
            .expect("reject lapsed pending intent");
        assert_eq!(rejected.status, IntentStatus::Rejected);
    }

    #[tokio::test]
    async fn profile_lists_guardrails_newest_first_and_toggle_is_owner_scoped() {
        let harness = harness().await;
        let user = UserId("user-1".to_owned());
        let rule = || NewGuardrail {
            rule: GuardrailRule::SpendingLimit(SpendingLimit::default()),
            auto_approve: true,
            auto_approve_max_cents: 1_000,
        };

        let first = harness.service.create_guardrail(&user, rule(), "req-7").await.expect("first");
        harness.clock.advance(Duration::seconds(1));
        let second = harness.service.create_guardrail(&user, rule(), "req-8").await.expect("second");

        let profile = harness.service.user_profile(&user).await.expect("profile");
        let ids: Vec<_> = profile.guardrails.iter().map(|guardrail| guardrail.id.clone()).collect();
        assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);

        let toggled = harness
            .service
            .set_guardrail_active(&user, &first.id, false, "req-9")
            .await
            .expect("toggle");
        assert!(!toggled.is_active);

        let error = harness
            .service
            .set_guardrail_active(&UserId("user-2".to_owned()), &first.id, true, "req-10")
            .await
            .expect_err("not the owner");
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn sweep_records_an_audit_event() {
        let harness = harness().await;
        harness
            .service
            .create_intent(&AgentId("agent-1".to_owned()), details(100), "req-11")
            .await
            .expect("create");
        harness.clock.advance(Duration::seconds(301));

        let report = harness.service.sweep_expired(10).await.expect("sweep");
        assert_eq!(report.expired.len(), 1);
        assert_eq!(harness.audit.events_of_type("lifecycle.sweep").len(), 1);
    }
}
