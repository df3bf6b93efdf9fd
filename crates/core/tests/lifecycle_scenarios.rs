use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use flux_core::domain::guardrail::SpendingLimit;
use flux_core::store::{IntentStore, LedgerStore};
use flux_core::{
    Agent, AgentId, Alternative, AuditSigner, ErrorKind, GuardrailRule, InMemoryAuditSink,
    InMemoryStore, IntentStatus, LifecycleService, ManualClock, NewGuardrail, NotificationEvent,
    PaymentOutcome, Principal, PurchaseDetails, RecordingSink, Topic, TransactionStatus, User,
    UserId,
};

const SIGNING_KEY: &str = "scenario-signing-key";

struct World {
    store: Arc<InMemoryStore>,
    service: Arc<LifecycleService<InMemoryStore>>,
    sink: RecordingSink,
    clock: ManualClock,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 14, 9, 30, 0).single().expect("valid time")
}

async fn world() -> World {
    let store = Arc::new(InMemoryStore::new());
    for (id, email) in [("user-1", "ada@flux.test"), ("user-2", "grace@flux.test")] {
        store.insert_user(User { id: UserId(id.to_owned()), email: email.to_owned(), created_at: start() }).await;
    }
    for (id, name) in [("agent-1", "TravelGPT"), ("agent-2", "ShopBot")] {
        store
            .insert_agent(Agent {
                id: AgentId(id.to_owned()),
                name: name.to_owned(),
                trust_score: 0.8,
                is_active: true,
                created_at: start(),
            })
            .await;
    }

    let sink = RecordingSink::default();
    let clock = ManualClock::new(start());
    let service = LifecycleService::new(
        Arc::clone(&store),
        AuditSigner::new(SIGNING_KEY),
        Arc::new(sink.clone()),
        Arc::new(InMemoryAuditSink::default()),
        Arc::new(clock.clone()),
    );
    World { store, service: Arc::new(service), sink, clock }
}

fn agent() -> AgentId {
    AgentId("agent-1".to_owned())
}

fn owner() -> UserId {
    UserId("user-1".to_owned())
}

fn purchase(amount_cents: i64) -> PurchaseDetails {
    PurchaseDetails {
        user_id: owner(),
        description: "Round-trip flight SFO to JFK".to_owned(),
        merchant_name: "United Airlines".to_owned(),
        merchant_category: "travel".to_owned(),
        amount_cents,
        currency: None,
        agent_reasoning: Some("Best price for a nonstop".to_owned()),
        alternatives: vec![Alternative::new("Delta via ATL", "Adds four hours")],
    }
}

fn auto_approve_up_to(max_cents: i64) -> NewGuardrail {
    NewGuardrail {
        rule: GuardrailRule::SpendingLimit(SpendingLimit::default()),
        auto_approve: true,
        auto_approve_max_cents: max_cents,
    }
}

#[tokio::test]
async fn without_guardrails_intent_waits_for_review() {
    let world = world().await;

    let created = world.service.create_intent(&agent(), purchase(76_400), "req-a").await.expect("create");

    assert_eq!(created.status, IntentStatus::Pending);
    assert!(!created.auto_approved);
    assert!(created.transaction_id.is_none());
    assert_eq!(created.expires_at - created.created_at, Duration::seconds(300));

    let user_events = world.sink.published_to(&Topic::User(owner()));
    assert_eq!(user_events.len(), 1);
    match &user_events[0] {
        NotificationEvent::Created { amount, reasoning, alternatives, .. } => {
            assert_eq!(*amount, 76_400);
            assert_eq!(reasoning.as_deref(), Some("Best price for a nonstop"));
            assert_eq!(alternatives.len(), 1);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn guardrail_auto_approves_and_opens_transaction() {
    let world = world().await;
    world.service.create_guardrail(&owner(), auto_approve_up_to(10_000), "req-b0").await.expect("guardrail");

    let created = world.service.create_intent(&agent(), purchase(5_000), "req-b").await.expect("create");

    assert_eq!(created.status, IntentStatus::Approved);
    assert!(created.auto_approved);
    let transaction_id = created.transaction_id.clone().expect("transaction opened");
    let transaction = world
        .store
        .find_transaction(&transaction_id)
        .await
        .expect("find")
        .expect("transaction stored");
    assert_eq!(transaction.status, TransactionStatus::Processing);
    assert_eq!(transaction.amount_cents, 5_000);
    assert_eq!(transaction.currency, "USD");
    assert_eq!(world.store.transaction_count().await, 1);

    let intent = world.store.find_intent(&created.intent_id).await.expect("find").expect("intent");
    assert_eq!(intent.approved_at, Some(intent.created_at));

    let events = world.sink.published_to(&Topic::User(owner()));
    assert!(matches!(events.as_slice(), [NotificationEvent::AutoApproved { amount: 5_000, .. }]));

    let trail = world.service.ledger().audit_trail(&transaction_id).await.expect("trail");
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].details["approval_mode"], "auto");
}

#[tokio::test]
async fn lapsed_approval_expires_the_intent() {
    let world = world().await;
    let created = world.service.create_intent(&agent(), purchase(76_400), "req-c").await.expect("create");

    world.clock.advance(Duration::seconds(301));
    let error = world
        .service
        .approve_intent(&created.intent_id, &owner(), "pm_card_visa", "req-c1")
        .await
        .expect_err("window has lapsed");
    assert_eq!(error.kind(), ErrorKind::Expired);

    let view = world
        .service
        .read_intent(&created.intent_id, &Principal::User(owner()))
        .await
        .expect("read");
    assert_eq!(view.intent.status, IntentStatus::Expired);
    assert!(view.intent.rejected_at.is_some());
    assert!(view.intent.approved_at.is_none());
    assert_eq!(world.store.transaction_count().await, 0);
}

#[tokio::test]
async fn reject_notifies_agent_without_transaction() {
    let world = world().await;
    let created = world.service.create_intent(&agent(), purchase(76_400), "req-d").await.expect("create");

    let rejected = world.service.reject_intent(&created.intent_id, &owner(), "req-d1").await.expect("reject");

    assert_eq!(rejected.status, IntentStatus::Rejected);
    let intent = world.store.find_intent(&created.intent_id).await.expect("find").expect("intent");
    assert_eq!(intent.status, IntentStatus::Rejected);
    assert_eq!(intent.rejected_at, Some(rejected.rejected_at));
    assert!(world.store.find_transaction_for_intent(&created.intent_id).await.expect("find").is_none());

    let agent_events = world.sink.published_to(&Topic::Agent(agent()));
    assert!(matches!(
        agent_events.as_slice(),
        [NotificationEvent::Rejected { reason, .. }] if reason == "User rejected"
    ));
}

#[tokio::test]
async fn other_users_approval_is_not_found() {
    let world = world().await;
    let created = world.service.create_intent(&agent(), purchase(76_400), "req-e").await.expect("create");

    let error = world
        .service
        .approve_intent(&created.intent_id, &UserId("user-2".to_owned()), "pm_card_visa", "req-e1")
        .await
        .expect_err("not the owner");
    assert_eq!(error.kind(), ErrorKind::NotFound);

    let intent = world.store.find_intent(&created.intent_id).await.expect("find").expect("intent");
    assert_eq!(intent.status, IntentStatus::Pending);
}

#[tokio::test]
async fn manual_approval_notifies_agent_with_transaction() {
    let world = world().await;
    let created = world.service.create_intent(&agent(), purchase(76_400), "req-m").await.expect("create");
    world.clock.advance(Duration::seconds(299));

    let approved = world
        .service
        .approve_intent(&created.intent_id, &owner(), "pm_card_visa", "req-m1")
        .await
        .expect("approve inside window");

    let transaction = world
        .store
        .find_transaction(&approved.transaction_id)
        .await
        .expect("find")
        .expect("transaction");
    assert_eq!(transaction.payment_method_ref.as_deref(), Some("pm_card_visa"));

    let agent_events = world.sink.published_to(&Topic::Agent(agent()));
    assert!(matches!(
        agent_events.as_slice(),
        [NotificationEvent::Approved { amount: 76_400, transaction_id, .. }] if *transaction_id == approved.transaction_id
    ));
}

#[tokio::test]
async fn terminal_intents_accept_no_further_transitions() {
    let world = world().await;
    let approved = world.service.create_intent(&agent(), purchase(100), "req-p1").await.expect("create");
    world
        .service
        .approve_intent(&approved.intent_id, &owner(), "pm_1", "req-p1a")
        .await
        .expect("approve");

    let again = world.service.approve_intent(&approved.intent_id, &owner(), "pm_1", "req-p1b").await;
    assert_eq!(again.expect_err("already approved").kind(), ErrorKind::NotFound);
    let reject = world.service.reject_intent(&approved.intent_id, &owner(), "req-p1c").await;
    assert_eq!(reject.expect_err("already approved").kind(), ErrorKind::NotFound);

    world.clock.advance(Duration::minutes(30));
    let report = world.service.sweep_expired(10).await.expect("sweep");
    assert!(report.expired.is_empty());

    let intent = world.store.find_intent(&approved.intent_id).await.expect("find").expect("intent");
    assert_eq!(intent.status, IntentStatus::Approved);
}

#[tokio::test]
async fn sweep_and_lazy_expiry_agree() {
    let world = world().await;
    let first = world.service.create_intent(&agent(), purchase(100), "req-p2a").await.expect("create");
    world.clock.advance(Duration::seconds(10));
    let second = world.service.create_intent(&agent(), purchase(200), "req-p2b").await.expect("create");

    world.clock.advance(Duration::seconds(295));
    let report = world.service.sweep_expired(1).await.expect("sweep");
    assert_eq!(report.expired, vec![first.intent_id.clone()]);
    assert!(world.sink.published_to(&Topic::Agent(agent())).is_empty());

    world.clock.advance(Duration::seconds(10));
    let error = world
        .service
        .approve_intent(&second.intent_id, &owner(), "pm_1", "req-p2c")
        .await
        .expect_err("second window lapsed");
    assert_eq!(error.kind(), ErrorKind::Expired);

    let swept_again = world
        .service
        .approve_intent(&first.intent_id, &owner(), "pm_1", "req-p2d")
        .await
        .expect_err("swept intent is no longer pending");
    assert_eq!(swept_again.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn threshold_is_inclusive() {
    let world = world().await;
    world.service.create_guardrail(&owner(), auto_approve_up_to(5_000), "req-p3").await.expect("guardrail");

    let at_limit = world.service.create_intent(&agent(), purchase(5_000), "req-p3a").await.expect("create");
    let over_limit = world.service.create_intent(&agent(), purchase(5_001), "req-p3b").await.expect("create");

    assert!(at_limit.auto_approved);
    assert!(!over_limit.auto_approved);
    assert_eq!(over_limit.status, IntentStatus::Pending);
}

#[tokio::test]
async fn inactive_guardrail_does_not_auto_approve() {
    let world = world().await;
    let guardrail = world
        .service
        .create_guardrail(&owner(), auto_approve_up_to(5_000), "req-p3c")
        .await
        .expect("guardrail");
    world
        .service
        .set_guardrail_active(&owner(), &guardrail.id, false, "req-p3d")
        .await
        .expect("deactivate");

    let created = world.service.create_intent(&agent(), purchase(100), "req-p3e").await.expect("create");
    assert!(!created.auto_approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_create_one_transaction() {
    let world = world().await;
    let created = world.service.create_intent(&agent(), purchase(76_400), "req-p4").await.expect("create");

    let mut handles = Vec::new();
    for attempt in 0..8 {
        let service = Arc::clone(&world.service);
        let intent_id = created.intent_id.clone();
        handles.push(tokio::spawn(async move {
            service
                .approve_intent(&intent_id, &owner(), "pm_card_visa", &format!("req-p4-{attempt}"))
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.expect("task completes") {
            Ok(_) => successes += 1,
            Err(error) => assert_eq!(error.kind(), ErrorKind::NotFound),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(world.store.transaction_count().await, 1);
    assert_eq!(world.sink.published_to(&Topic::Agent(agent())).len(), 1);
}

#[tokio::test]
async fn timestamps_stay_exclusive_across_outcomes() {
    let world = world().await;
    let approved = world.service.create_intent(&agent(), purchase(100), "req-p5a").await.expect("create");
    let rejected = world.service.create_intent(&agent(), purchase(200), "req-p5b").await.expect("create");
    let expired = world.service.create_intent(&agent(), purchase(300), "req-p5c").await.expect("create");

    world.service.approve_intent(&approved.intent_id, &owner(), "pm_1", "req-p5d").await.expect("approve");
    world.service.reject_intent(&rejected.intent_id, &owner(), "req-p5e").await.expect("reject");
    world.clock.advance(Duration::minutes(6));
    world.service.sweep_expired(10).await.expect("sweep");

    for id in [&approved.intent_id, &rejected.intent_id, &expired.intent_id] {
        let intent = world.store.find_intent(id).await.expect("find").expect("intent");
        assert!(!(intent.approved_at.is_some() && intent.rejected_at.is_some()));
        assert!(intent.timestamps_consistent(), "inconsistent timestamps for {id}");
    }
}

#[tokio::test]
async fn audit_trail_only_grows() {
    let world = world().await;
    let created = world.service.create_intent(&agent(), purchase(100), "req-p6").await.expect("create");
    let approved = world
        .service
        .approve_intent(&created.intent_id, &owner(), "pm_1", "req-p6a")
        .await
        .expect("approve");
    let ledger = world.service.ledger();

    let before = ledger.audit_trail(&approved.transaction_id).await.expect("trail");
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].details["approval_mode"], "manual");

    let duplicate = world.store.append_audit_entry(&before[0]).await;
    assert!(duplicate.is_err(), "re-appending an existing sequence must fail");

    ledger
        .report_outcome(&approved.transaction_id, PaymentOutcome::Failed { reason: "card_declined".to_owned() })
        .await
        .expect("report failure");

    let after = ledger.audit_trail(&approved.transaction_id).await.expect("trail");
    assert_eq!(after.len(), 2);
    assert_eq!(after[0], before[0]);
    assert_eq!(after[1].action, "payment.failed");
    assert!(ledger.verify_trail(&approved.transaction_id).await.expect("verify").valid);
}

#[tokio::test]
async fn read_access_follows_ownership() {
    let world = world().await;
    let created = world.service.create_intent(&agent(), purchase(100), "req-r").await.expect("create");

    let view = world
        .service
        .read_intent(&created.intent_id, &Principal::Agent(agent()))
        .await
        .expect("submitting agent reads");
    assert_eq!(view.agent_name, "TravelGPT");
    assert_eq!(view.user_email, "ada@flux.test");

    let other_user = world
        .service
        .read_intent(&created.intent_id, &Principal::User(UserId("user-2".to_owned())))
        .await
        .expect_err("other user");
    assert_eq!(other_user.kind(), ErrorKind::AccessDenied);

    let other_agent = world
        .service
        .read_intent(&created.intent_id, &Principal::Agent(AgentId("agent-2".to_owned())))
        .await
        .expect_err("other agent");
    assert_eq!(other_agent.kind(), ErrorKind::AccessDenied);

    let missing = world
        .service
        .read_intent(&flux_core::IntentId("nope".to_owned()), &Principal::User(owner()))
        .await
        .expect_err("missing");
    assert_eq!(missing.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn validation_and_unknown_user_fail_before_persisting() {
    let world = world().await;

    let mut invalid = purchase(0);
    invalid.description = String::new();
    let error = world.service.create_intent(&agent(), invalid, "req-v").await.expect_err("invalid");
    assert_eq!(error.kind(), ErrorKind::Validation);

    let mut stranger = purchase(100);
    stranger.user_id = UserId("user-404".to_owned());
    let error = world.service.create_intent(&agent(), stranger, "req-v1").await.expect_err("unknown user");
    assert_eq!(error.kind(), ErrorKind::NotFound);

    assert!(world.service.list_pending_intents(&owner()).await.expect("list").is_empty());
    assert!(world.sink.published().is_empty());
}

#[tokio::test]
async fn pending_listing_is_newest_first_and_excludes_decided() {
    let world = world().await;
    let first = world.service.create_intent(&agent(), purchase(100), "req-l1").await.expect("create");
    world.clock.advance(Duration::seconds(1));
    let second = world.service.create_intent(&agent(), purchase(200), "req-l2").await.expect("create");
    world.clock.advance(Duration::seconds(1));
    let third = world.service.create_intent(&agent(), purchase(300), "req-l3").await.expect("create");
    world.service.reject_intent(&second.intent_id, &owner(), "req-l4").await.expect("reject");

    let pending = world.service.list_pending_intents(&owner()).await.expect("list");
    let ids: Vec<_> = pending.iter().map(|summary| summary.intent.id.clone()).collect();
    assert_eq!(ids, vec![third.intent_id, first.intent_id]);
    assert!((pending[0].agent_trust_score - 0.8).abs() < f64::EPSILON);
}
