use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use log::*;
use slip_payment_engine::{
    db_types::{NewOrder, ObligationRef, ReviewReason, Satang},
    events::HookResult,
    EventHandlers,
    EventHooks,
    ObligationsApi,
    PawnTerms,
    ReconciliationApi,
    ReconciliationPolicy,
    SlipData,
};

use crate::support::prepare_env::{at, context, customer, new_database, tear_down};

mod support;

#[derive(Default, Clone)]
struct HookCalled {
    called: Arc<AtomicI32>,
}

impl HookCalled {
    pub fn called(&self) {
        let _ = self.called.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> i32 {
        self.called.load(Ordering::Relaxed)
    }
}

/// Handlers run on their own tasks, so give them a moment to drain their queues.
async fn wait_for(hook: &HookCalled, expected: i32) {
    for _ in 0..100 {
        if hook.count() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn hooks_fire_after_commit() {
    let db = new_database().await;
    let recorded = HookCalled::default();
    let satisfied = HookCalled::default();
    let review = HookCalled::default();
    let satisfied_target = Arc::new(std::sync::Mutex::new(None));

    let mut hooks = EventHooks::default();
    let r = recorded.clone();
    let s = satisfied.clone();
    let target = satisfied_target.clone();
    let v = review.clone();
    hooks
        .on_payment_recorded(move |ev| {
            info!("🪝️ Payment #{} recorded", ev.record.id);
            r.called();
            Box::pin(async { Ok(()) }) as HookResult
        })
        .on_obligation_satisfied(move |ev| {
            if let Ok(mut t) = target.lock() {
                *t = Some(ev.obligation);
            }
            s.called();
            Box::pin(async { Ok(()) }) as HookResult
        })
        .on_review_required(move |ev| {
            assert_eq!(ev.reason, ReviewReason::NoCandidate);
            v.called();
            Box::pin(async { Ok(()) }) as HookResult
        });
    let handlers = EventHandlers::new(10, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let api = ReconciliationApi::new(db.clone(), producers, ReconciliationPolicy::default());
    let obligations = ObligationsApi::new(db.clone(), PawnTerms::default());
    let alice = customer(&db, "alice").await;
    let order = obligations.create_order(NewOrder::new("A-1", alice.id, Satang::from_baht(1500))).await.unwrap();

    let slip = SlipData::new(Satang::from_baht(1000)).with_reference("H-1");
    api.process_payment_at(slip, context("alice"), at(2026, 4, 10)).await.expect("Error processing payment");
    let slip = SlipData::new(Satang::from_baht(500)).with_reference("H-2");
    api.process_payment_at(slip, context("alice"), at(2026, 4, 10)).await.expect("Error processing payment");
    // A duplicate publishes nothing
    let slip = SlipData::new(Satang::from_baht(500)).with_reference("H-2");
    api.process_payment_at(slip, context("alice"), at(2026, 4, 10)).await.expect("Error processing payment");
    let slip = SlipData::new(Satang::from_baht(99)).with_reference("H-3");
    api.process_payment_at(slip, context("bob"), at(2026, 4, 10)).await.expect("Error processing payment");
    drop(api);

    wait_for(&recorded, 3).await;
    wait_for(&satisfied, 1).await;
    wait_for(&review, 1).await;
    assert_eq!(recorded.count(), 3);
    assert_eq!(satisfied.count(), 1);
    assert_eq!(review.count(), 1);
    assert_eq!(*satisfied_target.lock().unwrap(), Some(ObligationRef::order(order.id)));
    tear_down(db).await;
    info!("🪝️ test complete");
}
