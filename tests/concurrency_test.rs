mod common;

use common::*;
use member_sync::domain::account::{MembershipStatus, fields};
use member_sync::domain::attribution::PromoCode;
use member_sync::domain::id::{AffiliateId, ContentId, PromoCodeId};
use member_sync::services::webhook_pipeline::WebhookOutcome;
use std::sync::Arc;

const SUB_REF: &str = "uid42_affnone_promoWELCOME_srcnone_plan7_reg12345678";

// ── 1. concurrent_duplicate_deliveries ─────────────────────────────────────
// 10 tasks deliver the same transaction. Exactly 1 applies, the rest are
// duplicates, and promo usage is counted once.

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_deliveries() {
    let h = Arc::new(Harness::new());
    h.promos.add_promo(PromoCode {
        id: PromoCodeId::new(1),
        code: "WELCOME".into(),
        affiliate_id: Some(AffiliateId::new(5)),
    });
    let body = h.sign(&subscription_approved(SUB_REF, "tx-same", "sale-42"));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let pipeline = h.pipeline.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move { pipeline.process(&body).await.unwrap() }));
    }

    let mut applied = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            WebhookOutcome::Applied { .. } => applied += 1,
            WebhookOutcome::Duplicate { .. } => duplicates += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(applied, 1, "exactly 1 Applied");
    assert_eq!(duplicates, 9, "9 Duplicates");
    assert_eq!(h.promos.usage_count(PromoCodeId::new(1)), 1);
    assert_eq!(h.promos.commissions().len(), 1);
    assert_eq!(h.ledger.transactions().len(), 1);
}

// ── 2. concurrent_purchases_same_account ───────────────────────────────────
// Distinct purchases for one account race; every content id must survive.

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_purchases_same_account() {
    let h = Arc::new(Harness::new());

    let mut handles = Vec::new();
    for content in 1..=20u64 {
        let pipeline = h.pipeline.clone();
        let body = h.sign(&purchase_approved(
            &format!("ppv_ep{content}_uid42_affnone_promonone_srcnone_tsnone"),
            &format!("tx-ppv-{content}"),
        ));
        handles.push(tokio::spawn(async move { pipeline.process(&body).await.unwrap() }));
    }
    for handle in handles {
        assert!(matches!(handle.await.unwrap(), WebhookOutcome::Applied { .. }));
    }

    for content in 1..=20u64 {
        assert!(
            h.access.has_access(account(42), ContentId::new(content)),
            "content {content} lost"
        );
    }
    assert_eq!(h.ledger.transactions().len(), 20);
}

// ── 3. interleaved_rebill_and_extend ───────────────────────────────────────
// A rebill and an extend for the same account arrive together. Whatever the
// order, the account ends active and the extend's expiry is kept.

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_rebill_and_extend() {
    for round in 0..20 {
        let h = Arc::new(Harness::new());
        h.deliver(&subscription_approved(SUB_REF, "tx-base", "sale-42"))
            .await
            .unwrap();

        let rebill = h.sign(&event_for(
            "rebill",
            SUB_REF,
            "sale-42",
            serde_json::json!({
                "transactionId": format!("tx-rebill-{round}"),
                "priceAmount": "19.95",
                "nextChargeOn": "2025-03-01",
            }),
        ));
        let extend = h.sign(&event_for(
            "extend",
            SUB_REF,
            "sale-42",
            serde_json::json!({ "expiresOn": "2025-04-01" }),
        ));

        let a = {
            let pipeline = h.pipeline.clone();
            tokio::spawn(async move { pipeline.process(&rebill).await.unwrap() })
        };
        let b = {
            let pipeline = h.pipeline.clone();
            tokio::spawn(async move { pipeline.process(&extend).await.unwrap() })
        };
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(h.accounts.status(account(42)), MembershipStatus::Active);
        assert_eq!(
            h.accounts.field(account(42), fields::NEXT_CHARGE_ON).as_deref(),
            Some("2025-03-01")
        );
        assert_eq!(
            h.accounts
                .field(account(42), fields::MEMBERSHIP_EXPIRES_ON)
                .as_deref(),
            Some("2025-04-01")
        );
    }
}

// ── 4. accounts_do_not_block_each_other ────────────────────────────────────

#[tokio::test]
async fn lock_for_one_account_does_not_block_another() {
    let h = Harness::new();
    let _held = h.locks.lock(account(1)).await;

    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        h.deliver(&subscription_approved(
            "uid2_affnone_promonone_srcnone_plannone_regnone",
            "tx-other",
            "sale-2",
        )),
    )
    .await
    .expect("account 2 must not wait on account 1")
    .unwrap();

    assert!(matches!(outcome, WebhookOutcome::Applied { .. }));
}
