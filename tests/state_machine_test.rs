mod common;

use common::*;
use member_sync::domain::account::{AccountState, Intent, MembershipStatus, apply};
use member_sync::domain::attribution::{AttributionRecord, CommissionKind};
use member_sync::domain::event::{EventKind, RefundKind};
use member_sync::domain::id::{AffiliateId, ContentId, PlanId, PromoCodeId};
use member_sync::domain::ledger::TransactionStatus;
use member_sync::domain::money::{Currency, Money, MoneyAmount};
use member_sync::domain::payload::{DateField, OrderType};
use member_sync::domain::reference::decode;

fn state(status: MembershipStatus) -> AccountState {
    AccountState {
        membership_status: status,
        subscriber_id: Some(sub("sale-1")),
        ..AccountState::new(account(42))
    }
}

fn has_notify(intents: &[Intent]) -> bool {
    intents.iter().any(|i| matches!(i, Intent::Notify(_)))
}

// ── Approvals ──────────────────────────────────────────────────────────────

#[test]
fn subscription_approval_activates_and_records() {
    let mut ev = event(EventKind::SubscriptionApproved);
    ev.transaction_id = Some(tx("t-1"));
    ev.subscriber_id = Some(sub("sale-9"));
    ev.money = Money::new(MoneyAmount::new(1995), Currency::Usd);
    ev.next_charge_on = DateField::Set(date("2025-02-01"));
    ev.reference = decode("uid42_affnone_promonone_srcnone_plan7_reg12345678");

    let t = apply(&AccountState::new(account(42)), &ev);

    assert_eq!(t.state.membership_status, MembershipStatus::Active);
    assert_eq!(t.state.subscriber_id, Some(sub("sale-9")));
    assert_eq!(t.state.last_transaction_id, Some(tx("t-1")));
    assert_eq!(t.state.next_charge_on, Some(date("2025-02-01")));
    assert_eq!(t.state.plan_id, Some(PlanId::new(7)));

    let entry = t.ledger_entry.expect("approval is recorded");
    assert_eq!(entry.status, TransactionStatus::Approved);
    assert_eq!(entry.money.amount(), MoneyAmount::new(1995));
    assert_eq!(entry.plan_id, Some(PlanId::new(7)));

    // No attribution: no promo or commission intents.
    assert_eq!(t.intents.len(), 1);
    assert!(has_notify(&t.intents));
}

#[test]
fn approval_reactivates_banned_account() {
    let mut ev = event(EventKind::SubscriptionApproved);
    ev.transaction_id = Some(tx("t-2"));

    let t = apply(&state(MembershipStatus::Banned), &ev);
    assert_eq!(t.state.membership_status, MembershipStatus::Active);
}

#[test]
fn attributed_approval_emits_promo_usage_and_commission() {
    let mut ev = event(EventKind::SubscriptionApproved);
    ev.transaction_id = Some(tx("t-3"));
    ev.money = Money::new(MoneyAmount::new(2000), Currency::Eur);
    ev.attribution = AttributionRecord {
        affiliate_id: Some(AffiliateId::new(5)),
        promo_code_id: Some(PromoCodeId::new(11)),
        click_id: Some("clk".into()),
        redeemed_promo_code_id: Some(PromoCodeId::new(11)),
    };

    let t = apply(&AccountState::new(account(42)), &ev);

    assert!(t.intents.contains(&Intent::IncrementPromoUsage {
        promo_code_id: PromoCodeId::new(11),
        transaction_id: tx("t-3"),
    }));
    let commission = t
        .intents
        .iter()
        .find_map(|i| match i {
            Intent::RecordCommission(c) => Some(c.clone()),
            _ => None,
        })
        .expect("commission intent");
    assert_eq!(commission.kind, CommissionKind::Signup);
    assert_eq!(commission.affiliate_id, AffiliateId::new(5));
    assert_eq!(commission.sale.currency(), Currency::Eur);
    assert_eq!(commission.click_id.as_deref(), Some("clk"));
}

#[test]
fn promo_without_affiliate_counts_usage_but_no_commission() {
    let mut ev = event(EventKind::SubscriptionApproved);
    ev.transaction_id = Some(tx("t-4"));
    ev.attribution.promo_code_id = Some(PromoCodeId::new(3));
    ev.attribution.redeemed_promo_code_id = Some(PromoCodeId::new(3));

    let t = apply(&AccountState::new(account(42)), &ev);

    assert!(t.intents.iter().any(|i| matches!(i, Intent::IncrementPromoUsage { .. })));
    assert!(!t.intents.iter().any(|i| matches!(i, Intent::RecordCommission(_))));
}

#[test]
fn credited_cookie_promo_is_not_a_use() {
    let mut ev = event(EventKind::PurchaseApproved);
    ev.transaction_id = Some(tx("p-c"));
    ev.order_type = OrderType::Purchase;
    ev.reference = decode("ppv_ep502_uid42_affnone_promonone_srcnone_tsnone");
    ev.attribution.affiliate_id = Some(AffiliateId::new(8));
    ev.attribution.promo_code_id = Some(PromoCodeId::new(9));

    let t = apply(&state(MembershipStatus::Active), &ev);

    assert!(!t.intents.iter().any(|i| matches!(i, Intent::IncrementPromoUsage { .. })));
    assert!(t.intents.iter().any(|i| matches!(
        i,
        Intent::RecordCommission(c) if c.promo_code_id == Some(PromoCodeId::new(9))
    )));
}

#[test]
fn purchase_grants_content_once() {
    let mut ev = event(EventKind::PurchaseApproved);
    ev.transaction_id = Some(tx("p-1"));
    ev.order_type = OrderType::Purchase;
    ev.reference = decode("ppv_ep501_uid42_affnone_promonone_srcnone_ts99999999");

    let first = apply(&state(MembershipStatus::Active), &ev);
    assert!(first.intents.contains(&Intent::GrantAccess {
        content_id: ContentId::new(501)
    }));
    assert!(first.state.purchased_content_ids.contains(&ContentId::new(501)));
    assert_eq!(first.state.membership_status, MembershipStatus::Active);

    let second = apply(&first.state, &ev);
    assert!(!second.intents.iter().any(|i| matches!(i, Intent::GrantAccess { .. })));
    assert_eq!(second.state.purchased_content_ids.len(), 1);
}

#[test]
fn purchase_without_content_id_grants_nothing() {
    let mut ev = event(EventKind::PurchaseApproved);
    ev.transaction_id = Some(tx("p-2"));
    ev.reference = decode("user_42");

    let t = apply(&state(MembershipStatus::Active), &ev);

    assert!(t.state.purchased_content_ids.is_empty());
    assert!(!t.intents.iter().any(|i| matches!(i, Intent::GrantAccess { .. })));
    assert_eq!(t.warnings.len(), 1);
    assert!(t.ledger_entry.is_some(), "the charge is still recorded");
}

// ── Lifecycle ──────────────────────────────────────────────────────────────

#[test]
fn rebill_reactivates_cancelled_and_follows_new_sale_id() {
    let mut ev = event(EventKind::Rebill);
    ev.transaction_id = Some(tx("r-1"));
    ev.subscriber_id = Some(sub("sale-2"));
    ev.next_charge_on = DateField::Set(date("2025-03-01"));

    let t = apply(&state(MembershipStatus::Cancelled), &ev);

    assert_eq!(t.state.membership_status, MembershipStatus::Active);
    assert_eq!(t.state.subscriber_id, Some(sub("sale-2")));
    assert_eq!(t.state.next_charge_on, Some(date("2025-03-01")));
    assert_eq!(
        t.ledger_entry.map(|e| e.status),
        Some(TransactionStatus::Rebill)
    );
}

#[test]
fn rebill_keeps_ban_and_skips_commission() {
    let mut ev = event(EventKind::Rebill);
    ev.transaction_id = Some(tx("r-2"));
    ev.attribution.affiliate_id = Some(AffiliateId::new(5));

    let t = apply(&state(MembershipStatus::Banned), &ev);

    assert_eq!(t.state.membership_status, MembershipStatus::Banned);
    assert!(!t.intents.iter().any(|i| matches!(i, Intent::RecordCommission(_))));
    assert!(t.ledger_entry.is_some());
}

#[test]
fn cancel_sets_expiry_and_clears_next_charge_only_when_empty() {
    let mut active = state(MembershipStatus::Active);
    active.next_charge_on = Some(date("2025-02-01"));

    let mut omitted = event(EventKind::Cancel);
    omitted.expires_on = DateField::Set(date("2025-01-31"));
    let t = apply(&active, &omitted);
    assert_eq!(t.state.membership_status, MembershipStatus::Cancelled);
    assert_eq!(t.state.membership_expires_on, Some(date("2025-01-31")));
    assert_eq!(t.state.next_charge_on, Some(date("2025-02-01")));
    assert!(t.ledger_entry.is_none());

    let mut cleared = event(EventKind::Cancel);
    cleared.next_charge_on = DateField::Cleared;
    let t = apply(&active, &cleared);
    assert_eq!(t.state.next_charge_on, None);
}

#[test]
fn expiry_and_uncancel() {
    let t = apply(&state(MembershipStatus::Cancelled), &event(EventKind::Expiry));
    assert_eq!(t.state.membership_status, MembershipStatus::Expired);

    let mut uncancel = event(EventKind::Uncancel);
    uncancel.next_charge_on = DateField::Set(date("2025-04-01"));
    let t = apply(&state(MembershipStatus::Cancelled), &uncancel);
    assert_eq!(t.state.membership_status, MembershipStatus::Active);
    assert_eq!(t.state.next_charge_on, Some(date("2025-04-01")));
}

#[test]
fn non_approval_events_keep_ban() {
    for kind in [EventKind::Cancel, EventKind::Expiry, EventKind::Uncancel] {
        let t = apply(&state(MembershipStatus::Banned), &event(kind));
        assert_eq!(t.state.membership_status, MembershipStatus::Banned, "{kind}");
        assert_eq!(t.warnings.len(), 1);
    }
}

// ── Extend ─────────────────────────────────────────────────────────────────

#[test]
fn extend_after_cancel_stays_cancelled() {
    let mut ev = event(EventKind::Extend);
    ev.next_charge_on = DateField::Set(date("2025-06-01"));

    let t = apply(&state(MembershipStatus::Cancelled), &ev);

    assert_eq!(t.state.membership_status, MembershipStatus::Cancelled);
    assert_eq!(t.state.next_charge_on, Some(date("2025-06-01")));
}

#[test]
fn one_time_extend_derives_expiry_from_next_charge() {
    let mut ev = event(EventKind::Extend);
    ev.one_time = true;
    ev.next_charge_on = DateField::Set(date("2025-07-01"));

    let t = apply(&state(MembershipStatus::Active), &ev);

    assert_eq!(t.state.membership_expires_on, Some(date("2025-07-01")));
    assert_eq!(t.state.next_charge_on, None);
}

#[test]
fn one_time_extend_prefers_explicit_expiry() {
    let mut ev = event(EventKind::Extend);
    ev.one_time = true;
    ev.next_charge_on = DateField::Set(date("2025-07-01"));
    ev.expires_on = DateField::Set(date("2025-08-15"));

    let t = apply(&state(MembershipStatus::Expired), &ev);

    assert_eq!(t.state.membership_status, MembershipStatus::Expired);
    assert_eq!(t.state.membership_expires_on, Some(date("2025-08-15")));
}

// ── Refunds ────────────────────────────────────────────────────────────────

#[test]
fn chargeback_bans_revokes_and_cancels() {
    let mut current = state(MembershipStatus::Active);
    current.purchased_content_ids.insert(ContentId::new(501));
    current.next_charge_on = Some(date("2025-02-01"));

    let mut ev = event(EventKind::Refund(RefundKind::Chargeback));
    ev.transaction_id = Some(tx("cb-1"));
    ev.parent_transaction_id = Some(tx("p-1"));
    ev.reference = decode("ppv_ep501_uid42_affnone_promonone_srcnone_ts99999999");

    let t = apply(&current, &ev);

    assert_eq!(t.state.membership_status, MembershipStatus::Banned);
    assert!(!t.state.purchased_content_ids.contains(&ContentId::new(501)));
    assert_eq!(t.state.next_charge_on, None);
    assert!(t.intents.contains(&Intent::RevokeAccess {
        content_id: ContentId::new(501)
    }));
    assert!(t.intents.contains(&Intent::CancelAtProvider {
        subscriber_id: sub("sale-1")
    }));
    assert!(t.intents.contains(&Intent::VoidCommissions {
        transaction_id: tx("p-1")
    }));
    assert!(t.intents.contains(&Intent::BanAccount {
        reason: "chargeback on transaction cb-1".into()
    }));
    assert_eq!(
        t.ledger_entry.map(|e| e.status),
        Some(TransactionStatus::Chargeback)
    );
}

#[test]
fn credit_on_expired_account_skips_provider_cancel() {
    let mut ev = event(EventKind::Refund(RefundKind::Credit));
    ev.transaction_id = Some(tx("cr-1"));

    let t = apply(&state(MembershipStatus::Expired), &ev);

    assert_eq!(t.state.membership_status, MembershipStatus::Banned);
    assert!(!t.intents.iter().any(|i| matches!(i, Intent::CancelAtProvider { .. })));
    assert!(!t.intents.iter().any(|i| matches!(i, Intent::RevokeAccess { .. })));
}

#[test]
fn unknown_event_changes_nothing() {
    let current = state(MembershipStatus::Active);
    let t = apply(&current, &event(EventKind::Unknown));

    assert_eq!(t.state, current);
    assert!(t.intents.is_empty());
    assert!(t.ledger_entry.is_none());
}

#[test]
fn field_changes_cover_only_modified_keys() {
    let before = state(MembershipStatus::Active);
    let mut after = before.clone();
    after.next_charge_on = Some(date("2025-09-01"));
    after.subscriber_id = None;

    let changes = before.field_changes(&after);

    assert_eq!(
        changes,
        vec![
            ("subscriber_id", None),
            ("next_charge_on", Some("2025-09-01".to_string())),
        ]
    );
}
