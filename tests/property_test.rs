mod common;

use common::*;
use member_sync::domain::account::{AccountState, MembershipStatus, apply};
use member_sync::domain::attribution::PromoCode;
use member_sync::domain::event::{EventKind, RefundKind};
use member_sync::domain::id::{AccountId, ContentId, PlanId, PromoCodeId};
use member_sync::domain::money::MoneyAmount;
use member_sync::domain::payload::DateField;
use member_sync::domain::reference::{ReferenceData, ReferenceKind, decode, encode};
use member_sync::domain::signature::{SignatureVerifier, Verification};
use member_sync::services::webhook_pipeline::WebhookOutcome;
use proptest::prelude::*;

fn arb_status() -> impl Strategy<Value = MembershipStatus> {
    prop_oneof![
        Just(MembershipStatus::None),
        Just(MembershipStatus::Active),
        Just(MembershipStatus::Cancelled),
        Just(MembershipStatus::Expired),
        Just(MembershipStatus::Banned),
    ]
}

fn arb_date_field() -> impl Strategy<Value = DateField> {
    prop_oneof![
        Just(DateField::Absent),
        Just(DateField::Cleared),
        (0i64..3650).prop_map(|d| DateField::Set(date("2024-01-01") + chrono::Duration::days(d))),
    ]
}

/// Codes as the encoder can emit them: alphanumeric, at most `max` chars,
/// never the placeholder.
fn arb_code(max: usize) -> impl Strategy<Value = Option<String>> {
    proptest::option::of(
        proptest::string::string_regex(&format!("[A-Za-z0-9]{{1,{max}}}"))
            .unwrap()
            .prop_filter("placeholder", |s| s != "none"),
    )
}

fn arb_epoch() -> impl Strategy<Value = Option<u64>> {
    proptest::option::of(0u64..100_000_000)
}

fn arb_subscription_ref() -> impl Strategy<Value = ReferenceData> {
    (
        0u64..10_000_000,
        arb_code(8),
        arb_code(8),
        arb_code(6),
        proptest::option::of(0u64..100_000),
        arb_epoch(),
    )
        .prop_map(|(account, aff, promo, src, plan, reg)| ReferenceData {
            account_id: AccountId::new(account),
            affiliate_code: aff,
            promo_code: promo,
            signup_source: src,
            plan_id: plan.map(PlanId::new),
            registered_at: reg,
            ..ReferenceData::default()
        })
}

fn arb_purchase_ref() -> impl Strategy<Value = ReferenceData> {
    (
        0u64..10_000_000,
        proptest::option::of(1u64..1_000_000),
        arb_code(8),
        arb_code(8),
        arb_code(6),
        arb_epoch(),
    )
        .prop_map(|(account, content, aff, promo, src, ts)| ReferenceData {
            account_id: AccountId::new(account),
            content_id: content.map(ContentId::new),
            affiliate_code: aff,
            promo_code: promo,
            signup_source: src,
            purchased_at: ts,
            ..ReferenceData::default()
        })
}

proptest! {
    /// Flipping any single bit of a signed body never yields a valid result.
    #[test]
    fn single_bit_flip_is_rejected(
        payload in proptest::collection::vec(any::<u8>(), 1..64),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let verifier = SignatureVerifier::new("whsec_prop");
        let body = verifier.sign(&payload);
        prop_assert_eq!(verifier.verify(&body), Verification::Valid(payload.clone()));

        let mut bytes = body.into_bytes();
        let i = position.index(bytes.len());
        bytes[i] ^= 1 << bit;

        if let Ok(mutated) = String::from_utf8(bytes) {
            prop_assert!(
                !matches!(verifier.verify(&mutated), Verification::Valid(_)),
                "accepted mutated body {mutated:?}"
            );
        }
    }

    #[test]
    fn subscription_reference_round_trips(fields in arb_subscription_ref()) {
        let encoded = encode(ReferenceKind::Subscription, &fields);
        prop_assert_eq!(decode(&encoded), fields);
    }

    #[test]
    fn purchase_reference_round_trips(fields in arb_purchase_ref()) {
        let encoded = encode(ReferenceKind::Purchase, &fields);
        prop_assert_eq!(decode(&encoded), fields);
    }

    /// Decoding is total: arbitrary text never panics, and text outside the
    /// known layouts yields the empty record.
    #[test]
    fn decode_is_total(raw in ".{0,80}") {
        let data = decode(&raw);
        if !(raw.trim_start().starts_with("uid")
            || raw.trim_start().starts_with("ppv_")
            || raw.trim_start().starts_with("user_"))
        {
            prop_assert_eq!(data, ReferenceData::default());
        }
    }

    #[test]
    fn extend_never_changes_status(
        status in arb_status(),
        one_time in any::<bool>(),
        next in arb_date_field(),
        expires in arb_date_field(),
    ) {
        let current = AccountState {
            membership_status: status,
            ..AccountState::new(account(1))
        };
        let mut ev = event(EventKind::Extend);
        ev.one_time = one_time;
        ev.next_charge_on = next;
        ev.expires_on = expires;

        let t = apply(&current, &ev);

        prop_assert_eq!(t.state.membership_status, status);
        prop_assert!(t.ledger_entry.is_none());
        prop_assert_eq!(t.state.purchased_content_ids, current.purchased_content_ids);
        prop_assert_eq!(t.state.subscriber_id, current.subscriber_id);
    }

    #[test]
    fn refund_always_bans_and_removes_content(
        status in arb_status(),
        chargeback in any::<bool>(),
        owned in any::<bool>(),
        content in 1u64..10_000,
    ) {
        let mut current = AccountState {
            membership_status: status,
            ..AccountState::new(account(1))
        };
        if owned {
            current.purchased_content_ids.insert(ContentId::new(content));
        }
        let kind = if chargeback { RefundKind::Chargeback } else { RefundKind::Credit };
        let mut ev = event(EventKind::Refund(kind));
        ev.transaction_id = Some(tx("refund-1"));
        ev.reference = decode(&format!("ppv_ep{content}_uid1_affnone_promonone_srcnone_tsnone"));

        let t = apply(&current, &ev);

        prop_assert_eq!(t.state.membership_status, MembershipStatus::Banned);
        prop_assert!(!t.state.purchased_content_ids.contains(&ContentId::new(content)));
    }

    /// Delivering the same transaction twice leaves the account exactly as
    /// one delivery does, and counts promo usage once.
    #[test]
    fn redelivery_is_idempotent(
        account_id in 1u64..1_000_000,
        cents in 0u64..1_000_000,
        purchase in any::<bool>(),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let h = Harness::new();
            h.promos.add_promo(PromoCode {
                id: PromoCodeId::new(1),
                code: "WELCOME".into(),
                affiliate_id: None,
            });

            let amount = format!("{}.{:02}", cents / 100, cents % 100);
            let payload = if purchase {
                let mut p = purchase_approved(
                    &format!("ppv_ep77_uid{account_id}_affnone_promoWELCOME_srcnone_tsnone"),
                    "tx-prop",
                );
                p["priceAmount"] = serde_json::json!(amount);
                p
            } else {
                let mut p = subscription_approved(
                    &format!("uid{account_id}_affnone_promoWELCOME_srcnone_plan1_regnone"),
                    "tx-prop",
                    "sale-prop",
                );
                p["priceAmount"] = serde_json::json!(amount);
                p
            };

            let first = h.deliver(&payload).await.unwrap();
            let after_one = h.accounts.record(account(account_id));
            let second = h.deliver(&payload).await.unwrap();
            let after_two = h.accounts.record(account(account_id));

            assert!(matches!(first, WebhookOutcome::Applied { .. }));
            assert_eq!(second, WebhookOutcome::Duplicate { account_id: account(account_id) });
            assert_eq!(after_one, after_two);
            assert_eq!(h.promos.usage_count(PromoCodeId::new(1)), 1);
            assert_eq!(h.ledger.transactions().len(), 1);
            assert_eq!(
                h.ledger.transaction("tx-prop").unwrap().money.amount(),
                MoneyAmount::new(cents)
            );
        });
    }
}
