//! Attribution reference carried through the payment provider.
//!
//! The checkout request embeds a compact `referenceId`; the provider echoes it
//! back verbatim on every webhook for that sale. Two families exist:
//!
//! * enhanced: component-prefixed tokens joined with `_`
//!   (`uid42_affnone_promoWELCOME_srcnone_plan7_reg12345678`,
//!   `ppv_ep501_uid42_affnone_promonone_srcnone_ts99999999`)
//! * legacy: positional (`user_42`, `ppv_501_42_1700000000`)
//!
//! Decoding never fails. Input no matcher recognises decodes to
//! [`ReferenceData::default`], whose account id is [`AccountId::UNKNOWN`].

use {
    super::id::{AccountId, ContentId, PlanId},
    regex::Regex,
    std::sync::LazyLock,
};

const PLACEHOLDER: &str = "none";
const MAX_CODE_LEN: usize = 8;
const MAX_SOURCE_LEN: usize = 6;
const EPOCH_SUFFIX_MODULUS: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Subscription,
    Purchase,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceData {
    pub account_id: AccountId,
    pub affiliate_code: Option<String>,
    pub promo_code: Option<String>,
    pub signup_source: Option<String>,
    pub plan_id: Option<PlanId>,
    /// Last eight digits of the registration epoch.
    pub registered_at: Option<u64>,
    pub content_id: Option<ContentId>,
    /// Last eight digits of the purchase epoch.
    pub purchased_at: Option<u64>,
}

impl ReferenceData {
    pub fn is_recognized(&self) -> bool {
        self.account_id.is_known()
    }

    pub fn is_purchase(&self) -> bool {
        self.content_id.is_some()
    }
}

// ── Encoding ───────────────────────────────────────────────────────────────

/// Builds the `referenceId` for an outbound payment request.
///
/// Free-text components are reduced to ASCII alphanumerics and truncated
/// (codes to 8 characters, source tags to 6) so the identifier stays inside
/// the provider's field limit. Absent components are written as `none`,
/// never omitted. Timestamps keep their last eight digits.
pub fn encode(kind: ReferenceKind, fields: &ReferenceData) -> String {
    let aff = code_token(fields.affiliate_code.as_deref(), MAX_CODE_LEN);
    let promo = code_token(fields.promo_code.as_deref(), MAX_CODE_LEN);
    let src = code_token(fields.signup_source.as_deref(), MAX_SOURCE_LEN);

    match kind {
        ReferenceKind::Subscription => {
            let plan = fields
                .plan_id
                .map(|p| p.get().to_string())
                .unwrap_or_else(|| PLACEHOLDER.to_string());
            let reg = epoch_suffix(fields.registered_at);
            [
                format!("uid{}", fields.account_id),
                format!("aff{aff}"),
                format!("promo{promo}"),
                format!("src{src}"),
                format!("plan{plan}"),
                format!("reg{reg}"),
            ]
            .join("_")
        }
        ReferenceKind::Purchase => {
            let content = fields.content_id.map(|c| c.get()).unwrap_or(0);
            let ts = epoch_suffix(fields.purchased_at);
            [
                "ppv".to_string(),
                format!("ep{content}"),
                format!("uid{}", fields.account_id),
                format!("aff{aff}"),
                format!("promo{promo}"),
                format!("src{src}"),
                format!("ts{ts}"),
            ]
            .join("_")
        }
    }
}

fn code_token(value: Option<&str>, max_len: usize) -> String {
    let cleaned: String = value
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(max_len)
        .collect();
    if cleaned.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        cleaned
    }
}

fn epoch_suffix(ts: Option<u64>) -> String {
    match ts {
        Some(ts) => format!("{:08}", ts % EPOCH_SUFFIX_MODULUS),
        None => PLACEHOLDER.to_string(),
    }
}

// ── Decoding ───────────────────────────────────────────────────────────────

/// One recognised `referenceId` layout.
pub trait ReferenceMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when `raw` is not in this matcher's layout.
    fn decode(&self, raw: &str) -> Option<ReferenceData>;
}

/// Ordered list of matchers; the first one that recognises the input wins.
pub struct ReferenceDecoder {
    matchers: Vec<Box<dyn ReferenceMatcher>>,
}

impl Default for ReferenceDecoder {
    fn default() -> Self {
        Self::new(vec![
            Box::new(EnhancedPurchase),
            Box::new(legacy::LegacyPurchase),
            Box::new(EnhancedSubscription),
            Box::new(legacy::LegacyUser),
        ])
    }
}

impl ReferenceDecoder {
    pub fn new(matchers: Vec<Box<dyn ReferenceMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn decode(&self, raw: &str) -> ReferenceData {
        let raw = raw.trim();
        for matcher in &self.matchers {
            if let Some(data) = matcher.decode(raw) {
                tracing::trace!(matcher = matcher.name(), "reference decoded");
                return data;
            }
        }
        ReferenceData::default()
    }
}

static DEFAULT_DECODER: LazyLock<ReferenceDecoder> = LazyLock::new(ReferenceDecoder::default);

/// Decodes with the standard matcher order.
pub fn decode(raw: &str) -> ReferenceData {
    DEFAULT_DECODER.decode(raw)
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static reference pattern compiles")
}

static PURCHASE_HEAD: LazyLock<Regex> = LazyLock::new(|| regex(r"^ppv_ep(\d+)_uid(\d+)(?:_|$)"));
static SUBSCRIPTION_HEAD: LazyLock<Regex> = LazyLock::new(|| regex(r"^uid(\d+)(?:_|$)"));
static AFF: LazyLock<Regex> = LazyLock::new(|| regex(r"(?:^|_)aff([A-Za-z0-9]+)(?:_|$)"));
static PROMO: LazyLock<Regex> = LazyLock::new(|| regex(r"(?:^|_)promo([A-Za-z0-9]+)(?:_|$)"));
static SRC: LazyLock<Regex> = LazyLock::new(|| regex(r"(?:^|_)src([A-Za-z0-9]+)(?:_|$)"));
static PLAN: LazyLock<Regex> = LazyLock::new(|| regex(r"(?:^|_)plan(\d+|none)(?:_|$)"));
static REG: LazyLock<Regex> = LazyLock::new(|| regex(r"(?:^|_)reg(\d+|none)(?:_|$)"));
static TS: LazyLock<Regex> = LazyLock::new(|| regex(r"(?:^|_)ts(\d+|none)(?:_|$)"));

/// First capture group of `re` in `raw`, with the `none` placeholder mapped
/// to absent.
fn component(re: &Regex, raw: &str) -> Option<String> {
    re.captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|s| *s != PLACEHOLDER)
        .map(str::to_string)
}

fn numeric_component(re: &Regex, raw: &str) -> Option<u64> {
    component(re, raw).and_then(|s| s.parse().ok())
}

struct EnhancedPurchase;

impl ReferenceMatcher for EnhancedPurchase {
    fn name(&self) -> &'static str {
        "enhanced_purchase"
    }

    fn decode(&self, raw: &str) -> Option<ReferenceData> {
        let head = PURCHASE_HEAD.captures(raw)?;
        let content: u64 = head.get(1)?.as_str().parse().ok()?;
        let account: u64 = head.get(2)?.as_str().parse().ok()?;

        Some(ReferenceData {
            account_id: AccountId::new(account),
            affiliate_code: component(&AFF, raw),
            promo_code: component(&PROMO, raw),
            signup_source: component(&SRC, raw),
            plan_id: None,
            registered_at: None,
            content_id: (content != 0).then(|| ContentId::new(content)),
            purchased_at: numeric_component(&TS, raw),
        })
    }
}

struct EnhancedSubscription;

impl ReferenceMatcher for EnhancedSubscription {
    fn name(&self) -> &'static str {
        "enhanced_subscription"
    }

    fn decode(&self, raw: &str) -> Option<ReferenceData> {
        let head = SUBSCRIPTION_HEAD.captures(raw)?;
        let account: u64 = head.get(1)?.as_str().parse().ok()?;

        Some(ReferenceData {
            account_id: AccountId::new(account),
            affiliate_code: component(&AFF, raw),
            promo_code: component(&PROMO, raw),
            signup_source: component(&SRC, raw),
            plan_id: numeric_component(&PLAN, raw).map(PlanId::new),
            registered_at: numeric_component(&REG, raw),
            content_id: None,
            purchased_at: None,
        })
    }
}

/// Positional layouts issued before the enhanced encoding. Remove once no
/// legacy identifiers remain in flight at the provider.
mod legacy {
    use super::*;

    static PURCHASE: LazyLock<Regex> = LazyLock::new(|| regex(r"^ppv_(\d+)_(\d+)_(\d+)$"));
    static USER: LazyLock<Regex> = LazyLock::new(|| regex(r"^user_(\d+)(?:_|$)"));

    pub(super) struct LegacyPurchase;

    impl ReferenceMatcher for LegacyPurchase {
        fn name(&self) -> &'static str {
            "legacy_purchase"
        }

        fn decode(&self, raw: &str) -> Option<ReferenceData> {
            let caps = PURCHASE.captures(raw)?;
            let content: u64 = caps.get(1)?.as_str().parse().ok()?;
            let account: u64 = caps.get(2)?.as_str().parse().ok()?;
            let ts: u64 = caps.get(3)?.as_str().parse().ok()?;

            Some(ReferenceData {
                account_id: AccountId::new(account),
                content_id: (content != 0).then(|| ContentId::new(content)),
                purchased_at: Some(ts),
                ..ReferenceData::default()
            })
        }
    }

    pub(super) struct LegacyUser;

    impl ReferenceMatcher for LegacyUser {
        fn name(&self) -> &'static str {
            "legacy_user"
        }

        fn decode(&self, raw: &str) -> Option<ReferenceData> {
            let caps = USER.captures(raw)?;
            let account: u64 = caps.get(1)?.as_str().parse().ok()?;
            Some(ReferenceData {
                account_id: AccountId::new(account),
                ..ReferenceData::default()
            })
        }
    }
}
