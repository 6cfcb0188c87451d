use {
    super::{
        error::PipelineError,
        id::{AccountId, AffiliateId, PlanId, PromoCodeId, TransactionId},
        money::Money,
    },
    chrono::{DateTime, Utc},
    derive_more::Display,
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// Who gets commission credit for a transaction. Commission is recorded only
/// when `affiliate_id` is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub affiliate_id: Option<AffiliateId>,
    /// Promo code credited on the commission; may come from the cookie.
    pub promo_code_id: Option<PromoCodeId>,
    pub click_id: Option<String>,
    /// Known promo code the buyer entered, decoded from the reference. Only
    /// this one counts as a use of the code.
    pub redeemed_promo_code_id: Option<PromoCodeId>,
}

impl AttributionRecord {
    pub fn is_commissionable(&self) -> bool {
        self.affiliate_id.is_some()
    }
}

/// Attribution captured from the tracking cookie at signup and stored on the
/// account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingAttribution {
    pub affiliate_id: AffiliateId,
    pub promo_code_id: Option<PromoCodeId>,
    pub click_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoCode {
    pub id: PromoCodeId,
    pub code: String,
    pub affiliate_id: Option<AffiliateId>,
}

/// Precedence: a known promo code naming an affiliate, then the tracking
/// cookie, then nothing. A known promo code without an affiliate is kept for
/// usage counting even when nothing else attributes the sale.
pub fn choose(promo: Option<&PromoCode>, cookie: Option<&TrackingAttribution>) -> AttributionRecord {
    let redeemed = promo.map(|p| p.id);

    if let Some(p) = promo {
        if let Some(affiliate_id) = p.affiliate_id {
            return AttributionRecord {
                affiliate_id: Some(affiliate_id),
                promo_code_id: Some(p.id),
                click_id: None,
                redeemed_promo_code_id: redeemed,
            };
        }
    }

    if let Some(c) = cookie {
        return AttributionRecord {
            affiliate_id: Some(c.affiliate_id),
            promo_code_id: c.promo_code_id.or(redeemed),
            click_id: c.click_id.clone(),
            redeemed_promo_code_id: redeemed,
        };
    }

    AttributionRecord {
        promo_code_id: redeemed,
        redeemed_promo_code_id: redeemed,
        ..AttributionRecord::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum CommissionKind {
    #[display("signup")]
    Signup,
    #[display("rebill")]
    Rebill,
    #[display("ppv")]
    Ppv,
}

impl CommissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Rebill => "rebill",
            Self::Ppv => "ppv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    #[display("pending")]
    Pending,
    #[display("approved")]
    Approved,
    #[display("void")]
    Void,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Void => "void",
        }
    }
}

impl TryFrom<&str> for CommissionStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "void" => Ok(Self::Void),
            other => Err(PipelineError::Validation(format!(
                "unknown commission status: {other}"
            ))),
        }
    }
}

/// Commission ready to be written to the affiliate ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommission {
    pub id: Uuid,
    pub affiliate_id: AffiliateId,
    pub account_id: AccountId,
    pub kind: CommissionKind,
    pub transaction_id: TransactionId,
    pub plan_id: Option<PlanId>,
    pub sale: Money,
    pub amount: Money,
    pub promo_code_id: Option<PromoCodeId>,
    pub click_id: Option<String>,
}

/// Commission awaiting the hold period before auto-approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommission {
    pub id: Uuid,
    pub affiliate_id: AffiliateId,
    pub account_id: AccountId,
    pub transaction_id: TransactionId,
    pub created_at: DateTime<Utc>,
}
