use {
    crate::domain::{
        attribution::{AttributionRecord, TrackingAttribution, choose},
        error::PipelineError,
        ports::PromoLedger,
        reference::ReferenceData,
    },
    std::sync::Arc,
};

#[derive(Clone)]
pub struct AttributionResolver {
    promos: Arc<dyn PromoLedger>,
}

impl AttributionResolver {
    pub fn new(promos: Arc<dyn PromoLedger>) -> Self {
        Self { promos }
    }

    /// Resolves commission credit for a decoded reference. An unknown promo
    /// code is not an error; it simply does not attribute.
    pub async fn resolve(
        &self,
        reference: &ReferenceData,
        fallback: Option<&TrackingAttribution>,
    ) -> Result<AttributionRecord, PipelineError> {
        let promo = match reference.promo_code.as_deref() {
            Some(code) => {
                let found = self.promos.lookup_promo_code(code).await?;
                if found.is_none() {
                    tracing::debug!(promo_code = code, "promo code not found");
                }
                found
            }
            None => None,
        };

        let record = choose(promo.as_ref(), fallback);
        if !record.is_commissionable() {
            tracing::debug!(account_id = %reference.account_id, "no affiliate attribution, commission skipped");
        }
        Ok(record)
    }
}
