use {
    crate::{
        config::ProviderConfig,
        domain::{
            error::PipelineError,
            id::SubscriberId,
            ports::{BoxFuture, CancelOutcome, ProviderClient},
        },
    },
    reqwest::{Client, StatusCode, Url},
    std::time::Duration,
};

/// Provider REST API. Only the cancellation endpoint is needed here.
pub struct HttpProviderClient {
    client: Client,
    api_url: Url,
    api_key: String,
}

impl HttpProviderClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| PipelineError::Config(format!("provider http client: {e}")))?;

        let api_url = Url::parse(&config.api_url)
            .map_err(|e| PipelineError::Config(format!("PROVIDER_API_URL: {e}")))?;
        if api_url.cannot_be_a_base() {
            return Err(PipelineError::Config(format!(
                "PROVIDER_API_URL: {api_url} cannot carry a path"
            )));
        }

        Ok(Self {
            client,
            api_url,
            api_key: config.api_key.clone(),
        })
    }

    /// Sale ids are provider-chosen text, so each one goes in as a single
    /// percent-encoded path segment.
    fn cancel_url(&self, subscriber_id: &SubscriberId) -> Result<Url, PipelineError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| PipelineError::Config("PROVIDER_API_URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["subscriptions", subscriber_id.as_str(), "cancel"]);
        Ok(url)
    }

    async fn cancel(&self, subscriber_id: &SubscriberId) -> Result<CancelOutcome, PipelineError> {
        let url = self.cancel_url(subscriber_id)?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("cancel request failed: {e}")))?;

        match response.status() {
            s if s.is_success() => Ok(CancelOutcome::Cancelled),
            // Already cancelled (or refunded) subscriptions answer 409.
            StatusCode::CONFLICT => Ok(CancelOutcome::AlreadyCancelled),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(PipelineError::Provider(format!(
                    "cancel {subscriber_id} returned {s}: {body}"
                )))
            }
        }
    }
}

impl ProviderClient for HttpProviderClient {
    fn cancel_subscription<'a>(
        &'a self,
        subscriber_id: &'a SubscriberId,
    ) -> BoxFuture<'a, CancelOutcome> {
        Box::pin(self.cancel(subscriber_id))
    }
}
