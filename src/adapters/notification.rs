use {
    crate::domain::{
        account::EventSummary,
        error::PipelineError,
        ports::{BoxFuture, NotificationSink},
    },
    reqwest::Client,
    serde::Serialize,
    std::time::Duration,
};

/// Used when no chat webhook is configured.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify<'a>(&'a self, summary: &'a EventSummary) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(account_id = %summary.account_id, event = %summary.event, "{summary}");
            Ok(())
        })
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    text: String,
    event: &'a EventSummary,
}

/// Posts a one-line summary to an incoming-webhook chat endpoint.
pub struct HttpSink {
    client: Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::Config(format!("notification http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, summary: &EventSummary) -> Result<(), PipelineError> {
        let message = ChatMessage {
            text: summary.to_string(),
            event: summary,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&message)
            .send()
            .await
            .map_err(|e| PipelineError::downstream("notification", e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::downstream(
                "notification",
                format!("chat webhook returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

impl NotificationSink for HttpSink {
    fn notify<'a>(&'a self, summary: &'a EventSummary) -> BoxFuture<'a, ()> {
        Box::pin(self.post(summary))
    }
}
