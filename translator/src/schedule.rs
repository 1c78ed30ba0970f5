use crate::metrics_defs::SCHEDULED_JOB_RUNS;
use crate::provider::{ProviderError, TranslationProvider, translate_text};
use shared::counter;
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior, interval};

/// Periodically translates a fixed text and logs the result.
pub struct ScheduledJob {
    provider: Arc<dyn TranslationProvider>,
    text: String,
    period: Duration,
}

impl ScheduledJob {
    pub fn new(provider: Arc<dyn TranslationProvider>, text: String, period: Duration) -> Self {
        ScheduledJob {
            provider,
            text,
            period,
        }
    }

    pub async fn run_once(&self) -> Result<String, ProviderError> {
        match translate_text(self.provider.as_ref(), &self.text).await {
            Ok(translated) => {
                counter!(SCHEDULED_JOB_RUNS, "outcome" => "success").increment(1);
                tracing::info!(
                    original = %self.text,
                    translated = %translated,
                    "scheduled translation completed"
                );
                Ok(translated)
            }
            Err(e) => {
                counter!(SCHEDULED_JOB_RUNS, "outcome" => "failure").increment(1);
                tracing::error!(original = %self.text, error = %e, "scheduled translation failed");
                Err(e)
            }
        }
    }

    /// Runs forever. The first run happens immediately; a slow run delays
    /// the next tick instead of causing a burst.
    pub async fn run(&self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            // Errors are already logged.
            let _ = self.run_once().await;
        }
    }
}
