//! Gateway shared state.

use std::sync::Arc;

use speechlink_core::config::Config;
use speechlink_core::error::Result;
use speechlink_media::SpeechPipeline;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub pipeline: Arc<SpeechPipeline>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    /// Build the pipeline (provider priority lists, credential resolver)
    /// from `config`.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let pipeline = Arc::new(SpeechPipeline::from_config(Arc::clone(&config))?);
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: Arc<Config>, pipeline: Arc<SpeechPipeline>) -> Self {
        Self {
            config,
            pipeline,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
