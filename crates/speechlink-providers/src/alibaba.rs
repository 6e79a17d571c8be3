//! Alibaba Cloud speech. Not yet implemented: both directions fail fast so
//! failover moves on without a network round trip.

use std::sync::Arc;

use async_trait::async_trait;

use speechlink_core::credentials::{AsrCredentials, TtsCredentials};
use speechlink_core::error::{Result, SpeechError};
use speechlink_core::types::ProviderId;

use crate::{AsrProvider, AsrStream, RecognitionParams, RecognitionSender, Synthesizer, TtsProvider};

pub struct AlibabaAsr;

#[async_trait]
impl AsrProvider for AlibabaAsr {
    fn id(&self) -> ProviderId {
        ProviderId::Alibaba
    }

    fn implemented(&self) -> bool {
        false
    }

    async fn open(
        &self,
        _credentials: &AsrCredentials,
        _params: &RecognitionParams,
        _events: RecognitionSender,
    ) -> Result<Box<dyn AsrStream>> {
        Err(SpeechError::Provider(
            "alibaba speech recognition is not yet implemented".into(),
        ))
    }
}

pub struct AlibabaTts;

#[async_trait]
impl TtsProvider for AlibabaTts {
    fn id(&self) -> ProviderId {
        ProviderId::Alibaba
    }

    fn implemented(&self) -> bool {
        false
    }

    async fn connect(&self, _credentials: &TtsCredentials) -> Result<Arc<dyn Synthesizer>> {
        Err(SpeechError::Provider(
            "alibaba speech synthesis is not yet implemented".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fails_fast() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            AlibabaAsr.open(&AsrCredentials::default(), &RecognitionParams::default(), tx),
        )
        .await
        .expect("must not hang");
        assert!(matches!(result, Err(SpeechError::Provider(_))));

        let result = AlibabaTts.connect(&TtsCredentials::default()).await;
        assert!(matches!(result, Err(SpeechError::Provider(_))));
    }
}
