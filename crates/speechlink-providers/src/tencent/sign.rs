//! Request signing shared by the ASR and TTS WebSocket endpoints.
//!
//! Both endpoints sign `<prefix><host><path>?<sorted query>` with
//! HMAC-SHA1 keyed by the secret key and pass the base64 digest as the
//! `signature` / `Signature` query parameter.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use speechlink_core::error::{Result, SpeechError};

type HmacSha1 = Hmac<Sha1>;

/// Join parameters as `k=v&k=v` in key order, optionally URL-encoding values.
pub(crate) fn canonical_query(params: &BTreeMap<&str, String>, encode: bool) -> String {
    params
        .iter()
        .map(|(k, v)| {
            if encode {
                format!("{k}={}", urlencoding::encode(v))
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Base64 HMAC-SHA1 of `message` keyed by `secret_key`.
pub(crate) fn sign(secret_key: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret_key.as_bytes())
        .map_err(|e| SpeechError::Config(format!("invalid secret key: {e}")))?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Seconds since the epoch, as the endpoints expect.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_query_is_sorted() {
        let mut params = BTreeMap::new();
        params.insert("timestamp", "10".to_string());
        params.insert("engine_model_type", "16k_zh".to_string());
        params.insert("nonce", "a b".to_string());
        assert_eq!(
            canonical_query(&params, false),
            "engine_model_type=16k_zh&nonce=a b&timestamp=10"
        );
        assert_eq!(
            canonical_query(&params, true),
            "engine_model_type=16k_zh&nonce=a%20b&timestamp=10"
        );
    }

    #[test]
    fn test_sign_known_vector() {
        // RFC 2202 test case 2
        let sig = sign("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(sig, "7/zfauXrL6LSdBbV8YTfnCWafHk=");
    }
}
