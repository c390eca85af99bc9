//! Webhook 签名
//!
//! 头部格式：
//!
//! ```text
//! X-Webhook-Signature: {unix_timestamp}.{base64_signature}
//! ```
//!
//! 签名内容为 `HMAC-SHA256("{timestamp}.{json_body}", secret)`，base64 不带填充。
//!
use chrono::Utc;
use ring::hmac;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_ID_HEADER: &str = "X-Event-Id";
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";

/// 签名时间戳与当前时间允许的最大偏差（秒），过去与未来两个方向都适用
pub const MAX_SIGNATURE_AGE_SECS: i64 = 5 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
    #[error("signature timestamp is in the future")]
    NotYetValid,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

fn key(secret: &[u8]) -> hmac::Key {
    hmac::Key::new(hmac::HMAC_SHA256, secret)
}

/// 生成签名头的值
pub fn sign_payload(body: &str, secret: &[u8], timestamp: i64) -> String {
    let data = format!("{timestamp}.{body}");
    let tag = hmac::sign(&key(secret), data.as_bytes());
    format!(
        "{timestamp}.{}",
        fast32::base64::RFC4648_NOPAD.encode(tag.as_ref())
    )
}

/// 接收方校验：签名匹配，且时间戳落在当前时间前后的允许窗口内
pub fn verify_signature(header: &str, body: &str, secret: &[u8]) -> Result<(), SignatureError> {
    verify_signature_at(header, body, secret, Utc::now().timestamp())
}

/// 以指定的当前时间校验
pub fn verify_signature_at(
    header: &str,
    body: &str,
    secret: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let (timestamp, signature) = header
        .split_once('.')
        .ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidFormat)?;
    let signature = fast32::base64::RFC4648_NOPAD
        .decode_str(signature)
        .map_err(|_| SignatureError::InvalidBase64)?;

    let data = format!("{timestamp}.{body}");
    hmac::verify(&key(secret), data.as_bytes(), &signature)?;

    if now.saturating_sub(timestamp) > MAX_SIGNATURE_AGE_SECS {
        return Err(SignatureError::Expired);
    }
    if timestamp.saturating_sub(now) > MAX_SIGNATURE_AGE_SECS {
        return Err(SignatureError::NotYetValid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"eventId":"e-1","eventType":"TaskCreated"}"#;

    #[test]
    fn signed_payload_verifies() {
        let now = Utc::now().timestamp();
        let header = sign_payload(BODY, b"s3cret", now);
        assert!(header.starts_with(&format!("{now}.")));
        assert_eq!(verify_signature(&header, BODY, b"s3cret"), Ok(()));
    }

    #[test]
    fn tampering_is_detected() {
        let now = Utc::now().timestamp();
        let header = sign_payload(BODY, b"s3cret", now);

        assert_eq!(
            verify_signature(&header, BODY, b"other"),
            Err(SignatureError::SignatureMismatch)
        );
        assert_eq!(
            verify_signature(&header, r#"{"eventId":"e-2"}"#, b"s3cret"),
            Err(SignatureError::SignatureMismatch)
        );
    }

    #[test]
    fn stale_and_malformed_headers_are_rejected() {
        let header = sign_payload(BODY, b"k", 1_000);
        assert_eq!(
            verify_signature_at(&header, BODY, b"k", 1_000 + MAX_SIGNATURE_AGE_SECS + 1),
            Err(SignatureError::Expired)
        );
        assert_eq!(
            verify_signature_at(&header, BODY, b"k", 1_010),
            Ok(())
        );
        assert_eq!(
            verify_signature_at(&header, BODY, b"k", 1_000 - MAX_SIGNATURE_AGE_SECS),
            Ok(())
        );
        assert_eq!(
            verify_signature("nodot", BODY, b"k"),
            Err(SignatureError::InvalidFormat)
        );
        assert_eq!(
            verify_signature("abc.def", BODY, b"k"),
            Err(SignatureError::InvalidFormat)
        );
        assert_eq!(
            verify_signature("1.***", BODY, b"k"),
            Err(SignatureError::InvalidBase64)
        );
    }

    #[test]
    fn far_future_timestamps_are_rejected() {
        let now = 1_700_000_000;
        let header = sign_payload(BODY, b"k", now + MAX_SIGNATURE_AGE_SECS + 1);
        assert_eq!(
            verify_signature_at(&header, BODY, b"k", now),
            Err(SignatureError::NotYetValid)
        );

        let header = sign_payload(BODY, b"k", i64::MAX);
        assert_eq!(
            verify_signature_at(&header, BODY, b"k", now),
            Err(SignatureError::NotYetValid)
        );

        // 少量时钟偏差仍可接受
        let header = sign_payload(BODY, b"k", now + 30);
        assert_eq!(verify_signature_at(&header, BODY, b"k", now), Ok(()));
    }
}
