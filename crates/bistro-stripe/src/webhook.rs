//! # Stripe Webhook Handling
//!
//! Signature verification and event parsing for Stripe webhooks.
//!
//! Stripe signs `"{timestamp}.{payload}"` with HMAC-SHA256 and sends
//! `Stripe-Signature: t=...,v1=...`. Events older than the tolerance are
//! refused to limit replay.

use bistro_core::{GatewayEvent, GatewayEventKind, OrderError, OrderResult};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verify `signature` over `payload` and parse the event.
pub fn verify_and_parse(
    secret: &str,
    payload: &[u8],
    signature: &str,
    now: DateTime<Utc>,
) -> OrderResult<GatewayEvent> {
    let header = parse_signature_header(signature)?;

    if (now.timestamp() - header.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(OrderError::Unauthorized(
            "webhook timestamp outside tolerance".to_string(),
        ));
    }

    // verify_slice compares in constant time; signatures that are not hex never match
    let mac = signed_mac(secret, header.timestamp, payload)?;
    let valid = header
        .signatures
        .iter()
        .filter_map(|sig| hex::decode(sig).ok())
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());
    if !valid {
        return Err(OrderError::Unauthorized("webhook signature mismatch".to_string()));
    }

    parse_event(payload)
}

/// Map a Stripe event body to a [`GatewayEvent`]
pub fn parse_event(payload: &[u8]) -> OrderResult<GatewayEvent> {
    let event: StripeWebhookEvent = serde_json::from_slice(payload)
        .map_err(|e| OrderError::Validation(format!("malformed webhook body: {}", e)))?;
    debug!(event_type = %event.event_type, event_id = %event.id, "parsed stripe webhook");

    let object = event.data.object;
    let paid = object.payment_status.as_deref() == Some("paid");
    let kind = match event.event_type.as_str() {
        "checkout.session.completed" => GatewayEventKind::CheckoutCompleted { paid },
        "checkout.session.async_payment_succeeded" => {
            GatewayEventKind::CheckoutCompleted { paid: true }
        }
        "checkout.session.expired" => GatewayEventKind::CheckoutExpired,
        "checkout.session.async_payment_failed" => GatewayEventKind::PaymentFailed,
        other => GatewayEventKind::Other(other.to_string()),
    };

    Ok(GatewayEvent {
        event_id: event.id,
        kind,
        provider: "stripe".to_string(),
        session_id: object.id,
        order_id: object.metadata.and_then(|m| m.order_id),
        amount_total: object.amount_total,
        timestamp: DateTime::from_timestamp(event.created, 0).unwrap_or_else(Utc::now),
    })
}

/// Build a `Stripe-Signature` header value for `payload` (used by tests and local tooling)
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> OrderResult<String> {
    Ok(format!("t={},v1={}", timestamp, compute_signature(secret, timestamp, payload)?))
}

// =============================================================================
// Stripe event types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: SessionObject,
}

#[derive(Debug, Default, Deserialize)]
struct SessionObject {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    metadata: Option<SessionMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionMetadata {
    #[serde(default)]
    order_id: Option<String>,
}

// =============================================================================
// Signature verification
// =============================================================================

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> OrderResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        OrderError::Unauthorized("missing timestamp in signature".to_string())
    })?;
    if signatures.is_empty() {
        return Err(OrderError::Unauthorized("no v1 signature found".to_string()));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// HMAC over `"{timestamp}.{payload}"`, not yet finalized
fn signed_mac(secret: &str, timestamp: i64, payload: &[u8]) -> OrderResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| OrderError::Configuration(format!("invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> OrderResult<String> {
    let mac = signed_mac(secret, timestamp, payload)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn completed_payload(payment_status: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": {
                "object": {
                    "id": "cs_test_123",
                    "payment_status": payment_status,
                    "amount_total": 2200,
                    "metadata": { "order_id": "ord-1" }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_signature_header() {
        let parsed =
            parse_signature_header("t=1234567890,v1=abc123,v1=def456,v0=old").unwrap();
        assert_eq!(parsed.timestamp, 1234567890);
        assert_eq!(parsed.signatures, vec!["abc123", "def456"]);

        assert!(parse_signature_header("v1=abc").is_err());
        assert!(parse_signature_header("t=1").is_err());
    }

    #[test]
    fn test_verify_round_trip() {
        let payload = completed_payload("paid");
        let now = Utc::now();
        let header = sign_payload(SECRET, now.timestamp(), &payload).unwrap();

        let event = verify_and_parse(SECRET, &payload, &header, now).unwrap();
        assert_eq!(event.kind, GatewayEventKind::CheckoutCompleted { paid: true });
        assert_eq!(event.order_id.as_deref(), Some("ord-1"));
        assert_eq!(event.session_id.as_deref(), Some("cs_test_123"));
        assert_eq!(event.payment_outcome(), Some(("ord-1", true)));
    }

    #[test]
    fn test_rejects_tampered_and_stale() {
        let payload = completed_payload("paid");
        let now = Utc::now();
        let header = sign_payload(SECRET, now.timestamp(), &payload).unwrap();

        let tampered = completed_payload("unpaid");
        assert!(matches!(
            verify_and_parse(SECRET, &tampered, &header, now),
            Err(OrderError::Unauthorized(_))
        ));
        assert!(verify_and_parse("whsec_other", &payload, &header, now).is_err());

        let stale = sign_payload(SECRET, now.timestamp() - 600, &payload).unwrap();
        assert!(verify_and_parse(SECRET, &payload, &stale, now).is_err());
    }

    #[test]
    fn test_event_kinds() {
        let unpaid = parse_event(&completed_payload("unpaid")).unwrap();
        assert_eq!(unpaid.kind, GatewayEventKind::CheckoutCompleted { paid: false });
        assert_eq!(unpaid.payment_outcome(), None);

        let expired = serde_json::to_vec(&json!({
            "id": "evt_2",
            "type": "checkout.session.expired",
            "created": 1_700_000_000,
            "data": { "object": { "id": "cs_2", "metadata": { "order_id": "ord-2" } } }
        }))
        .unwrap();
        let event = parse_event(&expired).unwrap();
        assert_eq!(event.payment_outcome(), Some(("ord-2", false)));

        let other = serde_json::to_vec(&json!({
            "id": "evt_3",
            "type": "customer.created",
            "created": 1_700_000_000,
            "data": { "object": { "id": "cus_1" } }
        }))
        .unwrap();
        let event = parse_event(&other).unwrap();
        assert_eq!(event.kind, GatewayEventKind::Other("customer.created".into()));
        assert_eq!(event.order_id, None);
    }

    #[test]
    fn test_signature_must_be_hex_of_full_length() {
        let payload = completed_payload("paid");
        let now = Utc::now();
        let valid = compute_signature(SECRET, now.timestamp(), &payload).unwrap();
        let t = now.timestamp();
        let mut flipped = valid.clone();
        flipped.replace_range(0..1, if valid.starts_with('0') { "1" } else { "0" });

        for bad in ["not-hex-at-all", &valid[..32], flipped.as_str()] {
            let header = format!("t={},v1={}", t, bad);
            assert!(matches!(
                verify_and_parse(SECRET, &payload, &header, now),
                Err(OrderError::Unauthorized(_))
            ));
        }

        // Any one matching v1 entry is enough
        let rotated = format!("t={},v1=zz,v1={}", t, valid);
        assert!(verify_and_parse(SECRET, &payload, &rotated, now).is_ok());
    }
}
