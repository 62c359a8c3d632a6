/// Integration tests for crypto-core JWT functionality
///
/// This test module covers:
/// - Session token issuance and stateless validation
/// - Algorithm confusion (alg=none, HS512)
/// - Forged signatures, issuer and audience policy
/// - Custom claim hardening
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, TimeZone, Utc};
use crypto_core::jwt::{ClaimValue, CustomClaims, JwtCodec, JwtError, SessionClaims, TokenKind};
use crypto_core::{Clock, ManualClock};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::sync::Arc;

const TEST_SECRET: &[u8] = b"integration-test-secret-0123456789abcdef";
const OTHER_SECRET: &[u8] = b"a-completely-different-secret-0123456789";

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ))
}

fn codec_with(secret: &[u8], clock: Arc<ManualClock>) -> JwtCodec {
    JwtCodec::new(
        secret,
        "konabra",
        vec!["konabra-web".to_string(), "konabra-app".to_string()],
        clock,
    )
    .expect("codec")
}

fn roles_claims() -> CustomClaims {
    let mut custom = CustomClaims::new();
    custom.insert("roles".to_string(), vec!["reporter"].into());
    custom.insert("email".to_string(), "user@example.com".into());
    custom
}

fn issue_access(codec: &JwtCodec, clock: &ManualClock) -> String {
    let now = clock.now();
    codec
        .issue("user-1", TokenKind::Access, now, now + Duration::minutes(15), roles_claims())
        .expect("issue")
}

fn decode_segment(token: &str) -> serde_json::Value {
    let payload = token.split('.').nth(1).expect("payload segment");
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).expect("base64url")).expect("json")
}

// ============================================================================
// Token Generation Tests
// ============================================================================

#[test]
fn test_unverified_payload_carries_claims() {
    let clock = clock();
    let codec = codec_with(TEST_SECRET, clock.clone());
    let token = issue_access(&codec, &clock);

    let payload = decode_segment(&token);
    assert_eq!(payload["sub"], "user-1");
    assert_eq!(payload["type"], "access");
    assert_eq!(payload["roles"], serde_json::json!(["reporter"]));
    assert_eq!(payload["iss"], "konabra");
    assert_eq!(payload["aud"], serde_json::json!(["konabra-web", "konabra-app"]));
    for claim in ["exp", "iat", "nbf", "jti"] {
        assert!(payload.get(claim).is_some(), "missing {claim}");
    }

    let header = jsonwebtoken::decode_header(&token).unwrap();
    assert_eq!(header.alg, Algorithm::HS256);
}

#[test]
fn test_validate_round_trips_custom_claims() {
    let clock = clock();
    let codec = codec_with(TEST_SECRET, clock.clone());
    let token = issue_access(&codec, &clock);

    let claims = codec.validate(&token, TokenKind::Access).expect("valid");
    assert_eq!(claims.roles(), vec!["reporter"]);
    assert_eq!(
        claims.claim("email"),
        Some(&ClaimValue::Text("user@example.com".to_string()))
    );
}

// ============================================================================
// Token Validation Tests
// ============================================================================

#[test]
fn test_forged_with_other_key_rejected() {
    let clock = clock();
    let codec = codec_with(TEST_SECRET, clock.clone());
    let forger = codec_with(OTHER_SECRET, clock.clone());

    let forged = issue_access(&forger, &clock);
    assert!(matches!(
        codec.validate(&forged, TokenKind::Access),
        Err(JwtError::Invalid)
    ));
}

#[test]
fn test_other_algorithms_rejected() {
    let clock = clock();
    let codec = codec_with(TEST_SECRET, clock.clone());
    let token = issue_access(&codec, &clock);
    let claims = codec.validate(&token, TokenKind::Access).unwrap();

    let hs512 = encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET),
    )
    .unwrap();
    assert!(matches!(
        codec.validate(&hs512, TokenKind::Access),
        Err(JwtError::Invalid)
    ));

    // Hand-rolled unsigned token
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    let unsigned = format!("{header}.{body}.");
    assert!(matches!(
        codec.validate(&unsigned, TokenKind::Access),
        Err(JwtError::Invalid)
    ));
}

#[test]
fn test_issuer_and_audience_policy() {
    let clock = clock();
    let codec = codec_with(TEST_SECRET, clock.clone());
    let token = issue_access(&codec, &clock);
    let claims = codec.validate(&token, TokenKind::Access).unwrap();

    let wrong_issuer = SessionClaims {
        iss: "someone-else".to_string(),
        ..claims.clone()
    };
    let wrong_audience = SessionClaims {
        aud: vec!["other-app".to_string()],
        ..claims.clone()
    };

    for claims in [wrong_issuer, wrong_audience] {
        let token = codec.sign(&claims).unwrap();
        assert!(matches!(
            codec.validate(&token, TokenKind::Access),
            Err(JwtError::Invalid)
        ));
    }
}

#[test]
fn test_structured_custom_claim_rejected_at_decode() {
    let clock = clock();
    let codec = codec_with(TEST_SECRET, clock.clone());
    let token = issue_access(&codec, &clock);
    let mut payload = decode_segment(&token);
    payload["profile"] = serde_json::json!({"admin": true});

    let injected = encode(
        &Header::new(Algorithm::HS256),
        &payload,
        &EncodingKey::from_secret(TEST_SECRET),
    )
    .unwrap();
    assert!(matches!(
        codec.validate(&injected, TokenKind::Access),
        Err(JwtError::Invalid)
    ));
}

#[test]
fn test_missing_time_claim_rejected() {
    let clock = clock();
    let codec = codec_with(TEST_SECRET, clock.clone());
    let token = issue_access(&codec, &clock);
    let mut payload = decode_segment(&token);
    payload.as_object_mut().unwrap().remove("nbf");

    let stripped = encode(
        &Header::new(Algorithm::HS256),
        &payload,
        &EncodingKey::from_secret(TEST_SECRET),
    )
    .unwrap();
    assert!(codec.validate(&stripped, TokenKind::Access).is_err());
}

#[test]
fn test_not_yet_valid_rejected() {
    let clock = clock();
    let codec = codec_with(TEST_SECRET, clock.clone());
    let now = clock.now();
    let token = codec
        .issue(
            "user-1",
            TokenKind::Access,
            now + Duration::minutes(5),
            now + Duration::minutes(20),
            CustomClaims::new(),
        )
        .unwrap();

    assert!(codec.validate(&token, TokenKind::Access).is_err());
    clock.advance(Duration::minutes(6));
    assert!(codec.validate(&token, TokenKind::Access).is_ok());
}

#[test]
fn test_tampered_and_malformed_tokens() {
    let clock = clock();
    let codec = codec_with(TEST_SECRET, clock.clone());
    let token = issue_access(&codec, &clock);

    let tampered = token.replace('a', "b");
    assert!(codec.validate(&tampered, TokenKind::Access).is_err());
    assert!(codec.validate("invalid.token.here", TokenKind::Access).is_err());
    assert!(codec.validate("", TokenKind::Access).is_err());
}
