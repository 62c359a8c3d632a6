use chrono::{Duration, TimeZone, Utc};
use crypto_core::protector::Metadata;
use crypto_core::{CodeKind, ManualClock};
use identity_service::config::{
    DatabaseSettings, EphemeralSettings, JwtSettings, ProtectorSettings, Settings,
};
use identity_service::db::{InMemorySessionStore, SessionStore};
use identity_service::context::CHALLENGE_EXPIRY_GRACE;
use identity_service::{IdentityContext, IdentityError};
use std::sync::Arc;

fn settings() -> Settings {
    Settings {
        database: DatabaseSettings {
            url: "postgres://unused".to_string(),
            max_connections: 1,
        },
        jwt: JwtSettings {
            secret: "konabra-verification-flow-secret-0001".to_string(),
            issuer: "konabra".to_string(),
            audience: vec!["konabra".to_string()],
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 2_592_000,
        },
        protector: ProtectorSettings {
            master_key: (0u8..64).collect(),
        },
        ephemeral: EphemeralSettings {
            sweep_interval_secs: 0,
        },
    }
}

fn context() -> (IdentityContext, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 10, 14, 0, 0).single().unwrap(),
    ));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let ctx = IdentityContext::with_clock(settings(), store, clock.clone()).unwrap();
    (ctx, clock)
}

#[tokio::test]
async fn numeric_code_challenge_round_trip() {
    let (ctx, clock) = context();

    let mut metadata = Metadata::new();
    metadata.insert("channel".to_string(), "sms".to_string());
    let issued = ctx
        .start_code_challenge("user-1", "verify", CodeKind::Numeric, 6, Duration::minutes(10), metadata)
        .unwrap();
    assert_eq!(issued.code.len(), 6);
    assert!(issued.code.chars().all(|c| c.is_ascii_digit()));

    clock.advance(Duration::minutes(1));

    // A wrong guess leaves the challenge pending.
    let wrong = if issued.code == "000000" { "111111" } else { "000000" };
    assert!(matches!(
        ctx.complete_code_challenge("user-1", "verify", wrong),
        Err(IdentityError::InvalidToken)
    ));

    let verified = ctx
        .complete_code_challenge("user-1", "verify", &issued.code)
        .unwrap();
    assert_eq!(verified.metadata.get("purpose").map(String::as_str), Some("verify"));
    assert_eq!(verified.metadata.get("channel").map(String::as_str), Some("sms"));

    // Single use.
    assert!(ctx
        .complete_code_challenge("user-1", "verify", &issued.code)
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn expired_code_is_reported_as_expired() {
    let (ctx, clock) = context();
    let issued = ctx
        .start_code_challenge(
            "user-1",
            "reset-password",
            CodeKind::Alphanumeric,
            8,
            Duration::minutes(10),
            Metadata::new(),
        )
        .unwrap();

    // The envelope and the pending challenge age together.
    clock.advance(Duration::minutes(11));
    tokio::time::advance(std::time::Duration::from_secs(11 * 60)).await;

    let err = ctx
        .complete_code_challenge("user-1", "reset-password", &issued.code)
        .unwrap_err();
    assert!(err.is_expired());
    assert_eq!(err.public_message(), "The token or code has expired.");

    // Once the grace period lapses the challenge is gone altogether.
    clock.advance(Duration::minutes(10));
    tokio::time::advance(CHALLENGE_EXPIRY_GRACE).await;
    assert!(matches!(
        ctx.complete_code_challenge("user-1", "reset-password", &issued.code),
        Err(IdentityError::InvalidToken)
    ));
}

#[tokio::test]
async fn out_of_range_challenge_ttl_is_a_validation_error() {
    let (ctx, _clock) = context();
    let result = ctx.start_code_challenge(
        "user-1",
        "verify",
        CodeKind::Numeric,
        6,
        Duration::days(365 * 300_000),
        Metadata::new(),
    );
    assert!(matches!(result, Err(IdentityError::Validation(_))));
}

#[tokio::test]
async fn new_challenge_supersedes_previous_one() {
    let (ctx, _clock) = context();
    let first = ctx
        .start_code_challenge("user-1", "verify", CodeKind::Numeric, 6, Duration::minutes(10), Metadata::new())
        .unwrap();
    let second = ctx
        .start_code_challenge("user-1", "verify", CodeKind::Numeric, 6, Duration::minutes(10), Metadata::new())
        .unwrap();

    if first.code != second.code {
        assert!(ctx
            .complete_code_challenge("user-1", "verify", &first.code)
            .is_err());
    }
    assert!(ctx
        .complete_code_challenge("user-1", "verify", &second.code)
        .is_ok());
}

#[tokio::test]
async fn challenges_are_scoped_by_subject_and_purpose() {
    let (ctx, _clock) = context();
    let issued = ctx
        .start_code_challenge("user-1", "verify", CodeKind::Numeric, 6, Duration::minutes(10), Metadata::new())
        .unwrap();

    assert!(ctx
        .complete_code_challenge("user-2", "verify", &issued.code)
        .is_err());
    assert!(ctx
        .complete_code_challenge("user-1", "reset-password", &issued.code)
        .is_err());
    assert!(ctx
        .complete_code_challenge("user-1", "verify", &issued.code)
        .is_ok());
}

#[tokio::test]
async fn invalid_code_length_is_a_validation_error() {
    let (ctx, _clock) = context();
    let result = ctx.start_code_challenge(
        "user-1",
        "verify",
        CodeKind::Numeric,
        2,
        Duration::minutes(10),
        Metadata::new(),
    );
    assert!(matches!(result, Err(IdentityError::Validation(_))));
}

#[tokio::test]
async fn context_wires_session_tokens() {
    let (ctx, _clock) = context();
    let pair = ctx
        .sessions
        .create_token("user-1", Default::default())
        .await
        .unwrap();
    assert!(ctx.sessions.verify_access_token(&pair.access_token).await.is_ok());
}

#[test]
fn undersized_master_key_is_rejected() {
    let mut bad = settings();
    bad.protector.master_key = vec![1u8; 32];
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

    assert!(IdentityContext::new(bad, store).is_err());
}
