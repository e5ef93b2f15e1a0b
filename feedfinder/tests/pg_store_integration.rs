//! Integration tests for the PostgreSQL stores.
//!
//! These run only when `DATABASE_URL` points at a reachable database; the
//! schema is applied on each run and every test works on its own users.

use std::sync::Arc;

use chrono::{Duration, Utc};
use feedfinder::auth::{
    AuthError, AuthManager, ChallengeStore, ClientContext, LoginOutcome, LoginRequest, NewSession,
    NewUser, PendingChallenge, RegisterRequest, UserUpdate,
};
use feedfinder::db::{
    Database, DatabaseConfig, PgChallengeStore, PgCsrfStore, PgSessionStore, PgUserRepository,
    UserRepository,
};
use feedfinder::security::{CsrfProtection, CsrfStore, CsrfToken};
use feedfinder::session::{SessionManager, SessionStore, TokenCodec};
use sqlx::PgPool;

/// Generate a unique name per test run
fn unique(prefix: &str) -> String {
    format!(
        "{}_{}",
        prefix,
        Utc::now().timestamp_nanos_opt().unwrap_or_default() % 1_000_000_000_000
    )
}

/// Helper to create a migrated test pool, or `None` when no database is configured
async fn setup_test_db() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };

    let config = DatabaseConfig {
        max_connections: 5,
        min_connections: 1,
        connection_timeout_secs: 5,
        ..DatabaseConfig::new(database_url)
    };

    let db = Database::new(&config)
        .await
        .expect("Failed to create test database");
    db.migrate().await.expect("Failed to apply schema");
    Some(db.pool().clone())
}

/// Helper to cleanup test user; sessions and challenges cascade
async fn cleanup_user(pool: &PgPool, username: &str) {
    let _ = sqlx::query("DELETE FROM users WHERE username = $1")
        .bind(username)
        .execute(pool)
        .await;
}

fn new_user(username: &str) -> NewUser {
    NewUser {
        username: username.to_string(),
        email: format!("{username}@example.com"),
        password_hash: "$argon2id$placeholder".to_string(),
        bio: String::new(),
        is_private: false,
    }
}

fn new_session(session_id: &str, user_id: i64, username: &str, age: Duration) -> NewSession {
    let created_at = Utc::now() - age;
    NewSession {
        session_id: session_id.to_string(),
        user_id,
        username: username.to_string(),
        ip_address: "192.0.2.1".to_string(),
        user_agent: "pg-test".to_string(),
        fingerprint: "0123456789abcdef".to_string(),
        created_at,
        expires_at: created_at + Duration::hours(24),
    }
}

#[tokio::test]
async fn test_user_uniqueness() {
    let Some(pool) = setup_test_db().await else {
        return;
    };
    let users = PgUserRepository::new(pool.clone());
    let username = unique("pg_unique");
    cleanup_user(&pool, &username).await;

    let user = users.create_user(&new_user(&username)).await.unwrap();
    assert_eq!(user.username, username);
    assert_eq!(user.email.as_deref(), Some(format!("{username}@example.com").as_str()));

    let same_name = NewUser {
        email: format!("other_{username}@example.com"),
        ..new_user(&username)
    };
    assert!(matches!(
        users.create_user(&same_name).await,
        Err(AuthError::UsernameTaken)
    ));

    let same_email = NewUser {
        username: format!("{username}_2"),
        ..new_user(&username)
    };
    assert!(matches!(
        users.create_user(&same_email).await,
        Err(AuthError::EmailTaken)
    ));

    users
        .update_user(
            user.id,
            &UserUpdate {
                bio: Some("updated".to_string()),
                ..UserUpdate::default()
            },
        )
        .await
        .unwrap();
    users.touch_last_login(user.id).await.unwrap();

    let stored = users.find_by_id(user.id).await.unwrap().unwrap();
    assert_eq!(stored.bio, "updated");
    assert!(stored.last_login.is_some());
    assert!(users.find_by_email(&format!("{username}@example.com")).await.unwrap().is_some());

    cleanup_user(&pool, &username).await;
}

#[tokio::test]
async fn test_session_lifecycle() {
    let Some(pool) = setup_test_db().await else {
        return;
    };
    let users = PgUserRepository::new(pool.clone());
    let sessions = PgSessionStore::new(pool.clone());
    let username = unique("pg_sess");
    cleanup_user(&pool, &username).await;
    let user = users.create_user(&new_user(&username)).await.unwrap();

    let older = unique("older");
    let newer = unique("newer");
    sessions
        .create(&new_session(&older, user.id, &username, Duration::hours(2)))
        .await
        .unwrap();
    sessions
        .create(&new_session(&newer, user.id, &username, Duration::minutes(1)))
        .await
        .unwrap();

    assert!(matches!(
        sessions
            .create(&new_session(&newer, user.id, &username, Duration::zero()))
            .await,
        Err(AuthError::SessionConflict)
    ));

    assert!(sessions.is_valid(&newer, user.id).await.unwrap());
    assert!(!sessions.is_valid(&newer, user.id + 1).await.unwrap());

    let active = sessions.list_active(user.id).await.unwrap();
    let ids: Vec<_> = active.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec![newer.as_str(), older.as_str()]);

    let before = sessions.find(&older).await.unwrap().unwrap();
    sessions.touch(&older).await.unwrap();
    let after = sessions.find(&older).await.unwrap().unwrap();
    assert!(after.last_accessed >= before.last_accessed);
    assert_eq!(after.expires_at, before.expires_at);

    sessions.invalidate(&older).await.unwrap();
    assert!(!sessions.is_valid(&older, user.id).await.unwrap());
    // A concurrent sweep may already have deleted the row
    let revoked = sessions.find(&older).await.unwrap();
    assert!(revoked.is_none_or(|s| !s.is_active));

    assert_eq!(sessions.invalidate_all(user.id).await.unwrap(), 1);
    assert!(sessions.list_active(user.id).await.unwrap().is_empty());

    cleanup_user(&pool, &username).await;
}

#[tokio::test]
async fn test_sweep_removes_expired_rows() {
    let Some(pool) = setup_test_db().await else {
        return;
    };
    let users = PgUserRepository::new(pool.clone());
    let sessions = PgSessionStore::new(pool.clone());
    let username = unique("pg_sweep");
    cleanup_user(&pool, &username).await;
    let user = users.create_user(&new_user(&username)).await.unwrap();

    let expired = unique("expired");
    let live = unique("live");
    sessions
        .create(&new_session(&expired, user.id, &username, Duration::hours(48)))
        .await
        .unwrap();
    sessions
        .create(&new_session(&live, user.id, &username, Duration::zero()))
        .await
        .unwrap();
    assert!(!sessions.is_valid(&expired, user.id).await.unwrap());

    sessions.sweep().await.unwrap();
    assert!(sessions.find(&expired).await.unwrap().is_none());
    assert!(sessions.find(&live).await.unwrap().is_some());
    sessions.health_check().await.unwrap();

    cleanup_user(&pool, &username).await;
}

#[tokio::test]
async fn test_challenge_store() {
    let Some(pool) = setup_test_db().await else {
        return;
    };
    let users = PgUserRepository::new(pool.clone());
    let challenges = PgChallengeStore::new(pool.clone());
    let username = unique("pg_2fa");
    cleanup_user(&pool, &username).await;
    let user = users.create_user(&new_user(&username)).await.unwrap();

    let stale = PendingChallenge {
        challenge_id: unique("stale"),
        user_id: user.id,
        email: format!("{username}@example.com"),
        code: "123456".to_string(),
        issued_at: Utc::now() - Duration::minutes(30),
        attempts: 0,
    };
    let fresh = PendingChallenge {
        challenge_id: unique("fresh"),
        issued_at: Utc::now(),
        ..stale.clone()
    };
    challenges.insert(&stale).await.unwrap();
    challenges.insert(&fresh).await.unwrap();

    let id = fresh.challenge_id.as_str();
    assert_eq!(challenges.reserve_attempt(id, 2).await.unwrap(), Some(1));
    assert_eq!(challenges.reserve_attempt(id, 2).await.unwrap(), Some(2));
    // Exhausted: the counter stops and nothing comes back
    assert_eq!(challenges.reserve_attempt(id, 2).await.unwrap(), None);
    let found = challenges.find(&fresh.challenge_id).await.unwrap().unwrap();
    assert_eq!(found.code, "123456");
    assert_eq!(found.attempts, 2);

    challenges
        .delete_issued_before(Utc::now() - Duration::minutes(5))
        .await
        .unwrap();
    assert!(challenges.find(&stale.challenge_id).await.unwrap().is_none());

    assert!(challenges.delete(&fresh.challenge_id).await.unwrap());
    assert!(!challenges.delete(&fresh.challenge_id).await.unwrap());
    assert!(challenges.find(&fresh.challenge_id).await.unwrap().is_none());
    assert_eq!(
        challenges.reserve_attempt(&fresh.challenge_id, 5).await.unwrap(),
        None
    );

    cleanup_user(&pool, &username).await;
}

#[tokio::test]
async fn test_csrf_tokens_shared_between_instances() {
    let Some(pool) = setup_test_db().await else {
        return;
    };
    // Two protections over separate store handles stand in for two server processes
    let issuing = CsrfProtection::new(Arc::new(PgCsrfStore::new(pool.clone())));
    let checking = CsrfProtection::new(Arc::new(PgCsrfStore::new(pool.clone())));
    let key = unique("csrf_key");

    let token = issuing.generate(&key).await.unwrap();
    assert_eq!(checking.generate(&key).await.unwrap(), token);
    assert!(checking.validate(&key, &token).await.unwrap());
    assert!(!checking.validate(&key, "forged").await.unwrap());

    checking.revoke(&key).await.unwrap();
    assert!(!issuing.validate(&key, &token).await.unwrap());

    let store = PgCsrfStore::new(pool.clone());
    let stale_key = unique("csrf_stale");
    store
        .put(
            &stale_key,
            CsrfToken {
                value: "stale".to_string(),
                expires_at: Utc::now() - Duration::minutes(1),
            },
        )
        .await
        .unwrap();
    assert!(store.remove_expired(Utc::now()).await.unwrap() >= 1);
    assert!(store.get(&stale_key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_auth_flow_against_postgres() {
    let Some(pool) = setup_test_db().await else {
        return;
    };
    let users = Arc::new(PgUserRepository::new(pool.clone()));
    let sessions = SessionManager::new(
        TokenCodec::new("pg_integration_secret_with_enough_length"),
        Arc::new(PgSessionStore::new(pool.clone())),
        users.clone(),
    );
    let auth = AuthManager::new(users, sessions, None);
    let username = unique("pg_flow");
    cleanup_user(&pool, &username).await;
    let client = ClientContext::new("203.0.113.5", "pg-flow");

    let (user, tokens) = auth
        .register(
            RegisterRequest {
                username: username.clone(),
                email: format!("{username}@example.com"),
                password: "SecurePass123".to_string(),
                confirm_password: "SecurePass123".to_string(),
                bio: String::new(),
                private: false,
            },
            &client,
        )
        .await
        .expect("Registration should succeed");

    let claims = auth
        .sessions()
        .verify_access(&tokens.access_token, &client)
        .await
        .unwrap();
    assert_eq!(claims.user_id, user.id);

    let other = ClientContext::new("203.0.113.6", "other-device");
    assert!(matches!(
        auth.sessions().verify_access(&tokens.access_token, &other).await,
        Err(AuthError::FingerprintMismatch)
    ));

    let outcome = auth
        .login(
            LoginRequest {
                username: username.clone(),
                password: "SecurePass123".to_string(),
            },
            &other,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Authenticated { .. }));
    assert_eq!(auth.sessions().active_sessions(user.id).await.unwrap().len(), 2);

    auth.logout(&tokens.session_id).await.unwrap();
    assert!(matches!(
        auth.sessions().refresh(&tokens.refresh_token, &client).await,
        Err(AuthError::SessionRevoked)
    ));

    cleanup_user(&pool, &username).await;
}
