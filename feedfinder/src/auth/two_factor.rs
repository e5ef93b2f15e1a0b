//! Email two-factor challenges.
//!
//! A challenge is a 6-digit code mailed to the account's address. It lives
//! for five minutes, survives at most [`MAX_ATTEMPTS`] wrong guesses, and is
//! deleted as soon as it is used.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tokio::sync::RwLock;

use super::{
    errors::{AuthError, AuthResult},
    models::{PendingChallenge, UserId},
};
use crate::mail::Mailer;
use crate::security::{constant_time_eq, random_token};

/// How long a mailed code is accepted (5 minutes)
pub const CODE_TTL: Duration = Duration::minutes(5);

/// Wrong codes tolerated before a challenge is discarded
pub const MAX_ATTEMPTS: u32 = 5;

/// Subject line of the verification mail
pub const CODE_SUBJECT: &str = "Your 2FA Verification Code";

/// Storage for pending challenges
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn insert(&self, challenge: &PendingChallenge) -> AuthResult<()>;

    async fn find(&self, challenge_id: &str) -> AuthResult<Option<PendingChallenge>>;

    /// Count one more attempt, but only while fewer than `max_attempts`
    /// have been made. Returns the new count, or `None` when the challenge
    /// is gone or exhausted. Check and increment are a single step.
    async fn reserve_attempt(
        &self,
        challenge_id: &str,
        max_attempts: u32,
    ) -> AuthResult<Option<u32>>;

    /// Remove a challenge, returning whether this call removed it
    async fn delete(&self, challenge_id: &str) -> AuthResult<bool>;

    /// Drop challenges issued before `cutoff`
    async fn delete_issued_before(&self, cutoff: DateTime<Utc>) -> AuthResult<u64>;
}

/// In-process challenge store
#[derive(Clone, Default)]
pub struct MemoryChallengeStore {
    challenges: Arc<RwLock<HashMap<String, PendingChallenge>>>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn insert(&self, challenge: &PendingChallenge) -> AuthResult<()> {
        self.challenges
            .write()
            .await
            .insert(challenge.challenge_id.clone(), challenge.clone());
        Ok(())
    }

    async fn find(&self, challenge_id: &str) -> AuthResult<Option<PendingChallenge>> {
        Ok(self.challenges.read().await.get(challenge_id).cloned())
    }

    async fn reserve_attempt(
        &self,
        challenge_id: &str,
        max_attempts: u32,
    ) -> AuthResult<Option<u32>> {
        let mut challenges = self.challenges.write().await;
        Ok(challenges
            .get_mut(challenge_id)
            .filter(|c| c.attempts < max_attempts)
            .map(|c| {
                c.attempts += 1;
                c.attempts
            }))
    }

    async fn delete(&self, challenge_id: &str) -> AuthResult<bool> {
        Ok(self.challenges.write().await.remove(challenge_id).is_some())
    }

    async fn delete_issued_before(&self, cutoff: DateTime<Utc>) -> AuthResult<u64> {
        let mut challenges = self.challenges.write().await;
        let before = challenges.len();
        challenges.retain(|_, c| c.issued_at >= cutoff);
        Ok((before - challenges.len()) as u64)
    }
}

/// Issues and checks mailed verification codes
#[derive(Clone)]
pub struct TwoFactorService {
    store: Arc<dyn ChallengeStore>,
    mailer: Arc<dyn Mailer>,
    ttl: Duration,
}

impl TwoFactorService {
    pub fn new(store: Arc<dyn ChallengeStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            store,
            mailer,
            ttl: CODE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Mail a fresh code to `email` and remember it.
    ///
    /// The challenge is stored only once the mail has been handed off.
    ///
    /// # Returns
    ///
    /// * `String` - id the client presents alongside the code
    ///
    /// # Errors
    ///
    /// * `AuthError::Mail` - delivery failed, nothing was stored
    pub async fn initiate(&self, user_id: UserId, email: &str) -> AuthResult<String> {
        let code = generate_code();
        let minutes = self.ttl.num_minutes().max(1);
        let body = format!(
            "Your verification code is: {code}\n\nThis code will expire in {minutes} minutes."
        );

        self.mailer.send(email, CODE_SUBJECT, &body).await?;

        let challenge = PendingChallenge {
            challenge_id: random_token(32),
            user_id,
            email: email.to_string(),
            code,
            issued_at: Utc::now(),
            attempts: 0,
        };
        self.store.insert(&challenge).await?;

        log::info!("Two-factor challenge issued for user {user_id}");
        Ok(challenge.challenge_id)
    }

    /// Check a submitted code.
    ///
    /// Every submission spends one of the [`MAX_ATTEMPTS`] attempts before
    /// the code is compared, and a correct code only succeeds for the caller
    /// that actually removes the challenge, so concurrent submissions can
    /// neither redeem a code twice nor exceed the attempt cap.
    ///
    /// # Returns
    ///
    /// * `UserId` - owner of the challenge, which is now consumed
    ///
    /// # Errors
    ///
    /// * `AuthError::TwoFactorNotFound` - unknown, used or exhausted challenge
    /// * `AuthError::TwoFactorExpired` - older than the code lifetime (deleted)
    /// * `AuthError::TwoFactorIncorrect` - wrong code, attempts remain
    /// * `AuthError::TwoFactorLocked` - wrong code, attempts exhausted (deleted)
    pub async fn verify(&self, challenge_id: &str, submitted: &str) -> AuthResult<UserId> {
        let challenge = self
            .store
            .find(challenge_id)
            .await?
            .ok_or(AuthError::TwoFactorNotFound)?;

        if Utc::now() - challenge.issued_at > self.ttl {
            self.store.delete(challenge_id).await?;
            return Err(AuthError::TwoFactorExpired);
        }

        let attempts = self
            .store
            .reserve_attempt(challenge_id, MAX_ATTEMPTS)
            .await?
            .ok_or(AuthError::TwoFactorNotFound)?;

        if constant_time_eq(submitted.trim(), &challenge.code) {
            return if self.store.delete(challenge_id).await? {
                Ok(challenge.user_id)
            } else {
                Err(AuthError::TwoFactorNotFound)
            };
        }

        if attempts >= MAX_ATTEMPTS {
            self.store.delete(challenge_id).await?;
            log::warn!(
                "Two-factor challenge for user {} discarded after {attempts} wrong codes",
                challenge.user_id
            );
            return Err(AuthError::TwoFactorLocked);
        }

        Err(AuthError::TwoFactorIncorrect)
    }

    /// Drop challenges past their lifetime
    pub async fn purge_expired(&self) -> AuthResult<u64> {
        self.store.delete_issued_before(Utc::now() - self.ttl).await
    }
}

/// Uniform 6-digit code, never starting with zero
fn generate_code() -> String {
    rand::rng().random_range(100_000..=999_999u32).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::LogMailer;

    fn service() -> (TwoFactorService, LogMailer, Arc<MemoryChallengeStore>) {
        let mailer = LogMailer::new();
        let store = Arc::new(MemoryChallengeStore::new());
        let service = TwoFactorService::new(store.clone(), Arc::new(mailer.clone()));
        (service, mailer, store)
    }

    fn mailed_code(mailer: &LogMailer) -> String {
        let body = mailer.last().unwrap().body;
        body.split_whitespace()
            .find(|w| w.len() == 6 && w.chars().all(|c| c.is_ascii_digit()))
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_code_shape() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_initiate_sends_mail() {
        let (service, mailer, _) = service();
        service.initiate(1, "alice@example.com").await.unwrap();

        let sent = mailer.last().unwrap();
        assert_eq!(sent.to, "alice@example.com");
        assert_eq!(sent.subject, CODE_SUBJECT);
        assert!(sent.body.contains("expire in 5 minutes"));
    }

    #[tokio::test]
    async fn test_correct_code_consumes_challenge() {
        let (service, mailer, _) = service();
        let id = service.initiate(7, "alice@example.com").await.unwrap();
        let code = mailed_code(&mailer);

        assert_eq!(service.verify(&id, &format!(" {code}\n")).await.unwrap(), 7);
        assert!(matches!(
            service.verify(&id, &code).await,
            Err(AuthError::TwoFactorNotFound)
        ));
    }

    #[tokio::test]
    async fn test_failed_mail_stores_nothing() {
        let store = Arc::new(MemoryChallengeStore::new());
        let service = TwoFactorService::new(store.clone(), Arc::new(LogMailer::failing()));

        let err = service.initiate(1, "alice@example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::Mail(_)));
        assert!(store.challenges.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_expired_code_then_not_found() {
        let (service, mailer, _) = service();
        let service = service.with_ttl(Duration::seconds(-1));
        let id = service.initiate(1, "alice@example.com").await.unwrap();
        let code = mailed_code(&mailer);

        assert!(matches!(
            service.verify(&id, &code).await,
            Err(AuthError::TwoFactorExpired)
        ));
        assert!(matches!(
            service.verify(&id, &code).await,
            Err(AuthError::TwoFactorNotFound)
        ));
    }

    #[tokio::test]
    async fn test_attempts_are_capped() {
        let (service, mailer, _) = service();
        let id = service.initiate(1, "alice@example.com").await.unwrap();
        let code = mailed_code(&mailer);
        let wrong = if code == "123456" { "654321" } else { "123456" };

        for _ in 0..MAX_ATTEMPTS - 1 {
            assert!(matches!(
                service.verify(&id, wrong).await,
                Err(AuthError::TwoFactorIncorrect)
            ));
        }
        assert!(matches!(
            service.verify(&id, wrong).await,
            Err(AuthError::TwoFactorLocked)
        ));

        // Even the right code is useless now
        assert!(matches!(
            service.verify(&id, &code).await,
            Err(AuthError::TwoFactorNotFound)
        ));
    }

    /// Store whose lookups yield, so concurrent verifications interleave
    /// between reading a challenge and acting on it
    struct YieldingStore(MemoryChallengeStore);

    #[async_trait]
    impl ChallengeStore for YieldingStore {
        async fn insert(&self, challenge: &PendingChallenge) -> AuthResult<()> {
            self.0.insert(challenge).await
        }

        async fn find(&self, challenge_id: &str) -> AuthResult<Option<PendingChallenge>> {
            let found = self.0.find(challenge_id).await;
            tokio::task::yield_now().await;
            found
        }

        async fn reserve_attempt(
            &self,
            challenge_id: &str,
            max_attempts: u32,
        ) -> AuthResult<Option<u32>> {
            tokio::task::yield_now().await;
            self.0.reserve_attempt(challenge_id, max_attempts).await
        }

        async fn delete(&self, challenge_id: &str) -> AuthResult<bool> {
            tokio::task::yield_now().await;
            self.0.delete(challenge_id).await
        }

        async fn delete_issued_before(&self, cutoff: DateTime<Utc>) -> AuthResult<u64> {
            self.0.delete_issued_before(cutoff).await
        }
    }

    fn yielding_service() -> (TwoFactorService, LogMailer) {
        let mailer = LogMailer::new();
        let store = Arc::new(YieldingStore(MemoryChallengeStore::new()));
        (TwoFactorService::new(store, Arc::new(mailer.clone())), mailer)
    }

    #[tokio::test]
    async fn test_concurrent_correct_codes_redeem_once() {
        let (service, mailer) = yielding_service();
        let id = service.initiate(3, "alice@example.com").await.unwrap();
        let code = mailed_code(&mailer);

        let (first, second) = tokio::join!(service.verify(&id, &code), service.verify(&id, &code));

        let redeemed = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(redeemed, 1);
        for result in [first, second] {
            match result {
                Ok(user_id) => assert_eq!(user_id, 3),
                Err(e) => assert!(matches!(e, AuthError::TwoFactorNotFound)),
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_wrong_codes_respect_cap() {
        let (service, mailer) = yielding_service();
        let id = service.initiate(1, "alice@example.com").await.unwrap();
        let code = mailed_code(&mailer);
        let wrong = if code == "123456" { "654321" } else { "123456" };

        let mut guesses = tokio::task::JoinSet::new();
        for _ in 0..50 {
            let service = service.clone();
            let id = id.clone();
            let wrong = wrong.to_string();
            guesses.spawn(async move { service.verify(&id, &wrong).await });
        }
        let results = guesses.join_all().await;

        let compared = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(AuthError::TwoFactorIncorrect) | Err(AuthError::TwoFactorLocked)
                )
            })
            .count();
        assert_eq!(compared, MAX_ATTEMPTS as usize);
        assert!(results.iter().all(|r| matches!(
            r,
            Err(AuthError::TwoFactorIncorrect)
                | Err(AuthError::TwoFactorLocked)
                | Err(AuthError::TwoFactorNotFound)
        )));
        assert!(matches!(
            service.verify(&id, &code).await,
            Err(AuthError::TwoFactorNotFound)
        ));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (service, _, store) = service();
        let fresh = service.initiate(1, "a@example.com").await.unwrap();
        store
            .insert(&PendingChallenge {
                challenge_id: "old".to_string(),
                user_id: 2,
                email: "b@example.com".to_string(),
                code: "111111".to_string(),
                issued_at: Utc::now() - Duration::minutes(10),
                attempts: 0,
            })
            .await
            .unwrap();

        assert_eq!(service.purge_expired().await.unwrap(), 1);
        assert!(store.find(&fresh).await.unwrap().is_some());
        assert!(store.find("old").await.unwrap().is_none());
    }
}
