//! Authentication manager implementation.

use std::sync::Arc;

use super::{
    errors::{AuthError, AuthResult},
    models::{
        ClientContext, LoginOutcome, LoginRequest, NewUser, RegisterRequest, SessionTokens, User,
        UserId, UserUpdate,
    },
    password::{hash_password, verify_dummy, verify_password},
    two_factor::TwoFactorService,
};
use crate::db::UserRepository;
use crate::session::SessionManager;

/// Longest accepted username, in bytes
pub const MAX_USERNAME_LEN: usize = 50;
/// Longest accepted email address, in bytes
pub const MAX_EMAIL_LEN: usize = 100;
/// Longest accepted password, in bytes
pub const MAX_PASSWORD_LEN: usize = 100;

/// Authentication manager
///
/// Drives registration, login (with optional mailed codes), password changes
/// and logout on top of the user repository and the session manager.
#[derive(Clone)]
pub struct AuthManager {
    users: Arc<dyn UserRepository>,
    sessions: SessionManager,
    two_factor: Option<TwoFactorService>,
}

impl AuthManager {
    /// Create a new authentication manager
    ///
    /// # Arguments
    ///
    /// * `users` - User row store
    /// * `sessions` - Session manager sharing the same user store
    /// * `two_factor` - Mailed-code service; `None` disables the second step
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: SessionManager,
        two_factor: Option<TwoFactorService>,
    ) -> Self {
        Self {
            users,
            sessions,
            two_factor,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    pub fn two_factor(&self) -> Option<&TwoFactorService> {
        self.two_factor.as_ref()
    }

    /// Register a new user and log them in
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - malformed username or email, mismatched passwords
    /// * `AuthError::WeakPassword` - password too weak
    /// * `AuthError::UsernameTaken` - Username already exists
    /// * `AuthError::EmailTaken` - Email already exists
    pub async fn register(
        &self,
        request: RegisterRequest,
        client: &ClientContext,
    ) -> AuthResult<(User, SessionTokens)> {
        if request.username.is_empty()
            || request.email.is_empty()
            || request.password.is_empty()
            || request.confirm_password.is_empty()
        {
            return Err(AuthError::Validation(
                "All required fields must be filled".to_string(),
            ));
        }

        if request.password != request.confirm_password {
            return Err(AuthError::Validation("Passwords do not match".to_string()));
        }

        validate_username(&request.username)?;
        validate_email(&request.email)?;

        if request.username.len() > MAX_USERNAME_LEN
            || request.email.len() > MAX_EMAIL_LEN
            || request.password.len() > MAX_PASSWORD_LEN
        {
            return Err(AuthError::Validation("Input too long".to_string()));
        }

        validate_password(&request.password)?;

        if self.users.find_by_username(&request.username).await?.is_some() {
            return Err(AuthError::UsernameTaken);
        }
        if self.users.find_by_email(&request.email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = hash_password(&request.password)?;

        let user = self
            .users
            .create_user(&NewUser {
                username: request.username,
                email: request.email,
                password_hash,
                bio: request.bio,
                is_private: request.private,
            })
            .await?;

        log::info!("Registered user {} ({})", user.username, user.id);

        let tokens = self
            .sessions
            .create_session(user.id, &user.username, client)
            .await?;
        Ok((user, tokens))
    }

    /// Login a user
    ///
    /// Unknown usernames and wrong passwords fail identically.
    ///
    /// # Returns
    ///
    /// * `LoginOutcome::Authenticated` - session created
    /// * `LoginOutcome::TwoFactorRequired` - code mailed, finish with
    ///   [`AuthManager::complete_two_factor`]
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidCredentials` - unknown user or wrong password
    /// * `AuthError::Mail` - code could not be sent
    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientContext,
    ) -> AuthResult<LoginOutcome> {
        if request.username.is_empty() || request.password.is_empty() {
            return Err(AuthError::Validation(
                "Username and password are required".to_string(),
            ));
        }

        let user = match self.users.find_by_username(&request.username).await? {
            Some(user) if verify_password(&user.password_hash, &request.password) => user,
            Some(_) => return Err(AuthError::InvalidCredentials),
            None => {
                verify_dummy(&request.password);
                return Err(AuthError::InvalidCredentials);
            }
        };

        if let (Some(two_factor), Some(email)) = (&self.two_factor, &user.email) {
            let challenge_id = two_factor.initiate(user.id, email).await?;
            return Ok(LoginOutcome::TwoFactorRequired { challenge_id });
        }

        let (user, tokens) = self.finish_login(user, client).await?;
        Ok(LoginOutcome::Authenticated { user, tokens })
    }

    /// Exchange a mailed code for a session
    ///
    /// # Errors
    ///
    /// * `AuthError::TwoFactorNotFound` - also returned when two-factor is disabled
    /// * `AuthError::TwoFactorExpired` / `TwoFactorIncorrect` / `TwoFactorLocked`
    pub async fn complete_two_factor(
        &self,
        challenge_id: &str,
        code: &str,
        client: &ClientContext,
    ) -> AuthResult<(User, SessionTokens)> {
        let two_factor = self
            .two_factor
            .as_ref()
            .ok_or(AuthError::TwoFactorNotFound)?;

        let user_id = two_factor.verify(challenge_id, code).await?;
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        self.finish_login(user, client).await
    }

    /// Change a password, signing out every other session
    ///
    /// # Returns
    ///
    /// * `SessionTokens` - fresh session for the calling client
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidCredentials` - current password wrong
    /// * `AuthError::WeakPassword` - new password too weak
    pub async fn change_password(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
        client: &ClientContext,
    ) -> AuthResult<SessionTokens> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !verify_password(&user.password_hash, current_password) {
            return Err(AuthError::InvalidCredentials);
        }

        if new_password.len() > MAX_PASSWORD_LEN {
            return Err(AuthError::Validation("Input too long".to_string()));
        }
        validate_password(new_password)?;

        let password_hash = hash_password(new_password)?;
        self.users
            .update_user(
                user_id,
                &UserUpdate {
                    password_hash: Some(password_hash),
                    ..Default::default()
                },
            )
            .await?;

        let revoked = self.sessions.invalidate_all(user_id).await?;
        log::info!("Password changed for user {user_id}; {revoked} sessions revoked");

        self.sessions
            .create_session(user_id, &user.username, client)
            .await
    }

    /// End one session
    pub async fn logout(&self, session_id: &str) -> AuthResult<()> {
        self.sessions.invalidate(session_id, None).await
    }

    /// End every session of a user
    pub async fn logout_everywhere(&self, user_id: UserId) -> AuthResult<()> {
        self.sessions.invalidate("", Some(user_id)).await
    }

    async fn finish_login(
        &self,
        user: User,
        client: &ClientContext,
    ) -> AuthResult<(User, SessionTokens)> {
        self.users.touch_last_login(user.id).await?;
        let tokens = self
            .sessions
            .create_session(user.id, &user.username, client)
            .await?;
        Ok((user, tokens))
    }
}

/// Validate username format: 3-20 ASCII letters, digits or underscores
pub fn validate_username(username: &str) -> AuthResult<()> {
    let len = username.len();
    if !(3..=20).contains(&len)
        || !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(AuthError::Validation(
            "Username must be 3-20 characters (letters, numbers, underscores only)".to_string(),
        ));
    }

    Ok(())
}

/// Validate email shape: `local@domain.tld`
pub fn validate_email(email: &str) -> AuthResult<()> {
    let invalid = || AuthError::Validation("Invalid email format".to_string());

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }

    let has_inner_dot = domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len());
    if !has_inner_dot {
        return Err(invalid());
    }

    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> AuthResult<()> {
    if password.len() < 8 {
        return Err(AuthError::WeakPassword(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_uppercase = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_ascii_lowercase());

    if !has_digit || !has_uppercase || !has_lowercase {
        return Err(AuthError::WeakPassword(
            "Password must contain at least one number, one uppercase and one lowercase letter"
                .to_string(),
        ));
    }

    Ok(())
}
