//! Argon2id password hashing.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use std::sync::LazyLock;

use super::errors::{AuthError, AuthResult};

/// Hash checked when the account does not exist, so an unknown username costs
/// the same Argon2 work as a wrong password
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("feedfinder-dummy-password").unwrap_or_default());

/// Hash a password into a self-describing PHC string with a fresh salt.
pub fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    Ok(argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| AuthError::HashingFailed)?
        .to_string())
}

/// Verify a password against a stored hash.
///
/// Malformed hashes and internal errors count as a mismatch.
pub fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Spend one full verification against a hash no account owns
pub fn verify_dummy(password: &str) {
    let _ = verify_password(&DUMMY_HASH, password);
}
