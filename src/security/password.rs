//! Password hashing and verification for user accounts.
//!
//! New passwords are stored as Argon2 PHC strings. Stores written by older
//! tools may still hold bcrypt hashes or plaintext; both are accepted.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use subtle::ConstantTimeEq;

/// Hash a password using default Argon2 settings.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Check `password` against a stored value of any supported form.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if stored.starts_with("$argon2") {
        PasswordHash::new(stored).is_ok_and(|hash| {
            Argon2::default()
                .verify_password(password.as_bytes(), &hash)
                .is_ok()
        })
    } else if stored.starts_with("$2") {
        bcrypt::verify(password, stored).unwrap_or(false)
    } else {
        // Legacy plaintext
        bool::from(password.as_bytes().ct_eq(stored.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argon2_round_trip() {
        let hash = hash_password("s3cret!").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret!", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn bcrypt_hashes_are_accepted() {
        let hash = bcrypt::hash("legacy-pw", 4).unwrap();
        assert!(verify_password("legacy-pw", &hash));
        assert!(!verify_password("other", &hash));
    }

    #[test]
    fn plaintext_fallback() {
        assert!(verify_password("plain", "plain"));
        assert!(!verify_password("plain", "plainer"));
    }
}
