/// Password Hashing and Verification
///
/// Account passwords are bcrypt hashes. bcrypt is deliberately slow, so
/// both operations run on the blocking thread pool.

use bcrypt::{hash, verify};

use crate::error::IdentityError;

/// Hash a password with the given bcrypt cost
///
/// # Errors
/// Returns error if the cost is out of range or hashing fails
pub async fn hash_password(password: &str, cost: u32) -> Result<String, IdentityError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash(password, cost))
        .await
        .map_err(|e| IdentityError::Backend(format!("Password hashing task failed: {}", e)))?
        .map_err(|e| IdentityError::Backend(format!("Password hashing failed: {}", e)))
}

/// Verify a password against its bcrypt hash
///
/// # Errors
/// Returns error if the stored hash is malformed
pub async fn verify_password(password: &str, password_hash: &str) -> Result<bool, IdentityError> {
    let password = password.to_string();
    let password_hash = password_hash.to_string();
    tokio::task::spawn_blocking(move || verify(password, &password_hash))
        .await
        .map_err(|e| IdentityError::Backend(format!("Password verification task failed: {}", e)))?
        .map_err(|e| IdentityError::Backend(format!("Password verification failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcrypt::DEFAULT_COST;

    #[tokio::test]
    async fn test_hash_password() {
        let password = "ValidPassword123";
        let hash = hash_password(password, 4).await.expect("Failed to hash password");

        assert_ne!(password, hash);
        assert!(hash.starts_with("$2"));
    }

    #[tokio::test]
    async fn test_verify_password() {
        let hash = hash_password("ValidPassword123", 4).await.unwrap();

        assert!(verify_password("ValidPassword123", &hash).await.unwrap());
        assert!(!verify_password("WrongPassword123", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_hash_is_an_error() {
        assert!(verify_password("ValidPassword123", "not-a-bcrypt-hash").await.is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_cost() {
        assert!(hash_password("ValidPassword123", DEFAULT_COST + 40).await.is_err());
    }
}
