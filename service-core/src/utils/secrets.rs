use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length of the random part of a generated credential.
pub const SECRET_BODY_LEN: usize = 40;

/// Generate an opaque credential such as `lk_3fJ...`.
///
/// Uses the thread-local CSPRNG; the body is alphanumeric so keys survive
/// query strings and headers without escaping.
pub fn generate_secret(prefix: &str) -> String {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_BODY_LEN)
        .map(char::from)
        .collect();
    format!("{}_{}", prefix, body)
}

/// Compare a presented secret against a stored one in constant time.
pub fn secrets_match(provided: &str, stored: &str) -> bool {
    let provided = provided.as_bytes();
    let stored = stored.as_bytes();

    if provided.len() != stored.len() {
        return false;
    }

    provided.ct_eq(stored).into()
}

/// Short, non-reversible identifier of a secret for logs.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(&digest[..6])
}
