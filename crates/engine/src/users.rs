//! User documents in the `_users` system collection.
//!
//! Users are ordinary documents flowing through the normal mutation path,
//! so they are WAL-logged, checkpointed, and replayable like everything
//! else. The engine stores a salted SHA-256 digest, never the password.
//!
//! Document shape:
//!
//! ```json
//! {
//!   "_id": "alice",
//!   "password_hash": "…hex…",
//!   "salt": "…",
//!   "role": "user",
//!   "created_at": "…", "updated_at": "…"
//! }
//! ```

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Role granted to the seeded root user.
pub const ROLE_ROOT: &str = "root";
/// Role granted to the seeded admin user.
pub const ROLE_ADMIN: &str = "admin";

/// Username of the seeded root user.
pub const ROOT_USERNAME: &str = "root";
/// Username of the seeded admin user.
pub const ADMIN_USERNAME: &str = "admin";

/// Salted SHA-256, hex-encoded.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Generate a fresh random salt.
pub fn new_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Build a user document (without engine-managed timestamps; the commit
/// path stamps those).
pub fn user_doc(username: &str, password: &str, role: &str) -> Value {
    let salt = new_salt();
    json!({
        "_id": username,
        "password_hash": hash_password(password, &salt),
        "salt": salt,
        "role": role,
    })
}

/// Build the merge patch that rotates a user's password.
pub fn password_patch(new_password: &str) -> Value {
    let salt = new_salt();
    json!({
        "password_hash": hash_password(new_password, &salt),
        "salt": salt,
    })
}

/// Check a password against a stored user document.
pub fn verify_password(doc: &Value, password: &str) -> bool {
    let (Some(hash), Some(salt)) = (
        doc.get("password_hash").and_then(Value::as_str),
        doc.get("salt").and_then(Value::as_str),
    ) else {
        return false;
    };
    hash_password(password, salt) == hash
}
