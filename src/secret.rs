//! Per-deployment root passwords

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Random alphanumeric password of `len` characters
pub fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
