// totp.rs
// One-time codes used at login: build a TOTP for a user and mint Base32 secrets.

use anyhow::Result;
use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use totp_rs::{Algorithm, Secret, TOTP};

pub const ISSUER: &str = "PharmaLedger";
pub const MIN_SECRET_BYTES: usize = 16; // 128 bits
pub const DEFAULT_SECRET_BYTES: usize = 20; // 160 bits

/// TOTP for `email` with the given Base32 secret. Secrets shorter than
/// `MIN_SECRET_BYTES` once decoded are refused.
pub fn build_totp(email: &str, base32_secret: &str) -> Result<TOTP> {
    let secret = Secret::Encoded(base32_secret.to_string()).to_bytes()?;
    if secret.len() < MIN_SECRET_BYTES {
        anyhow::bail!(
            "shared secret too short: {} bytes, need >= {}",
            secret.len(),
            MIN_SECRET_BYTES
        );
    }
    let totp = TOTP::new(
        Algorithm::SHA1, // what authenticator apps expect
        6,
        1, // one step of clock drift either way
        30,
        secret,
        Some(ISSUER.to_string()),
        email.to_string(),
    )?;
    Ok(totp)
}

/// Random Base32 (no padding) secret of at least `MIN_SECRET_BYTES` bytes.
pub fn generate_base32_secret_n(bytes: usize) -> String {
    let n = bytes.max(MIN_SECRET_BYTES);
    let mut buf = vec![0u8; n];
    rand::rng().fill_bytes(&mut buf);
    BASE32_NOPAD.encode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_build_and_verify() {
        let secret = generate_base32_secret_n(DEFAULT_SECRET_BYTES);
        let totp = build_totp("clerk@example.com", &secret).unwrap();
        let code = totp.generate_current().unwrap();
        assert!(totp.check_current(&code).unwrap());
        assert!(totp.get_url().starts_with("otpauth://totp/PharmaLedger"));
    }

    #[test]
    fn short_secrets_are_refused() {
        let short = BASE32_NOPAD.encode(&[7u8; 8]);
        assert!(build_totp("clerk@example.com", &short).is_err());
        assert_eq!(generate_base32_secret_n(4).len(), BASE32_NOPAD.encode_len(MIN_SECRET_BYTES));
    }
}
