use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

pub const PIN_LENGTH: usize = 6;

/// Newtype for a user PIN so the plaintext never reaches a log line.
#[derive(Clone)]
pub struct Pin(String);

impl Pin {
    /// Accepts exactly six ASCII digits.
    pub fn parse(raw: &str) -> Result<Self, anyhow::Error> {
        if raw.len() != PIN_LENGTH || !raw.bytes().all(|b| b.is_ascii_digit()) {
            anyhow::bail!("PIN must be exactly {} digits", PIN_LENGTH);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin(******)")
    }
}

/// Newtype for a stored PIN hash
#[derive(Debug, Clone)]
pub struct PinHash(String);

impl PinHash {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hash a PIN with Argon2id and a fresh random salt.
pub fn hash_pin(pin: &Pin) -> Result<PinHash, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(pin.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash PIN: {}", e))?
        .to_string();

    Ok(PinHash::new(hash))
}

/// Returns `Ok(true)` on match, `Ok(false)` on mismatch and an error only
/// when the stored hash cannot be parsed.
pub fn verify_pin(pin: &Pin, hash: &PinHash) -> Result<bool, anyhow::Error> {
    let parsed = PasswordHash::new(hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid PIN hash format: {}", e))?;

    Ok(Argon2::default()
        .verify_password(pin.as_str().as_bytes(), &parsed)
        .is_ok())
}
