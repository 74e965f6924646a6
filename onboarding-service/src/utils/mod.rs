pub mod digest;
pub mod identifier;
pub mod pin;
pub mod validation;

pub use digest::{constant_time_eq, sha256_hex};
pub use identifier::{normalize_phone, Identifier, IdentifierError};
pub use pin::{hash_pin, verify_pin, Pin, PinHash};
pub use validation::ValidatedJson;
