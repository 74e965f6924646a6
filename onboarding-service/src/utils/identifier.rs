use std::fmt;

/// Normalised login identifier. Phones are kept in `62…` international form,
/// emails lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Phone(String),
    Email(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Invalid phone number format")]
    InvalidPhone,
    #[error("Invalid email format")]
    InvalidEmail,
    #[error("Either phone or email is required")]
    Missing,
}

impl Identifier {
    /// Builds an identifier from optional request fields; phone wins when
    /// both are present.
    pub fn from_parts(phone: Option<&str>, email: Option<&str>) -> Result<Self, IdentifierError> {
        match (phone.map(str::trim), email.map(str::trim)) {
            (Some(p), _) if !p.is_empty() => Self::phone(p),
            (_, Some(e)) if !e.is_empty() => Self::email(e),
            _ => Err(IdentifierError::Missing),
        }
    }

    pub fn phone(raw: &str) -> Result<Self, IdentifierError> {
        normalize_phone(raw).map(Identifier::Phone)
    }

    pub fn email(raw: &str) -> Result<Self, IdentifierError> {
        let email = raw.trim().to_lowercase();
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !domain.contains('@')
            }
            None => false,
        };
        if !valid {
            return Err(IdentifierError::InvalidEmail);
        }
        Ok(Identifier::Email(email))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identifier::Phone(v) | Identifier::Email(v) => v,
        }
    }

    pub fn is_phone(&self) -> bool {
        matches!(self, Identifier::Phone(_))
    }

    /// Masked form safe for responses and logs.
    pub fn masked(&self) -> String {
        match self {
            Identifier::Phone(p) => {
                let keep = 4.min(p.len() / 3);
                let hidden = p.len().saturating_sub(keep * 2);
                format!("{}{}{}", &p[..keep], "*".repeat(hidden), &p[p.len() - keep..])
            }
            Identifier::Email(e) => match e.split_once('@') {
                Some((local, domain)) => {
                    let shown: String = local.chars().take(2).collect();
                    format!("{}***@{}", shown, domain)
                }
                None => "***".to_string(),
            },
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Accepts `08…`, `+628…`, `628…` and `8…`, tolerating spaces and dashes.
pub fn normalize_phone(raw: &str) -> Result<String, IdentifierError> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdentifierError::InvalidPhone);
    }

    let normalized = if let Some(rest) = digits.strip_prefix('0') {
        format!("62{}", rest)
    } else if digits.starts_with("62") {
        digits.to_string()
    } else if digits.starts_with('8') {
        format!("62{}", digits)
    } else {
        return Err(IdentifierError::InvalidPhone);
    };

    if !(10..=15).contains(&normalized.len()) || !normalized.starts_with("628") {
        return Err(IdentifierError::InvalidPhone);
    }

    Ok(normalized)
}
