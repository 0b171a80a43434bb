//! Phone number normalization
//!
//! Maps whatever the caller typed ("(48) 99119-6884", "+55 48 99119 6884",
//! "48991196884") to the address form the registration query accepts:
//! `<country-prefixed digits>@s.whatsapp.net`.

use std::fmt;

/// Country code prepended when the digits don't already start with it
pub const COUNTRY_CODE: &str = "55";

/// Domain suffix of user addresses
pub const USER_DOMAIN: &str = "s.whatsapp.net";

/// Country code + area code + subscriber number
pub const MIN_DIGITS: usize = 12;

/// Returned when the input can't be turned into a plausible number
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Número de telefone inválido")]
pub struct InvalidPhoneNumber;

/// Canonical protocol address of a phone number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneAddress(String);

impl PhoneAddress {
    /// Full address including the domain suffix
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits only, without the domain suffix
    pub fn user(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for PhoneAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a raw phone string into a `PhoneAddress`.
///
/// Non-digits are stripped and the country code is prepended when missing.
/// Only a minimum length is enforced; overly long numbers pass through and
/// are reported as unregistered by the lookup.
pub fn normalize(raw: &str) -> Result<PhoneAddress, InvalidPhoneNumber> {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if !digits.starts_with(COUNTRY_CODE) {
        digits.insert_str(0, COUNTRY_CODE);
    }

    if digits.len() < MIN_DIGITS {
        return Err(InvalidPhoneNumber);
    }

    Ok(PhoneAddress(format!("{}@{}", digits, USER_DOMAIN)))
}
