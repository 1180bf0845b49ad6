use serde::{Deserialize, Serialize};
use stockroom_core::{DomainError, DomainResult, ValueObject};

pub const MAX_SKU_LEN: usize = 50;

/// Stock keeping unit code: non-blank, at most [`MAX_SKU_LEN`] characters.
///
/// Surrounding whitespace is trimmed; the code is otherwise kept verbatim, so
/// lookups by SKU are exact matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sku(String);

impl Sku {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let code = raw.trim();
        DomainError::check_text("sku", code, MAX_SKU_LEN)?;
        Ok(Self(code.to_string()))
    }
}

impl ValueObject for Sku {
    fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Sku {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Sku::parse(&value)
    }
}

impl From<Sku> for String {
    fn from(value: Sku) -> Self {
        value.0
    }
}

impl core::fmt::Display for Sku {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
