use core::str::FromStr;

use serde::{Deserialize, Serialize};
use stockroom_core::DomainError;

/// Product category. Only `Perishable` changes how movements are validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Perishable,
    NonPerishable,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Perishable => "PERISHABLE",
            Category::NonPerishable => "NON_PERISHABLE",
        }
    }
}

impl core::fmt::Display for Category {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PERISHABLE" => Ok(Category::Perishable),
            "NON_PERISHABLE" => Ok(Category::NonPerishable),
            other => Err(DomainError::validation(format!(
                "unknown category '{other}' (expected PERISHABLE or NON_PERISHABLE)"
            ))),
        }
    }
}
