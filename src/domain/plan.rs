use crate::error::{PlatformError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// Plan price as delivered by the backend.
///
/// The CMS stores it either as a plain number or as a display string such as
/// `"KES 5000"` or `"5,000"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Price {
    Amount(Decimal),
    Label(String),
}

impl Price {
    /// Extracts the numeric amount, dropping currency codes and separators.
    pub fn amount(&self) -> Result<Decimal> {
        match self {
            Price::Amount(value) => Ok(*value),
            Price::Label(label) => {
                let digits: String = label
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                let digits = digits.trim_matches('.');
                Decimal::from_str(digits).map_err(|_| {
                    PlatformError::invalid("price", format!("Cannot read an amount from '{label}'"))
                })
            }
        }
    }
}

impl Default for Price {
    fn default() -> Self {
        Price::Amount(Decimal::ZERO)
    }
}

/// A purchasable mentorship tier. Read-only on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: u64,
    #[serde(rename = "type", default)]
    pub plan_type: String,
    #[serde(default)]
    pub price: Price,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub benefits: Vec<String>,
}

fn default_active() -> bool {
    true
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Plan {
    /// Online plans need no physical location in the checkout wizard.
    pub fn is_online(&self) -> bool {
        self.plan_type.trim().eq_ignore_ascii_case("online")
    }

    pub fn amount(&self) -> Result<Decimal> {
        self.price.amount()
    }
}
