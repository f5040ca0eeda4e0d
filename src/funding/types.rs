use rand::RngCore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::FundingError;

/// Maximum length of a shared transaction id
pub const TID_MAX_LEN: usize = 64;

/// Member balance for one currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub member_id: i64,
    pub currency_id: String,
    pub balance: Decimal,
    pub locked: Decimal,
}

/// Currency kind, stored in the `type` column of `currencies`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyKind {
    Coin,
    Fiat,
}

impl fmt::Display for CurrencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrencyKind::Coin => write!(f, "coin"),
            CurrencyKind::Fiat => write!(f, "fiat"),
        }
    }
}

impl FromStr for CurrencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "coin" => Ok(CurrencyKind::Coin),
            "fiat" => Ok(CurrencyKind::Fiat),
            _ => Err(format!("Invalid currency type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub id: String,
    pub kind: CurrencyKind,
}

impl Currency {
    #[inline]
    pub fn is_coin(&self) -> bool {
        self.kind == CurrencyKind::Coin
    }
}

/// Shared transaction id correlating a deposit or withdrawal across subsystems
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tid(String);

impl Tid {
    /// `TID` followed by 10 uppercase hex characters
    pub fn generate() -> Self {
        let mut bytes = [0u8; 5];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("TID{}", hex::encode_upper(bytes)))
    }

    /// Use the caller's id when supplied, otherwise generate one
    pub fn or_generate(supplied: Option<String>) -> Result<Self, FundingError> {
        match supplied {
            Some(s) => s.parse(),
            None => Ok(Self::generate()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tid {
    type Err = FundingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Characters, not bytes, to agree with the VARCHAR(64) column
        let len = s.chars().count();
        if len == 0 || len > TID_MAX_LEN {
            return Err(FundingError::InvalidTid(format!(
                "length must be 1..={}, got {}",
                TID_MAX_LEN, len
            )));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Committed lifecycle change, published after the transaction commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    pub entity: &'static str,
    pub id: i64,
    pub event: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tid_format() {
        let tid = Tid::generate();
        assert_eq!(tid.as_str().len(), 13);
        assert!(tid.as_str().starts_with("TID"));
        assert!(
            tid.as_str()[3..]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
        assert_ne!(Tid::generate(), Tid::generate());
    }

    #[test]
    fn test_supplied_tid_kept() {
        let tid = Tid::or_generate(Some("EXT-123".to_string())).unwrap();
        assert_eq!(tid.as_str(), "EXT-123");
    }

    #[test]
    fn test_tid_length_limit() {
        assert!(Tid::or_generate(Some("x".repeat(64))).is_ok());
        assert!(matches!(
            Tid::or_generate(Some("x".repeat(65))),
            Err(FundingError::InvalidTid(_))
        ));
        assert!(Tid::or_generate(Some(String::new())).is_err());
    }

    #[test]
    fn test_tid_length_counts_characters() {
        // 40 characters, 80 bytes
        let tid = "é".repeat(40).parse::<Tid>().unwrap();
        assert_eq!(tid.as_str().chars().count(), 40);
        assert!("é".repeat(64).parse::<Tid>().is_ok());

        match "é".repeat(65).parse::<Tid>() {
            Err(FundingError::InvalidTid(msg)) => assert!(msg.ends_with("got 65")),
            other => panic!("expected InvalidTid, got {:?}", other),
        }
    }

    #[test]
    fn test_currency_kind() {
        assert_eq!("COIN".parse::<CurrencyKind>(), Ok(CurrencyKind::Coin));
        assert!("token".parse::<CurrencyKind>().is_err());
        let btc = Currency {
            id: "btc".to_string(),
            kind: CurrencyKind::Coin,
        };
        assert!(btc.is_coin());
    }
}
