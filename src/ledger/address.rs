use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// A ledger account identifier in `shard.realm.num` form.
///
/// An optional `-abcde` checksum suffix is accepted on input and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId {
    pub shard: u64,
    pub realm: u64,
    pub num: u64,
}

impl AccountId {
    pub fn new(shard: u64, realm: u64, num: u64) -> Self {
        Self { shard, realm, num }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl FromStr for AccountId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::InvalidAddress(s.to_string());

        let body = match s.split_once('-') {
            Some((body, checksum)) => {
                if checksum.len() != 5 || !checksum.chars().all(|c| c.is_ascii_lowercase()) {
                    return Err(invalid());
                }
                body
            }
            None => s,
        };

        let mut parts = body.split('.');
        let mut next = || -> Result<u64, LedgerError> {
            let part = parts.next().ok_or_else(invalid)?;
            // Reject signs and whitespace that u64::from_str would otherwise tolerate.
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u64>().map_err(|_| invalid())
        };

        let shard = next()?;
        let realm = next()?;
        let num = next()?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self { shard, realm, num })
    }
}

impl TryFrom<String> for AccountId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.to_string()
    }
}

/// Check that `address` is a syntactically valid ledger account.
pub fn validate_address(address: &str) -> Result<AccountId, LedgerError> {
    address.trim().parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_account() {
        let id = validate_address("0.0.12345").unwrap();
        assert_eq!(id, AccountId::new(0, 0, 12345));
        assert_eq!(id.to_string(), "0.0.12345");
    }

    #[test]
    fn accepts_checksum_suffix() {
        let id = validate_address("0.0.123-vfmkw").unwrap();
        assert_eq!(id.num, 123);
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "0.0", "0.0.1.2", "a.b.c", "0.0.-1", "0.0.+1", "0.0.1-ABCDE", "0.0.1-abc", "0x1234"] {
            assert!(validate_address(bad).is_err(), "{bad} should be invalid");
        }
    }

    #[test]
    fn serde_uses_dotted_form() {
        let id = AccountId::new(0, 0, 42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0.0.42\"");
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<AccountId>("\"nope\"").is_err());
    }
}
