use std::fmt;

#[cfg(feature = "serde")]
use sha2::{Digest, Sha256};

#[cfg(feature = "serde")]
use super::Card;

/// SHA-256 digest of a Card's canonical encoding.
///
/// Server and client compare digests after applying a delta; any difference
/// means the client view diverged and must be resynchronized.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateDigest(pub [u8; 32]);

impl StateDigest {
    /// Digests the bincode encoding of `card`.
    ///
    /// Every container inside a Card is ordered, so equal Cards always
    /// encode, and therefore digest, identically.
    #[cfg(feature = "serde")]
    pub fn of_card(card: &Card) -> Self {
        let mut hasher = Sha256::new();
        if let Ok(bytes) = bincode::serialize(card) {
            hasher.update(&bytes);
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateDigest({self})")
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use crate::state::{CardId, CardSpec, OwnerId};

    #[test]
    fn equal_cards_digest_identically() {
        let a = Card::new(CardId(1), OwnerId(1), CardSpec::fixed(2));
        let b = a.clone();
        let c = Card::new(CardId(1), OwnerId(1), CardSpec::fixed(3));

        assert_eq!(StateDigest::of_card(&a), StateDigest::of_card(&b));
        assert_ne!(StateDigest::of_card(&a), StateDigest::of_card(&c));
    }

    #[test]
    fn display_is_short_hex_prefix() {
        let digest = StateDigest::of_card(&Card::new(CardId(4), OwnerId(2), CardSpec::growable(4)));
        assert_eq!(digest.to_string(), hex::encode(&digest.as_bytes()[..8]));
        assert_eq!(format!("{digest:?}"), format!("StateDigest({digest})"));
    }
}
