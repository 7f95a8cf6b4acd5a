use std::collections::HashMap;

use crate::error::{Error, Result};

/// A bidirectional mapping between strings and dense integer ids.
///
/// Used for both labels and feature names. Ids are assigned in insertion
/// order and never change, so an alphabet can be rebuilt exactly from
/// [`Alphabet::iter`]. Once frozen, lookups of unseen entries fail instead
/// of growing the alphabet.
#[derive(Debug, Clone, Default)]
pub struct Alphabet {
    /// Map from string to ID
    str_to_id: HashMap<String, u32>,
    /// Map from ID to string
    id_to_str: Vec<String>,
    frozen: bool,
}

impl Alphabet {
    /// Create a new empty alphabet
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an alphabet from entries listed in id order.
    pub fn from_entries<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut alphabet = Self::new();
        for (expected, entry) in entries.into_iter().enumerate() {
            let id = alphabet.lookup_or_insert(entry.as_ref())?;
            if id as usize != expected {
                return Err(Error::InvalidInput(format!(
                    "duplicate alphabet entry `{}`",
                    entry.as_ref()
                )));
            }
        }
        Ok(alphabet)
    }

    /// Get the number of entries
    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    /// Returns `true` if the alphabet contains no entries
    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Stop accepting new entries.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Accept new entries again, e.g. when training resumes from a model.
    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    /// Get the ID of a string, inserting it if the alphabet is still open.
    pub fn lookup_or_insert(&mut self, s: &str) -> Result<u32> {
        if let Some(&id) = self.str_to_id.get(s) {
            return Ok(id);
        }
        if self.frozen {
            return Err(Error::FrozenAlphabet(s.to_string()));
        }
        let id = u32::try_from(self.id_to_str.len())
            .map_err(|_| Error::InvalidInput("too many alphabet entries".to_string()))?;
        self.str_to_id.insert(s.to_string(), id);
        self.id_to_str.push(s.to_string());
        Ok(id)
    }

    /// Get the ID of a string without inserting.
    pub fn get(&self, s: &str) -> Option<u32> {
        self.str_to_id.get(s).copied()
    }

    /// Get the string for an ID.
    pub fn name(&self, id: u32) -> Option<&str> {
        self.id_to_str.get(id as usize).map(String::as_str)
    }

    /// Iterate over all (string, id) pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.id_to_str
            .iter()
            .enumerate()
            .map(|(id, s)| (s.as_str(), id as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphabet_basic() {
        let mut alphabet = Alphabet::new();
        assert!(alphabet.is_empty());

        let id1 = alphabet.lookup_or_insert("O").unwrap();
        assert_eq!(id1, 0);
        let id2 = alphabet.lookup_or_insert("GENE").unwrap();
        assert_eq!(id2, 1);

        // Getting the same string should return the same ID
        assert_eq!(alphabet.lookup_or_insert("O").unwrap(), id1);
        assert_eq!(alphabet.len(), 2);
        assert_eq!(alphabet.name(1), Some("GENE"));
        assert_eq!(alphabet.name(2), None);
        assert_eq!(alphabet.get("GENE"), Some(1));
        assert_eq!(alphabet.get("X"), None);
    }

    #[test]
    fn test_alphabet_frozen() {
        let mut alphabet = Alphabet::new();
        alphabet.lookup_or_insert("a").unwrap();
        alphabet.freeze();

        assert_eq!(alphabet.lookup_or_insert("a").unwrap(), 0);
        let err = alphabet.lookup_or_insert("b").unwrap_err();
        assert!(matches!(err, Error::FrozenAlphabet(ref s) if s == "b"));
        assert_eq!(alphabet.len(), 1);

        alphabet.unfreeze();
        assert_eq!(alphabet.lookup_or_insert("b").unwrap(), 1);
    }

    #[test]
    fn test_alphabet_round_trip() {
        let mut alphabet = Alphabet::new();
        for s in ["hello", "world", "rust"] {
            alphabet.lookup_or_insert(s).unwrap();
        }
        let rebuilt = Alphabet::from_entries(alphabet.iter().map(|(s, _)| s)).unwrap();
        let items: Vec<_> = rebuilt.iter().collect();
        assert_eq!(items, vec![("hello", 0), ("world", 1), ("rust", 2)]);

        assert!(Alphabet::from_entries(["a", "a"]).is_err());
    }
}
