//! Keys for list queries served by the cache layer.

use sha2::{Digest, Sha256};

use super::traits::{QueryKey, Record};

/// Which part of a collection a list query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
  /// Every record in the collection
  All,
  /// Records whose index matches a value
  Index { index: &'static str, value: String },
}

/// A list query against one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
  pub collection: &'static str,
  pub scope: Scope,
}

impl ListQuery {
  pub fn all<T: Record>() -> Self {
    Self {
      collection: T::collection(),
      scope: Scope::All,
    }
  }

  pub fn by_index<T: Record>(index: &'static str, value: impl Into<String>) -> Self {
    Self {
      collection: T::collection(),
      scope: Scope::Index {
        index,
        value: value.into(),
      },
    }
  }
}

impl QueryKey for ListQuery {
  fn cache_hash(&self) -> String {
    let input = match &self.scope {
      Scope::All => format!("{}:all", self.collection),
      Scope::Index { index, value } => {
        format!("{}:{}:{}", self.collection, index, value)
      }
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    match &self.scope {
      Scope::All => format!("all {}", self.collection),
      Scope::Index { index, value } => format!("{} where {} = {}", self.collection, index, value),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn query(index: &'static str, value: &str) -> ListQuery {
    ListQuery {
      collection: "reviews",
      scope: Scope::Index {
        index,
        value: value.to_string(),
      },
    }
  }

  #[test]
  fn test_hash_is_stable_and_fixed_length() {
    let a = query("restaurant_id", "3").cache_hash();
    assert_eq!(a, query("restaurant_id", "3").cache_hash());
    assert_eq!(a.len(), 64);
  }

  #[test]
  fn test_hash_matches_index_lookup_exactly() {
    // Index lookups are exact, so values differing in case or spacing are different lists
    assert_ne!(
      query("cuisine_type", "Italian").cache_hash(),
      query("cuisine_type", "italian").cache_hash()
    );
    assert_ne!(
      query("restaurant_id", "3").cache_hash(),
      query("restaurant_id", " 3 ").cache_hash()
    );
  }

  #[test]
  fn test_scopes_hash_differently() {
    let all = ListQuery {
      collection: "reviews",
      scope: Scope::All,
    };
    assert_ne!(all.cache_hash(), query("restaurant_id", "3").cache_hash());
    assert_ne!(
      query("restaurant_id", "3").cache_hash(),
      query("restaurant_id", "4").cache_hash()
    );
  }

  #[test]
  fn test_description() {
    assert_eq!(
      query("restaurant_id", "3").description(),
      "reviews where restaurant_id = 3"
    );
  }
}
