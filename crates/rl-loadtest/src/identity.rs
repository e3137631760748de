//! Virtual user identifiers
//!
//! An identifier is the archetype prefix followed by a random suffix of
//! [`SUFFIX_LEN`] characters drawn uniformly from `[A-Za-z0-9]`. The system
//! under test buckets its rate-limit accounting by this value.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::profile::Archetype;

/// Length of the random identifier suffix
pub const SUFFIX_LEN: usize = 8;

/// Generate `prefix` + 8 alphanumeric characters from `rng`
pub fn generate_identifier<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    let mut identifier = String::with_capacity(prefix.len() + SUFFIX_LEN);
    identifier.push_str(prefix);
    identifier.extend((0..SUFFIX_LEN).map(|_| char::from(rng.sample(Alphanumeric))));
    identifier
}

/// Archetype whose prefix starts `identifier`, if any
pub fn archetype_of(identifier: &str) -> Option<Archetype> {
    Archetype::ALL
        .into_iter()
        .find(|a| identifier.starts_with(a.as_str()))
}

/// Check the shape of a generated identifier: a known prefix and exactly
/// eight ASCII alphanumeric characters after it.
pub fn is_valid_identifier(identifier: &str) -> bool {
    let Some(archetype) = archetype_of(identifier) else {
        return false;
    };
    let suffix = &identifier[archetype.as_str().len()..];
    suffix.len() == SUFFIX_LEN && suffix.bytes().all(|b| b.is_ascii_alphanumeric())
}
