//! Membership digest used to detect duplicate conversations.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Stable digest of a member-id set: ids rendered as hyphenated UUIDs,
/// sorted, joined with `,`, SHA-256, hex. Input order is irrelevant.
pub fn members_hash(ids: &[Uuid]) -> String {
    let mut rendered: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    rendered.sort();
    let digest = Sha256::digest(rendered.join(",").as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_order_insensitive() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        assert_eq!(members_hash(&[a, b, c]), members_hash(&[c, a, b]));
        assert_eq!(members_hash(&[a, b]), members_hash(&[b, a]));
    }

    #[test]
    fn distinct_sets_differ() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        assert_ne!(members_hash(&[a, b]), members_hash(&[a, c]));
        assert_ne!(members_hash(&[a]), members_hash(&[a, b]));
    }
}
