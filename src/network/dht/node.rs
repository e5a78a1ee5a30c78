use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

use super::bucket::{Bucket, K};
use super::contact::Contact;
use super::identifier::{Identifier, LENGTH};

/// Number of buckets a node owns, one per possible distance bit length.
pub const BUCKET_COUNT: usize = LENGTH;

/// A locally hosted DHT identity and its routing table.
///
/// Buckets are allocated eagerly: bucket `i` holds contacts whose distance
/// from this node has bit length `i + 1`, bucket 0 additionally holds
/// distance zero.
pub struct Node {
    id: Identifier,
    buckets: Vec<Bucket>,
    values: RwLock<HashMap<Identifier, Vec<u8>>>,
}

impl Node {
    pub fn new(id: Identifier) -> Self {
        Self::with_bucket_capacity(id, K)
    }

    pub fn random() -> Self {
        Self::new(Identifier::random())
    }

    pub fn with_bucket_capacity(id: Identifier, capacity: usize) -> Self {
        let buckets = (0..BUCKET_COUNT)
            .map(|index| Bucket::new(index, capacity))
            .collect();

        Self {
            id,
            buckets,
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Always in `0..BUCKET_COUNT`.
    pub fn bucket_index(&self, id: &Identifier) -> usize {
        let distance = self.id.distance(id);
        if distance.is_zero() {
            0
        } else {
            distance.bit_length() - 1
        }
    }

    pub fn bucket_for(&self, id: &Identifier) -> &Bucket {
        &self.buckets[self.bucket_index(id)]
    }

    pub fn bucket_at(&self, index: usize) -> Option<&Bucket> {
        self.buckets.get(index)
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// The `count` known contacts closest to `target`.
    pub fn closest_contacts(&self, target: &Identifier, count: usize) -> Vec<Contact> {
        let mut all_contacts: Vec<Contact> = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.snapshot())
            .collect();

        all_contacts.sort_by_key(|c| c.id.distance(target));
        all_contacts.truncate(count);
        all_contacts
    }

    pub fn contact_count(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn store_value(&self, key: Identifier, value: Vec<u8>) -> Option<Vec<u8>> {
        self.values.write().insert(key, value)
    }

    pub fn value(&self, key: &Identifier) -> Option<Vec<u8>> {
        self.values.read().get(key).cloned()
    }

    pub fn value_count(&self) -> usize {
        self.values.read().len()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("contacts", &self.contact_count())
            .field("values", &self.value_count())
            .finish()
    }
}
