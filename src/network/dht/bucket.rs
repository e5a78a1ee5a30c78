use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::contact::Contact;
use super::identifier::Identifier;

/// K-bucket size (Kademlia parameter)
pub const K: usize = 20;

/// Result of offering a contact to a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The contact was new and there was room for it.
    Inserted,
    /// The contact was already present and moved to the most-recently-seen end.
    Refreshed,
    /// The bucket is full. Nothing changed; the caller decides whether the
    /// least-recently-seen contact should make way.
    Full { least_recently_seen: Contact },
}

/// A K-bucket: the contacts whose distance from the owning node has bit
/// length `index + 1` (bucket 0 also holds distance zero).
///
/// Contacts are kept oldest first, so the head is the least-recently-seen one.
#[derive(Debug)]
pub struct Bucket {
    index: usize,
    prefix: Identifier,
    capacity: usize,
    contacts: Mutex<VecDeque<Contact>>,
}

impl Bucket {
    pub fn new(index: usize, capacity: usize) -> Self {
        Self {
            index,
            prefix: Identifier::with_bit(index),
            capacity,
            contacts: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// `2^index`, the lowest distance this bucket is responsible for
    /// (apart from bucket 0, which also covers zero).
    pub fn prefix(&self) -> &Identifier {
        &self.prefix
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a distance falls in this bucket's range.
    pub fn covers(&self, distance: &Identifier) -> bool {
        let bits = distance.bit_length();
        if self.index == 0 {
            bits <= 1
        } else {
            bits == self.index + 1
        }
    }

    /// Add or refresh a contact
    pub fn insert(&self, contact: Contact) -> InsertOutcome {
        let mut contacts = self.contacts.lock();

        if let Some(pos) = contacts.iter().position(|c| c == &contact) {
            // Move to back (most recently seen)
            if let Some(existing) = contacts.remove(pos) {
                contacts.push_back(existing);
            }
            return InsertOutcome::Refreshed;
        }

        if contacts.len() < self.capacity {
            contacts.push_back(contact);
            return InsertOutcome::Inserted;
        }

        match contacts.front() {
            Some(oldest) => {
                debug!("Bucket {} full, not inserting {}", self.index, contact);
                InsertOutcome::Full {
                    least_recently_seen: oldest.clone(),
                }
            }
            // capacity 0: nothing can ever be evicted in favour of the newcomer
            None => InsertOutcome::Full {
                least_recently_seen: contact,
            },
        }
    }

    /// Remove a contact from the bucket
    pub fn remove(&self, contact: &Contact) -> bool {
        let mut contacts = self.contacts.lock();
        if let Some(pos) = contacts.iter().position(|c| c == contact) {
            contacts.remove(pos);
            return true;
        }
        false
    }

    pub fn contains(&self, contact: &Contact) -> bool {
        self.contacts.lock().iter().any(|c| c == contact)
    }

    pub fn least_recently_seen(&self) -> Option<Contact> {
        self.contacts.lock().front().cloned()
    }

    /// Evict `stale` in favour of `fresh`, provided `stale` is still the
    /// least-recently-seen contact. Returns false (and changes nothing) when
    /// another worker touched the bucket in the meantime.
    pub fn replace_least_recently_seen(&self, stale: &Contact, fresh: Contact) -> bool {
        let mut contacts = self.contacts.lock();

        if contacts.front() != Some(stale) || contacts.contains(&fresh) {
            return false;
        }

        contacts.pop_front();
        contacts.push_back(fresh);
        true
    }

    /// Copy of the contacts, oldest first
    pub fn snapshot(&self) -> Vec<Contact> {
        self.contacts.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.contacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.contacts.lock().len() >= self.capacity
    }
}
