//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::crypto::CryptoAlgo;

// Authentication key-chain.
#[derive(Clone, Debug, Default, new)]
#[derive(Deserialize, Serialize)]
pub struct Keychain {
    // Name of the key-chain.
    pub name: String,
    // Timestamp of the most recent update to the key-chain.
    #[new(default)]
    pub last_modified: Option<DateTime<Utc>>,
    // List of configured keys, ordered by key ID. Inserting a key whose ID
    // is already present supersedes the previous key.
    #[new(default)]
    pub keys: BTreeMap<u8, KeychainKey>,
}

// Single key in key-chain.
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct KeychainKey {
    // Key's data.
    pub data: Key,
    // The key's send lifetime.
    #[new(default)]
    pub send_lifetime: KeyLifetime,
    // The key's accept lifetime.
    #[new(default)]
    pub accept_lifetime: KeyLifetime,
    // A persistent key remains usable after its lifetimes have elapsed.
    // The flag is set automatically when the last remaining key of a chain
    // expires, so that authenticated adjacencies survive operator mistakes.
    #[new(default)]
    pub persistent: bool,
}

// Authentication key.
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct Key {
    // Numeric value uniquely identifying the key.
    pub id: u8,
    // Cryptographic algorithm associated with the key.
    pub algo: CryptoAlgo,
    // The key string.
    pub string: Vec<u8>,
}

// Key lifetime.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct KeyLifetime {
    // Optional start time.
    pub start: Option<DateTime<Utc>>,
    // Optional end time (`None` means infinite).
    pub end: Option<DateTime<Utc>>,
}

// Key lifecycle state as derived from the send lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyState {
    Pending,
    Active,
    Expired,
}

// ===== impl Keychain =====

impl Keychain {
    // Adds a key to the chain, superseding any previous key with the same ID.
    pub fn add_key(&mut self, key: KeychainKey) {
        self.keys.insert(key.data.id, key);
        self.last_modified = Some(Utc::now());
    }

    // Deletes the key identified by the given ID.
    pub fn delete_key(&mut self, key_id: u8) -> Option<KeychainKey> {
        let key = self.keys.remove(&key_id);
        if key.is_some() {
            self.last_modified = Some(Utc::now());
        }
        key
    }

    // Looks up the key used to send a packet.
    //
    // Among the keys whose send lifetime is active, the one with the earliest
    // start time is selected, so a key in use is not abandoned before it
    // expires just because an overlapping successor became valid.
    pub fn key_lookup_send(&self, now: DateTime<Utc>) -> Option<&Key> {
        self.keys
            .values()
            .filter(|key| key.is_sendable(now))
            .min_by_key(|key| key.send_lifetime.start)
            .map(|key| &key.data)
    }

    // Looks up the key used to accept a packet. The key of the provided key
    // ID is selected only if its accept lifetime is valid.
    pub fn key_lookup_accept(
        &self,
        key_id: u8,
        now: DateTime<Utc>,
    ) -> Option<&Key> {
        self.keys
            .get(&key_id)
            .filter(|key| {
                key.persistent || key.accept_lifetime.is_active(now)
            })
            .map(|key| &key.data)
    }

    // Handles the expiry of the given key's send lifetime.
    //
    // If the expiry would leave the chain with no sendable key, the key is
    // marked persistent instead, preserving protocol continuity until a
    // successor is configured.
    pub fn key_stop(&mut self, key_id: u8, now: DateTime<Utc>) {
        let successor_exists = self
            .keys
            .values()
            .any(|key| key.data.id != key_id && key.is_sendable(now));
        if !successor_exists
            && let Some(key) = self.keys.get_mut(&key_id)
        {
            key.persistent = true;
        }
    }

    // Returns the next send-lifetime boundary after `now`, used to schedule
    // the key-start/key-stop transition timers.
    pub fn next_transition(
        &self,
        now: DateTime<Utc>,
    ) -> Option<(u8, KeyState, DateTime<Utc>)> {
        self.keys
            .values()
            .flat_map(|key| {
                let start = key
                    .send_lifetime
                    .start
                    .filter(|start| *start > now)
                    .map(|start| (key.data.id, KeyState::Active, start));
                let end = key
                    .send_lifetime
                    .end
                    .filter(|end| *end > now)
                    .map(|end| (key.data.id, KeyState::Expired, end));
                [start, end].into_iter().flatten()
            })
            .min_by_key(|(_, _, when)| *when)
    }
}

// ===== impl KeychainKey =====

impl KeychainKey {
    pub fn is_sendable(&self, now: DateTime<Utc>) -> bool {
        self.persistent || self.send_lifetime.is_active(now)
    }

    pub fn state(&self, now: DateTime<Utc>) -> KeyState {
        if self.is_sendable(now) {
            return KeyState::Active;
        }
        match self.send_lifetime.start {
            Some(start) if now < start => KeyState::Pending,
            _ => KeyState::Expired,
        }
    }
}

// ===== impl KeyLifetime =====

impl KeyLifetime {
    // Checks if the key lifetime is active at the given instant.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.start
            && now < start
        {
            return false;
        }
        if let Some(end) = self.end
            && now > end
        {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn key(id: u8, start_secs: i64, end_secs: Option<i64>) -> KeychainKey {
        let epoch = DateTime::UNIX_EPOCH;
        let mut key = KeychainKey::new(Key::new(
            id,
            CryptoAlgo::Md5,
            format!("KEY{id}").into_bytes(),
        ));
        key.send_lifetime = KeyLifetime {
            start: Some(epoch + TimeDelta::seconds(start_secs)),
            end: end_secs.map(|end| epoch + TimeDelta::seconds(end)),
        };
        key.accept_lifetime = key.send_lifetime.clone();
        key
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    #[test]
    fn send_key_selection() {
        let mut keychain = Keychain::new("test".to_owned());
        keychain.add_key(key(1, 0, Some(100)));
        keychain.add_key(key(2, 90, None));

        // Before the overlap only key 1 is valid.
        assert_eq!(keychain.key_lookup_send(at(50)).unwrap().id, 1);
        // During the overlap the earliest-started key wins.
        assert_eq!(keychain.key_lookup_send(at(95)).unwrap().id, 1);
        // After key 1 expires, key 2 takes over.
        assert_eq!(keychain.key_lookup_send(at(101)).unwrap().id, 2);
    }

    #[test]
    fn accept_key_lifetimes() {
        let mut keychain = Keychain::new("test".to_owned());
        keychain.add_key(key(1, 0, Some(100)));
        keychain.add_key(key(2, 90, None));

        assert!(keychain.key_lookup_accept(2, at(50)).is_none());
        assert!(keychain.key_lookup_accept(1, at(95)).is_some());
        assert!(keychain.key_lookup_accept(2, at(95)).is_some());
        assert!(keychain.key_lookup_accept(1, at(101)).is_none());
    }

    #[test]
    fn last_key_becomes_persistent() {
        let mut keychain = Keychain::new("test".to_owned());
        keychain.add_key(key(1, 0, Some(100)));

        keychain.key_stop(1, at(100));
        assert!(keychain.keys[&1].persistent);
        assert_eq!(keychain.key_lookup_send(at(5000)).unwrap().id, 1);
        assert!(keychain.key_lookup_accept(1, at(5000)).is_some());
    }

    #[test]
    fn key_stop_with_successor() {
        let mut keychain = Keychain::new("test".to_owned());
        keychain.add_key(key(1, 0, Some(100)));
        keychain.add_key(key(2, 90, None));

        keychain.key_stop(1, at(100));
        assert!(!keychain.keys[&1].persistent);
        assert_eq!(keychain.key_lookup_send(at(101)).unwrap().id, 2);
    }

    #[test]
    fn id_conflict_supersedes() {
        let mut keychain = Keychain::new("test".to_owned());
        keychain.add_key(key(1, 0, Some(100)));
        keychain.add_key(key(1, 50, None));

        assert_eq!(keychain.keys.len(), 1);
        assert_eq!(
            keychain.keys[&1].send_lifetime.start,
            Some(at(50))
        );
    }
}
