use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use codec::{INITIATOR_ADDRESS, KEY_LENGTH, is_responder_id};
use parking_lot::{Mutex, RwLock};

use crate::{client::Client, error::SignalingError, transport::Transport};

// One initiator slot plus 253 responder slots, indexed by address.
const SLOT_COUNT: usize = 256;

/// A rendezvous path, identified by the initiator's permanent public key.
pub struct Path<T> {
    key: [u8; KEY_LENGTH],
    slots: Mutex<Vec<Option<Arc<Client<T>>>>>,
}

impl<T: Transport> Path<T> {
    fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self {
            key,
            slots: Mutex::new(vec![None; SLOT_COUNT]),
        }
    }

    pub fn key(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    pub fn get_initiator(&self) -> Option<Arc<Client<T>>> {
        self.slots.lock()[INITIATOR_ADDRESS as usize].clone()
    }

    /// Place a client into the initiator slot, unconditionally replacing
    /// any previous occupant, which is returned for the caller to drop.
    pub fn set_initiator(&self, client: &Arc<Client<T>>) -> Option<Arc<Client<T>>> {
        let previous = {
            let mut slots = self.slots.lock();
            std::mem::replace(&mut slots[INITIATOR_ADDRESS as usize], Some(client.clone()))
        };

        client.set_authenticated(INITIATOR_ADDRESS);
        previous
    }

    pub fn get_responder(&self, id: u8) -> Option<Arc<Client<T>>> {
        if !is_responder_id(id) {
            return None;
        }

        self.slots.lock()[id as usize].clone()
    }

    /// Identifiers of all occupied responder slots, ascending.
    pub fn responder_ids(&self) -> Vec<u8> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter(|(id, slot)| is_responder_id(*id as u8) && slot.is_some())
            .map(|(id, _)| id as u8)
            .collect()
    }

    /// Assign the first free responder slot, scanning 0x02..0xff
    /// ascending.
    pub fn add_responder(&self, client: &Arc<Client<T>>) -> Result<u8, SignalingError> {
        let id = {
            let mut slots = self.slots.lock();
            let Some(id) = (0x02_usize..0xff).find(|id| slots[*id].is_none()) else {
                return Err(SignalingError::SlotsFull);
            };

            slots[id] = Some(client.clone());
            id as u8
        };

        client.set_authenticated(id);
        Ok(id)
    }

    /// Remove a client from its slot, comparing identity rather than
    /// address: when a successor has already replaced the occupant, the
    /// slot is left untouched.
    pub fn remove_client(&self, client: &Arc<Client<T>>) {
        if !client.authenticated() {
            return;
        }

        let id = client.id() as usize;
        let mut slots = self.slots.lock();
        if let Some(occupant) = &slots[id] {
            if Arc::ptr_eq(occupant, client) {
                slots[id] = None;
            }
        }
    }

    /// Whether every slot is unoccupied.
    ///
    /// As a side effect, clients whose transport has terminated but whose
    /// removal is still pending are swept out. This reconciliation is
    /// best-effort: it stops at the first live client.
    pub fn is_empty(&self) -> bool {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            match slot {
                None => {}
                Some(client) if client.is_closed() => {
                    log::debug!("removed dead client: id=0x{:02x}", client.id());
                    *slot = None;
                }
                Some(_) => return false,
            }
        }

        true
    }
}

/// Registry of live paths, keyed by the initiator's permanent key.
///
/// Paths are created lazily on first reference and reaped once no slot
/// is occupied.
pub struct PathManager<T> {
    paths: RwLock<HashMap<[u8; KEY_LENGTH], Arc<Path<T>>>>,
}

impl<T: Transport> Default for PathManager<T> {
    fn default() -> Self {
        Self {
            paths: RwLock::new(HashMap::with_capacity(32)),
        }
    }
}

impl<T: Transport> PathManager<T> {
    pub fn get_or_create(&self, key: [u8; KEY_LENGTH]) -> Arc<Path<T>> {
        {
            if let Some(path) = self.paths.read().get(&key) {
                return path.clone();
            }
        }

        self.paths
            .write()
            .entry(key)
            .or_insert_with(|| {
                log::debug!("created new path: {}", hex::encode(key));
                Arc::new(Path::new(key))
            })
            .clone()
    }

    /// Reap the path if it has no occupied slots left.
    pub fn reap(&self, path: &Path<T>) {
        if path.is_empty() && self.paths.write().remove(&path.key).is_some() {
            log::debug!("removed empty path: {}", hex::encode(path.key));
        }
    }

    pub fn len(&self) -> usize {
        self.paths.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.read().is_empty()
    }
}
