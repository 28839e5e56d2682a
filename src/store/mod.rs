//! Persistence over sled trees. Each record type gets an extension trait on
//! `sled::Db`; records are bincode-encoded, ids come from `generate_id()`,
//! and uniqueness constraints are secondary-index trees written inside the
//! same transaction as the record.

pub mod activity;
pub mod lists;
pub mod reviews;
pub mod users;

pub fn serialize_id(id: u64) -> [u8; 8] {
    id.to_le_bytes()
}

pub fn deserialize_id<V: AsRef<[u8]>>(id: V) -> u64 {
    u64::from_le_bytes(id.as_ref().try_into().unwrap())
}

// Big-endian so composite keys sort by the prefix.
pub fn prefix_key(prefix: u64) -> [u8; 8] {
    prefix.to_be_bytes()
}

pub fn composite_key(prefix: u64, id: u64) -> Vec<u8> {
    let mut key = prefix.to_be_bytes().to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}
