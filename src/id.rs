use std::fmt;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

/// Address name of a thing inside the publication directory.
///
/// Derived from the identifier bytes only, so every process computes the
/// same address for the same thing. It is not a cryptographic identity:
/// two identifiers may share an address and readers must compare the
/// stored identifier.
#[derive(
    Eq, PartialEq, Hash, Clone, Copy, Debug, Deserialize, Serialize,
)]
pub struct ThingAddr {
    pub id_size: u64,
    pub crc32: u32,
}

impl ThingAddr {
    pub fn compute(thing_id: &str) -> Self {
        let bytes = thing_id.as_bytes();
        let mut hasher = Hasher::new();
        hasher.update(bytes);
        let crc32 = hasher.finalize();
        log::trace!("address of {:?}: crc32 {:#010x}", thing_id, crc32);

        ThingAddr {
            id_size: bytes.len() as u64,
            crc32,
        }
    }
}

impl fmt::Display for ThingAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:08x}", self.id_size, self.crc32)
    }
}
