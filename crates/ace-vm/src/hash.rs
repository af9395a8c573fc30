//! FNV-1 member-name hashing (§3, §6.1: "Member-name hashing is FNV-1 over raw UTF-8 bytes").
//!
//! Deliberately hand-rolled rather than pulled from the `fnv` crate: that crate implements
//! FNV-1a (XOR before multiply), while the wire format is specified as FNV-1 (multiply before
//! XOR) so that hashes computed by the emitter at compile time match hashes computed here at
//! run time bit-for-bit. Using the wrong variant would silently desynchronize `LOAD_MEM_HASH`
//! lookups from `MOV_MEM_HASH` stores compiled against the real emitter.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Computes the 32-bit FNV-1 hash of `bytes`, matching the emitter's member-name hashing.
#[must_use]
pub fn fnv1(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash = hash.wrapping_mul(FNV_PRIME);
        hash ^= u32::from(byte);
    }
    hash
}
