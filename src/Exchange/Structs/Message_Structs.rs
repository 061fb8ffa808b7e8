// Message contract for the fixed-layout records exchanged through a slot.

use sha2::{Digest, Sha256};
use std::mem::{align_of, size_of};

/// A fixed-layout record that can be placed in a shared slot buffer.
///
/// # Safety
/// Implementors must be `#[repr(C)]` plain data: every bit pattern written by
/// the peer process must be a valid value (integers, floats, arrays of them),
/// with no pointers, references or niches. Both processes must agree on the
/// layout; `SCHEMA` names it and feeds the schema id checked at attach time.
pub unsafe trait Message: Copy + Default + Send + Sync + 'static {
    /// Stable schema name, e.g. `"abr.observation.v1"`.
    const SCHEMA: &'static str;
}

/// Size, alignment and schema id of one slot's observation/action pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotLayout {
    pub observation_size: u32,
    pub observation_align: u32,
    pub action_size: u32,
    pub action_align: u32,
    pub schema_id: u64,
}

impl SlotLayout {
    /// Layout of the `(O, A)` pair.
    pub fn of<O: Message, A: Message>() -> Self {
        let observation_size = size_of::<O>() as u32;
        let observation_align = align_of::<O>() as u32;
        let action_size = size_of::<A>() as u32;
        let action_align = align_of::<A>() as u32;
        Self {
            observation_size,
            observation_align,
            action_size,
            action_align,
            schema_id: schema_id(
                (O::SCHEMA, observation_size, observation_align),
                (A::SCHEMA, action_size, action_align),
            ),
        }
    }

    /// Layout described by raw numbers, for peers that are not Rust types
    /// (the C surface). Alignments must be powers of two.
    pub fn raw(
        observation_size: u32,
        observation_align: u32,
        action_size: u32,
        action_align: u32,
        schema_id: u64,
    ) -> Self {
        Self {
            observation_size,
            observation_align,
            action_size,
            action_align,
            schema_id,
        }
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        self.observation_align.is_power_of_two() && self.action_align.is_power_of_two()
    }
}

/// First eight bytes of SHA-256 over both schema names, sizes and alignments.
pub fn schema_id(observation: (&str, u32, u32), action: (&str, u32, u32)) -> u64 {
    let mut hasher = Sha256::new();
    for (name, size, align) in [observation, action] {
        hasher.update((name.len() as u32).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(size.to_le_bytes());
        hasher.update(align.to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(id)
}
