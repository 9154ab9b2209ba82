//! Distributed objects.
//!
//! An object tracks which of its fields changed since it was last
//! committed. Committing serializes only those fields; the receiving side
//! applies them with the same dirty mask.

mod head;
mod named;

pub use head::HeadMatrix;
pub use named::Named;

use bitflags::bitflags;

use crate::error::LatticeError;

bitflags! {
    /// Field groups of a distributed object. Bits from `CUSTOM` upwards are
    /// free for subclasses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyBits: u64 {
        const NAME = 1 << 0;
        const FILL1 = 1 << 1;
        const FILL2 = 1 << 2;
        const CUSTOM = 1 << 3;
        const ALL = u64::MAX;
    }
}

/// Something whose changed state can be shipped to remote instances.
pub trait Distributable {
    fn dirty_bits(&self) -> DirtyBits;

    /// Serialize the fields selected by `bits`.
    fn serialize(&self, bits: DirtyBits) -> Result<Vec<u8>, LatticeError>;

    /// Apply fields produced by `serialize` with the same `bits`.
    fn deserialize(&mut self, bits: DirtyBits, bytes: &[u8]) -> Result<(), LatticeError>;

    fn clear_dirty(&mut self);

    fn is_dirty(&self) -> bool {
        !self.dirty_bits().is_empty()
    }

    /// Everything a fresh remote instance needs.
    fn instance_data(&self) -> Result<Vec<u8>, LatticeError> {
        self.serialize(DirtyBits::ALL)
    }

    /// Serialize the dirty fields and mark the object clean.
    ///
    /// Returns `None` when nothing changed.
    fn pack(&mut self) -> Result<Option<(DirtyBits, Vec<u8>)>, LatticeError> {
        let bits = self.dirty_bits();
        if bits.is_empty() {
            return Ok(None);
        }
        let data = self.serialize(bits)?;
        self.clear_dirty();
        Ok(Some((bits, data)))
    }
}
