use crate::error::LatticeError;
use crate::object::{DirtyBits, Distributable};

/// A distributed name. Embedded by objects that carry one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Named {
    name: String,
    dirty: bool,
}

impl Named {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dirty: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.dirty = true;
    }
}

impl Distributable for Named {
    fn dirty_bits(&self) -> DirtyBits {
        if self.dirty {
            DirtyBits::NAME
        } else {
            DirtyBits::empty()
        }
    }

    fn serialize(&self, bits: DirtyBits) -> Result<Vec<u8>, LatticeError> {
        if bits.contains(DirtyBits::NAME) {
            Ok(bincode::serialize(&self.name)?)
        } else {
            Ok(Vec::new())
        }
    }

    fn deserialize(&mut self, bits: DirtyBits, bytes: &[u8]) -> Result<(), LatticeError> {
        if bits.contains(DirtyBits::NAME) {
            self.name = bincode::deserialize(bytes)?;
        }
        Ok(())
    }

    fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}
