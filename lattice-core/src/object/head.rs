use serde::{Deserialize, Serialize};

use crate::error::LatticeError;
use crate::object::{DirtyBits, Distributable, Named};

/// Matrix field of [`HeadMatrix`].
const DIRTY_MATRIX: DirtyBits = DirtyBits::CUSTOM;

pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

#[derive(Serialize, Deserialize)]
struct HeadDelta {
    name: Option<String>,
    matrix: Option<[f32; 16]>,
}

/// Tracked head pose, distributed to every worker each time it changes.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadMatrix {
    named: Named,
    matrix: [f32; 16],
    matrix_dirty: bool,
}

impl HeadMatrix {
    pub fn new() -> Self {
        Self {
            named: Named::new("head"),
            matrix: IDENTITY,
            matrix_dirty: false,
        }
    }

    pub fn name(&self) -> &str {
        self.named.name()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.named.set_name(name);
    }

    /// Column-major 4x4 matrix.
    pub fn matrix(&self) -> &[f32; 16] {
        &self.matrix
    }

    pub fn set_matrix(&mut self, matrix: [f32; 16]) {
        if self.matrix != matrix {
            self.matrix = matrix;
            self.matrix_dirty = true;
        }
    }
}

impl Default for HeadMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl Distributable for HeadMatrix {
    fn dirty_bits(&self) -> DirtyBits {
        let mut bits = self.named.dirty_bits();
        if self.matrix_dirty {
            bits |= DIRTY_MATRIX;
        }
        bits
    }

    fn serialize(&self, bits: DirtyBits) -> Result<Vec<u8>, LatticeError> {
        let delta = HeadDelta {
            name: bits
                .contains(DirtyBits::NAME)
                .then(|| self.named.name().to_string()),
            matrix: bits.contains(DIRTY_MATRIX).then_some(self.matrix),
        };
        Ok(bincode::serialize(&delta)?)
    }

    fn deserialize(&mut self, bits: DirtyBits, bytes: &[u8]) -> Result<(), LatticeError> {
        let delta: HeadDelta = bincode::deserialize(bytes)?;
        if bits.contains(DirtyBits::NAME) {
            if let Some(name) = delta.name {
                self.named.set_name(name);
                self.named.clear_dirty();
            }
        }
        if bits.contains(DIRTY_MATRIX) {
            if let Some(matrix) = delta.matrix {
                self.matrix = matrix;
            }
        }
        Ok(())
    }

    fn clear_dirty(&mut self) {
        self.named.clear_dirty();
        self.matrix_dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translated(z: f32) -> [f32; 16] {
        let mut m = IDENTITY;
        m[14] = z;
        m
    }

    #[test]
    fn only_changed_fields_ship() {
        let mut head = HeadMatrix::new();
        head.clear_dirty();
        head.set_matrix(translated(-2.0));
        assert_eq!(head.dirty_bits(), DIRTY_MATRIX);

        let (bits, data) = head.pack().unwrap().unwrap();
        let mut remote = HeadMatrix::new();
        remote.set_name("stale");
        remote.clear_dirty();
        remote.deserialize(bits, &data).unwrap();

        assert_eq!(remote.matrix(), &translated(-2.0));
        assert_eq!(remote.name(), "stale");
    }

    #[test]
    fn instance_data_carries_everything() {
        let mut head = HeadMatrix::new();
        head.set_name("tracker-0");
        head.set_matrix(translated(1.5));

        let data = head.instance_data().unwrap();
        let mut remote = HeadMatrix::new();
        remote.deserialize(DirtyBits::ALL, &data).unwrap();
        assert_eq!(remote.name(), "tracker-0");
        assert_eq!(remote.matrix(), &translated(1.5));
    }

    #[test]
    fn setting_same_matrix_is_not_a_change() {
        let mut head = HeadMatrix::new();
        head.clear_dirty();
        head.set_matrix(IDENTITY);
        assert!(head.pack().unwrap().is_none());
    }
}
