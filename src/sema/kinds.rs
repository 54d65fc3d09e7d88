//! Bitmasks describing which element kinds and shapes an operator or intrinsic accepts.

use bitflags::bitflags;

use crate::types::ScalarKind;

bitflags! {
    pub struct KindMask: u32 {
        const BOOL = 0b0001;
        const INT = 0b0010;
        const UINT = 0b0100;
        const FLOAT = 0b1000;

        const INTEGER = Self::INT.bits | Self::UINT.bits;
        const NUMERIC = Self::INTEGER.bits | Self::FLOAT.bits;
        const SIGNED = Self::INT.bits | Self::FLOAT.bits;

        const ALL = Self::NUMERIC.bits | Self::BOOL.bits;
    }
}
impl From<ScalarKind> for KindMask {
    fn from(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Bool => KindMask::BOOL,
            ScalarKind::Int => KindMask::INT,
            ScalarKind::Uint => KindMask::UINT,
            ScalarKind::Float => KindMask::FLOAT,
        }
    }
}
impl KindMask {
    pub fn accepts(&self, kind: ScalarKind) -> bool {
        self.contains(kind.into())
    }

    /// Human readable list for diagnostics
    pub fn describe(&self) -> String {
        let names: Vec<&str> = [
            (KindMask::BOOL, "bool"),
            (KindMask::INT, "int"),
            (KindMask::UINT, "uint"),
            (KindMask::FLOAT, "float"),
        ]
        .iter()
        .filter(|(m, _)| self.contains(*m))
        .map(|(_, n)| *n)
        .collect();
        names.join("/")
    }
}

bitflags! {
    pub struct ShapeMask: u32 {
        const SCALAR = 0b001;
        const VECTOR = 0b010;
        const MATRIX = 0b100;

        const SCALAR_OR_VECTOR = Self::SCALAR.bits | Self::VECTOR.bits;
    }
}
