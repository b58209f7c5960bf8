//! Parameter-type packing for service invocations.
//!
//! Every invocation carries four parameter slots. Their types travel
//! separately from the values as four nibbles packed into one `u32`, so the
//! receiving side can refuse a request before touching any buffer.

use core::fmt;

/// Number of parameter slots in every invocation.
pub const NUM_PARAMS: usize = 4;

/// Type of a single parameter slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParamType {
    /// Unused slot.
    None = 0,
    /// Two scalars passed in.
    ValueInput = 1,
    /// Two scalars passed out.
    ValueOutput = 2,
    /// Two scalars passed both ways.
    ValueInout = 3,
    /// Buffer read by the service.
    MemrefInput = 5,
    /// Buffer written by the service.
    MemrefOutput = 6,
    /// Buffer read and written by the service.
    MemrefInout = 7,
}

impl ParamType {
    /// Decode a nibble. Unassigned values yield `None` in the `Option` sense.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0 => Some(Self::None),
            1 => Some(Self::ValueInput),
            2 => Some(Self::ValueOutput),
            3 => Some(Self::ValueInout),
            5 => Some(Self::MemrefInput),
            6 => Some(Self::MemrefOutput),
            7 => Some(Self::MemrefInout),
            _ => None,
        }
    }

    /// True for the memory-reference types.
    pub fn is_memref(self) -> bool {
        matches!(
            self,
            Self::MemrefInput | Self::MemrefOutput | Self::MemrefInout
        )
    }
}

/// The four slot types of one invocation, packed on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamTypes(u32);

impl ParamTypes {
    /// Pack four slot types.
    pub const fn new(p0: ParamType, p1: ParamType, p2: ParamType, p3: ParamType) -> Self {
        Self((p0 as u32) | ((p1 as u32) << 4) | ((p2 as u32) << 8) | ((p3 as u32) << 12))
    }

    /// Wrap a raw packed value received from the other side.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Packed representation.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Type of slot `index`, or `None` if the index is out of range or the
    /// nibble is unassigned.
    pub fn get(self, index: usize) -> Option<ParamType> {
        if index >= NUM_PARAMS {
            return None;
        }
        ParamType::from_nibble(((self.0 >> (index * 4)) & 0xf) as u8)
    }
}

impl fmt::Debug for ParamTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParamTypes({:#06x})", self.0)
    }
}

/// Slot types required by [`crate::command::LOAD_FIRMWARE`]: ciphertext in,
/// secure firmware buffer out, descriptor out, core count in.
pub const LOAD_FIRMWARE_PARAM_TYPES: ParamTypes = ParamTypes::new(
    ParamType::MemrefInput,
    ParamType::MemrefOutput,
    ParamType::MemrefOutput,
    ParamType::ValueInput,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_firmware_types_pack_to_0x1665() {
        assert_eq!(LOAD_FIRMWARE_PARAM_TYPES.raw(), 0x1665);
    }

    #[test]
    fn unpacks_each_slot() {
        let t = LOAD_FIRMWARE_PARAM_TYPES;
        assert_eq!(t.get(0), Some(ParamType::MemrefInput));
        assert_eq!(t.get(1), Some(ParamType::MemrefOutput));
        assert_eq!(t.get(2), Some(ParamType::MemrefOutput));
        assert_eq!(t.get(3), Some(ParamType::ValueInput));
        assert_eq!(t.get(4), None);
    }

    #[test]
    fn unassigned_nibble_is_rejected() {
        assert_eq!(ParamTypes::from_raw(0x4).get(0), None);
    }
}
