//! Status codes returned across the trust boundary.

use thiserror::Error;

/// Outcome of a service invocation as seen by the normal world.
///
/// The set is deliberately coarse: it lets a caller tell bad input from an
/// authentication failure from resource exhaustion, and nothing more.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum Status {
    /// Request completed.
    #[error("success")]
    Success,
    /// Unspecified failure.
    #[error("generic failure")]
    Generic,
    /// A buffer failed its access-rights check or could not be resolved.
    #[error("access denied")]
    AccessDenied,
    /// Malformed request: wrong parameter types, unknown command, bad values.
    #[error("bad parameters")]
    BadParameters,
    /// Requested object does not exist.
    #[error("item not found")]
    ItemNotFound,
    /// Out of memory in the secure world.
    #[error("out of memory")]
    OutOfMemory,
    /// Image failed decryption or signature verification.
    #[error("security violation")]
    SecurityError,
    /// A supplied buffer is too small for the request.
    #[error("short buffer")]
    ShortBuffer,
    /// The session is already servicing a request.
    #[error("busy")]
    Busy,
    /// The decrypted image content is inconsistent.
    #[error("corrupt object")]
    CorruptObject,
    /// The session or connection went away.
    #[error("communication failure")]
    Communication,
}

impl Status {
    /// Numeric code on the wire.
    pub const fn code(self) -> u32 {
        match self {
            Self::Success => 0x0000_0000,
            Self::Generic => 0xFFFF_0000,
            Self::AccessDenied => 0xFFFF_0001,
            Self::BadParameters => 0xFFFF_0006,
            Self::ItemNotFound => 0xFFFF_0008,
            Self::OutOfMemory => 0xFFFF_000C,
            Self::Communication => 0xFFFF_000E,
            Self::SecurityError => 0xFFFF_000F,
            Self::ShortBuffer => 0xFFFF_0010,
            Self::Busy => 0xFFFF_000D,
            Self::CorruptObject => 0xF010_0001,
        }
    }

    /// Decode a wire code. Unknown codes collapse to [`Status::Generic`].
    pub const fn from_code(code: u32) -> Self {
        match code {
            0x0000_0000 => Self::Success,
            0xFFFF_0001 => Self::AccessDenied,
            0xFFFF_0006 => Self::BadParameters,
            0xFFFF_0008 => Self::ItemNotFound,
            0xFFFF_000C => Self::OutOfMemory,
            0xFFFF_000D => Self::Busy,
            0xFFFF_000E => Self::Communication,
            0xFFFF_000F => Self::SecurityError,
            0xFFFF_0010 => Self::ShortBuffer,
            0xF010_0001 => Self::CorruptObject,
            _ => Self::Generic,
        }
    }

    /// True for [`Status::Success`].
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_survive_the_wire() {
        for status in [
            Status::Success,
            Status::AccessDenied,
            Status::BadParameters,
            Status::ItemNotFound,
            Status::OutOfMemory,
            Status::Busy,
            Status::Communication,
            Status::SecurityError,
            Status::ShortBuffer,
            Status::CorruptObject,
        ] {
            assert_eq!(Status::from_code(status.code()), status);
        }
    }

    #[test]
    fn unknown_code_is_generic() {
        assert_eq!(Status::from_code(0x1234), Status::Generic);
    }
}
