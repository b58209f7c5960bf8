//! Client side of the secure transport.
//!
//! A [`Session`] wraps one transport session. Shared memory registered
//! through it is released, and the session closed, when the wrapper drops,
//! so an early return at any step leaves nothing behind.

use sedget_spec::params::NUM_PARAMS;
use sedget_spec::{command, MemFd, ParamType, ParamTypes, Status, Uuid, SEDGET_VIDEO_UUID};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::SedgetError;

/// Identifier of a registered shared-memory region within a session.
pub type ShmId = u32;

/// Where a failure was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// The client library.
    Api,
    /// The channel between the worlds.
    Comms,
    /// The secure OS.
    Tee,
    /// The trusted service itself.
    TrustedApp,
}

/// Session and shared-memory failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The service could not be reached.
    #[error("cannot open session to {uuid}: {status}")]
    OpenSession {
        /// Service addressed.
        uuid: String,
        /// Reported cause.
        status: Status,
    },
    /// A region could not be registered.
    #[error("cannot register {fd:?} ({len} bytes) as shared memory")]
    Register {
        /// Region handle.
        fd: MemFd,
        /// Requested length.
        len: usize,
    },
    /// An invocation failed before the service produced a result.
    #[error("invoke failed at {origin:?}: {status}")]
    Invoke {
        /// Reported cause.
        status: Status,
        /// Where it was detected.
        origin: ErrorOrigin,
    },
}

/// Failure of [`TransportSession::invoke`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeError {
    /// Reported cause.
    pub status: Status,
    /// Where it was detected.
    pub origin: ErrorOrigin,
}

impl From<InvokeError> for SedgetError {
    fn from(err: InvokeError) -> Self {
        match err.origin {
            ErrorOrigin::TrustedApp => SedgetError::Rejected(err.status),
            origin => SedgetError::Transport(TransportError::Invoke {
                status: err.status,
                origin,
            }),
        }
    }
}

/// One parameter slot as the client fills it in.
#[derive(Debug, Default)]
pub enum ClientParam<'a> {
    /// Unused.
    #[default]
    None,
    /// Temporary buffer copied to the service.
    TempInput(&'a [u8]),
    /// Temporary buffer the service fills in.
    TempOutput(&'a mut [u8]),
    /// Window into registered shared memory, written by the service.
    PartialOutput {
        /// Registered region.
        shm: ShmId,
        /// Start of the window.
        offset: usize,
        /// Length of the window.
        size: usize,
    },
    /// Two scalars passed in.
    ValueInput {
        /// First value.
        a: u32,
        /// Second value.
        b: u32,
    },
}

impl ClientParam<'_> {
    /// Type nibble announced for this slot.
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::None => ParamType::None,
            Self::TempInput(_) => ParamType::MemrefInput,
            Self::TempOutput(_) | Self::PartialOutput { .. } => ParamType::MemrefOutput,
            Self::ValueInput { .. } => ParamType::ValueInput,
        }
    }
}

/// The four parameter slots of one invocation.
#[derive(Debug, Default)]
pub struct Operation<'a> {
    /// Slots in order.
    pub params: [ClientParam<'a>; NUM_PARAMS],
}

impl<'a> Operation<'a> {
    /// Operation over the given slots.
    pub fn new(params: [ClientParam<'a>; NUM_PARAMS]) -> Self {
        Self { params }
    }

    /// Packed slot types.
    pub fn param_types(&self) -> ParamTypes {
        let [a, b, c, d] = &self.params;
        ParamTypes::new(a.param_type(), b.param_type(), c.param_type(), d.param_type())
    }
}

/// Something that can reach the secure service.
pub trait SecureTransport: Send + Sync {
    /// Open a session to the service identified by `uuid`.
    fn open_session(&self, uuid: &Uuid) -> Result<Box<dyn TransportSession + '_>, TransportError>;
}

/// An open session.
pub trait TransportSession {
    /// Make the region behind `fd` addressable by the service.
    fn register_shared_memory(&mut self, fd: MemFd, len: usize) -> Result<ShmId, TransportError>;
    /// Undo a registration.
    fn release_shared_memory(&mut self, shm: ShmId);
    /// Run `command` with `op`; temporary outputs are copied back.
    fn invoke(&mut self, command: u32, op: &mut Operation<'_>) -> Result<(), InvokeError>;
    /// End the session.
    fn close(&mut self);
}

/// Scoped session: registrations are released and the session closed on
/// drop.
pub struct Session<'t> {
    inner: Box<dyn TransportSession + 't>,
    registered: Vec<ShmId>,
}

impl<'t> Session<'t> {
    /// Open a session through `transport`.
    pub fn open<T: SecureTransport + ?Sized>(
        transport: &'t T,
        uuid: &Uuid,
    ) -> Result<Self, TransportError> {
        let inner = transport.open_session(uuid)?;
        debug!(%uuid, "session opened");
        Ok(Self {
            inner,
            registered: Vec::new(),
        })
    }

    /// Register shared memory for the lifetime of this session.
    pub fn register_shared_memory(&mut self, fd: MemFd, len: usize) -> Result<ShmId, TransportError> {
        let shm = self.inner.register_shared_memory(fd, len)?;
        self.registered.push(shm);
        Ok(shm)
    }

    /// Run one command.
    pub fn invoke(&mut self, command: u32, op: &mut Operation<'_>) -> Result<(), InvokeError> {
        self.inner.invoke(command, op)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        for shm in self.registered.drain(..).rev() {
            self.inner.release_shared_memory(shm);
        }
        self.inner.close();
        debug!("session closed");
    }
}

/// Ask the secure service to admit `firmware` into the protected region
/// `fd` of `mem_len` bytes. The descriptor lands in `descriptor`.
pub fn load_firmware<T: SecureTransport + ?Sized>(
    transport: &T,
    firmware: &[u8],
    fd: MemFd,
    mem_len: usize,
    descriptor: &mut [u8],
    ncores: u32,
) -> Result<(), SedgetError> {
    let mut session = Session::open(transport, &SEDGET_VIDEO_UUID)?;
    let shm = session.register_shared_memory(fd, mem_len)?;

    let mut op = Operation::new([
        ClientParam::TempInput(firmware),
        ClientParam::PartialOutput {
            shm,
            offset: 0,
            size: mem_len,
        },
        ClientParam::TempOutput(descriptor),
        ClientParam::ValueInput { a: ncores, b: 0 },
    ]);
    session.invoke(command::LOAD_FIRMWARE, &mut op).map_err(|err| {
        warn!(status = %err.status, origin = ?err.origin, "load firmware invoke failed");
        SedgetError::from(err)
    })
}
