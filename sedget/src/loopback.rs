//! In-process transport to a [`SedgetService`] running over the simulated
//! platform.
//!
//! Temporary buffers are bounced through fresh heap copies, the way a TEE
//! driver copies them into its own shared memory. Registered regions are
//! handed to the service directly, so the secure buffer the service sees is
//! the region itself.

use std::collections::HashMap;
use std::sync::Arc;

use sedget_spec::params::NUM_PARAMS;
use sedget_spec::{MemFd, ParamTypes, Status, Uuid, SEDGET_VIDEO_UUID};
use sedget_ta::platform::sim::SimPlatform;
use sedget_ta::{Param, SedgetService, ServiceConfig, SessionId};
use tracing::{debug, warn};

use crate::tee::{
    ClientParam, ErrorOrigin, InvokeError, Operation, SecureTransport, ShmId, TransportError,
    TransportSession,
};

/// Transport that calls straight into an in-process service.
pub struct LoopbackTransport {
    platform: Arc<SimPlatform>,
    service: SedgetService<SimPlatform>,
}

impl LoopbackTransport {
    /// Start a service over `platform`.
    pub fn new(platform: Arc<SimPlatform>, config: ServiceConfig) -> Self {
        let service = SedgetService::new(Arc::clone(&platform), config);
        Self { platform, service }
    }

    /// Platform both sides share.
    pub fn platform(&self) -> &Arc<SimPlatform> {
        &self.platform
    }

    /// The service behind the transport.
    pub fn service(&self) -> &SedgetService<SimPlatform> {
        &self.service
    }
}

impl SecureTransport for LoopbackTransport {
    fn open_session(&self, uuid: &Uuid) -> Result<Box<dyn TransportSession + '_>, TransportError> {
        if *uuid != SEDGET_VIDEO_UUID {
            return Err(TransportError::OpenSession {
                uuid: uuid.to_string(),
                status: Status::ItemNotFound,
            });
        }
        Ok(Box::new(LoopbackSession {
            transport: self,
            session: self.service.open_session(),
            shared: HashMap::new(),
            next_shm: 1,
        }))
    }
}

struct LoopbackSession<'t> {
    transport: &'t LoopbackTransport,
    session: SessionId,
    shared: HashMap<ShmId, (MemFd, usize)>,
    next_shm: ShmId,
}

/// Service-side view of one slot before buffers are attached.
enum Slot {
    None,
    Bounce(Vec<u8>),
    Window { offset: usize, size: usize },
    Value { a: u32, b: u32 },
}

fn api_error(status: Status) -> InvokeError {
    InvokeError {
        status,
        origin: ErrorOrigin::Api,
    }
}

/// Decode the return code the service left on the wire.
fn service_result(code: u32) -> Result<(), InvokeError> {
    match Status::from_code(code) {
        Status::Success => Ok(()),
        status => Err(InvokeError {
            status,
            origin: ErrorOrigin::TrustedApp,
        }),
    }
}

impl LoopbackSession<'_> {
    fn prepare(
        &self,
        op: &Operation<'_>,
    ) -> Result<([Slot; NUM_PARAMS], Option<MemFd>), InvokeError> {
        let mut window = None;
        let mut slots = [Slot::None, Slot::None, Slot::None, Slot::None];
        for (slot, param) in slots.iter_mut().zip(&op.params) {
            *slot = match param {
                ClientParam::None => Slot::None,
                ClientParam::TempInput(data) => Slot::Bounce(data.to_vec()),
                ClientParam::TempOutput(out) => Slot::Bounce(vec![0; out.len()]),
                ClientParam::ValueInput { a, b } => Slot::Value { a: *a, b: *b },
                ClientParam::PartialOutput { shm, offset, size } => {
                    let (fd, len) = *self
                        .shared
                        .get(shm)
                        .ok_or_else(|| api_error(Status::ItemNotFound))?;
                    let in_bounds = offset.checked_add(*size).is_some_and(|end| end <= len);
                    if !in_bounds || window.replace(fd).is_some() {
                        return Err(api_error(Status::BadParameters));
                    }
                    Slot::Window {
                        offset: *offset,
                        size: *size,
                    }
                }
            };
        }
        Ok((slots, window))
    }

    fn call(
        &self,
        command: u32,
        types: ParamTypes,
        slots: &mut [Slot; NUM_PARAMS],
        mut region: Option<&mut [u8]>,
    ) -> u32 {
        let mut params: [Param<'_>; NUM_PARAMS] = Default::default();
        for (param, slot) in params.iter_mut().zip(slots.iter_mut()) {
            *param = match slot {
                Slot::None => Param::None,
                Slot::Bounce(buf) => Param::Memref(buf.as_mut_slice()),
                Slot::Value { a, b } => Param::Value { a: *a, b: *b },
                Slot::Window { offset, size } => match region.take() {
                    Some(bytes) => Param::Memref(&mut bytes[*offset..*offset + *size]),
                    None => Param::None,
                },
            };
        }
        self.transport
            .service
            .invoke_command(self.session, command, types, &mut params)
            .code()
    }
}

impl TransportSession for LoopbackSession<'_> {
    fn register_shared_memory(&mut self, fd: MemFd, len: usize) -> Result<ShmId, TransportError> {
        let fits = self
            .transport
            .platform
            .region_len(fd)
            .is_some_and(|region_len| len > 0 && len <= region_len);
        if !fits {
            return Err(TransportError::Register { fd, len });
        }
        let shm = self.next_shm;
        self.next_shm += 1;
        self.shared.insert(shm, (fd, len));
        debug!(shm, fd = fd.0, len, "shared memory registered");
        Ok(shm)
    }

    fn release_shared_memory(&mut self, shm: ShmId) {
        if self.shared.remove(&shm).is_none() {
            warn!(shm, "releasing unknown shared memory");
        }
    }

    fn invoke(&mut self, command: u32, op: &mut Operation<'_>) -> Result<(), InvokeError> {
        let types = op.param_types();
        let (mut slots, window) = self.prepare(op)?;

        let code = match window {
            Some(fd) => self
                .transport
                .platform
                .with_region_mut(fd, |region| self.call(command, types, &mut slots, Some(region)))
                .ok_or(InvokeError {
                    status: Status::ItemNotFound,
                    origin: ErrorOrigin::Tee,
                })?,
            None => self.call(command, types, &mut slots, None),
        };

        for (param, slot) in op.params.iter_mut().zip(&slots) {
            if let (ClientParam::TempOutput(out), Slot::Bounce(buf)) = (param, slot) {
                out.copy_from_slice(buf);
            }
        }

        service_result(code)
    }

    fn close(&mut self) {
        if let Err(status) = self.transport.service.close_session(self.session) {
            warn!(session = self.session, %status, "closing session failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tee::Session;
    use sedget_spec::command;
    use sedget_ta::platform::sim::HeapId;

    fn transport() -> LoopbackTransport {
        LoopbackTransport::new(Arc::new(SimPlatform::default()), ServiceConfig::default())
    }

    #[test]
    fn unknown_service_cannot_be_opened() {
        let t = transport();
        let other = Uuid {
            time_low: 1,
            ..SEDGET_VIDEO_UUID
        };
        assert!(matches!(
            Session::open(&t, &other),
            Err(TransportError::OpenSession {
                status: Status::ItemNotFound,
                ..
            })
        ));
    }

    #[test]
    fn sessions_are_closed_on_drop() {
        let t = transport();
        {
            let _session = Session::open(&t, &SEDGET_VIDEO_UUID).unwrap();
            assert_eq!(t.service().session_count(), 1);
        }
        assert_eq!(t.service().session_count(), 0);
    }

    #[test]
    fn registration_is_bounded_by_the_region() {
        let t = transport();
        let fd = t.platform().allocate(HeapId::MvePrivate, 4096).unwrap();
        let mut session = Session::open(&t, &SEDGET_VIDEO_UUID).unwrap();
        assert!(session.register_shared_memory(fd, 4096).is_ok());
        assert!(session.register_shared_memory(fd, 8192).is_err());
        assert!(session.register_shared_memory(MemFd(999), 1).is_err());
    }

    #[test]
    fn window_past_the_registration_is_refused() {
        let t = transport();
        let fd = t.platform().allocate(HeapId::MvePrivate, 4096).unwrap();
        let mut session = Session::open(&t, &SEDGET_VIDEO_UUID).unwrap();
        let shm = session.register_shared_memory(fd, 4096).unwrap();
        let mut desc = [0u8; 8];
        let mut op = Operation::new([
            ClientParam::TempInput(&[0; 16]),
            ClientParam::PartialOutput {
                shm,
                offset: 4000,
                size: 200,
            },
            ClientParam::TempOutput(&mut desc),
            ClientParam::ValueInput { a: 1, b: 0 },
        ]);
        let err = session.invoke(command::LOAD_FIRMWARE, &mut op).unwrap_err();
        assert_eq!(err, api_error(Status::BadParameters));
    }

    #[test]
    fn service_rejections_carry_the_service_origin() {
        let t = transport();
        let mut session = Session::open(&t, &SEDGET_VIDEO_UUID).unwrap();
        let mut op = Operation::default();
        let err = session.invoke(command::LOAD_FIRMWARE, &mut op).unwrap_err();
        assert_eq!(
            err,
            InvokeError {
                status: Status::BadParameters,
                origin: ErrorOrigin::TrustedApp
            }
        );
    }

    #[test]
    fn return_codes_are_decoded_on_the_client_side() {
        assert_eq!(service_result(Status::Success.code()), Ok(()));
        assert_eq!(
            service_result(Status::SecurityError.code()),
            Err(InvokeError {
                status: Status::SecurityError,
                origin: ErrorOrigin::TrustedApp
            })
        );
        assert_eq!(
            service_result(0xDEAD_BEEF).unwrap_err().status,
            Status::Generic
        );
    }
}
