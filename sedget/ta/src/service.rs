//! Service entry points: sessions and command dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sedget_spec::params::{LOAD_FIRMWARE_PARAM_TYPES, NUM_PARAMS};
use sedget_spec::{command, ParamType, ParamTypes, Status};
use tracing::{debug, info, warn};

use crate::admission::{self, LoadRequest};
use crate::config::ServiceConfig;
use crate::platform::Platform;

pub type SessionId = u32;

/// One parameter slot as the service sees it.
#[derive(Debug, Default)]
pub enum Param<'a> {
    #[default]
    None,
    Value {
        a: u32,
        b: u32,
    },
    Memref(&'a mut [u8]),
}

#[derive(Debug, Default)]
struct SessionState {
    busy: bool,
}

/// Clears a session's busy flag when the invocation ends.
struct InvocationGuard<'s> {
    sessions: &'s Mutex<HashMap<SessionId, SessionState>>,
    id: SessionId,
}

impl Drop for InvocationGuard<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.sessions.lock().get_mut(&self.id) {
            state.busy = false;
        }
    }
}

/// The secure video firmware service.
pub struct SedgetService<P: ?Sized> {
    config: ServiceConfig,
    sessions: Mutex<HashMap<SessionId, SessionState>>,
    next_session: AtomicU32,
    platform: Arc<P>,
}

impl<P: Platform + ?Sized> SedgetService<P> {
    pub fn new(platform: Arc<P>, config: ServiceConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU32::new(1),
            platform,
        }
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn open_session(&self) -> SessionId {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().insert(id, SessionState::default());
        debug!(session = id, "session opened");
        id
    }

    pub fn close_session(&self, id: SessionId) -> Result<(), Status> {
        let mut sessions = self.sessions.lock();
        match sessions.get(&id) {
            None => Err(Status::ItemNotFound),
            Some(state) if state.busy => Err(Status::Busy),
            Some(_) => {
                sessions.remove(&id);
                debug!(session = id, "session closed");
                Ok(())
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Dispatch one command. A session services one command at a time.
    pub fn invoke_command(
        &self,
        session: SessionId,
        command: u32,
        types: ParamTypes,
        params: &mut [Param<'_>; NUM_PARAMS],
    ) -> Status {
        let _guard = match self.begin(session) {
            Ok(guard) => guard,
            Err(status) => return status,
        };

        if !params_match(types, params) {
            warn!(session, ?types, "parameters do not match their declared types");
            return Status::BadParameters;
        }

        match command {
            command::LOAD_FIRMWARE => self.load_firmware(session, types, params),
            other => {
                warn!(session, command = other, "unknown command");
                Status::BadParameters
            }
        }
    }

    fn begin(&self, id: SessionId) -> Result<InvocationGuard<'_>, Status> {
        let mut sessions = self.sessions.lock();
        let state = sessions.get_mut(&id).ok_or(Status::ItemNotFound)?;
        if state.busy {
            return Err(Status::Busy);
        }
        state.busy = true;
        Ok(InvocationGuard {
            sessions: &self.sessions,
            id,
        })
    }

    fn load_firmware(
        &self,
        session: SessionId,
        types: ParamTypes,
        params: &mut [Param<'_>; NUM_PARAMS],
    ) -> Status {
        if types != LOAD_FIRMWARE_PARAM_TYPES {
            warn!(session, ?types, "load firmware: unexpected parameter types");
            return Status::BadParameters;
        }
        let [ciphertext, secure, descriptor, cores] = params;
        let (
            Param::Memref(ciphertext),
            Param::Memref(secure),
            Param::Memref(descriptor),
            Param::Value { a: ncores, .. },
        ) = (ciphertext, secure, descriptor, cores)
        else {
            warn!(session, "load firmware: parameters do not match their types");
            return Status::BadParameters;
        };

        info!(
            session,
            ciphertext_len = ciphertext.len(),
            secure_len = secure.len(),
            ncores = *ncores,
            "load firmware"
        );
        let request = LoadRequest {
            ciphertext: &**ciphertext,
            secure: &mut **secure,
            descriptor: &mut **descriptor,
            ncores: *ncores,
        };
        match admission::admit(&*self.platform, &self.config, request) {
            Ok(_) => Status::Success,
            Err(err) => err.status(),
        }
    }
}

/// Memref slots must carry buffers, value slots scalars, empty slots nothing.
fn params_match(types: ParamTypes, params: &[Param<'_>; NUM_PARAMS]) -> bool {
    params
        .iter()
        .enumerate()
        .all(|(index, param)| match (types.get(index), param) {
            (Some(ParamType::None), Param::None) => true,
            (Some(ty), Param::Memref(_)) => ty.is_memref(),
            (Some(ty), Param::Value { .. }) => ty != ParamType::None && !ty.is_memref(),
            _ => false,
        })
}
