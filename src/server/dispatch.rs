//! Driver request dispatch
//!
//! Decodes a request read with `IOCTL_CONDRV_READ_IO`, applies it to the
//! process/object tables and produces the `IoComplete` reply (plus any
//! payload the driver copies back to the client).

use std::collections::HashSet;

use tracing::{debug, warn};

use super::handles::{ObjectId, ObjectTable};
use super::status::*;
use super::ServerError;
use crate::condrv::{
    AccessMask, ConnectionInfo, CreateObjectInfo, IoComplete, IoDescriptor, IoFunction, Luid,
    ObjectType, ProtocolError, ShareMode, WireFormat, WireReader,
};
use crate::conmsg::ConsoleMessage;

/// Screen buffer created with the console; the target of CURRENT_OUTPUT.
const MAIN_SCREEN_BUFFER: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Input,
    Output { screen_buffer: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleObject {
    pub kind: ObjectKind,
    /// Owning client process.
    pub process: ObjectId,
    pub access: AccessMask,
    pub share: ShareMode,
}

impl ConsoleObject {
    pub fn is_input(&self) -> bool {
        self.kind == ObjectKind::Input
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProcess {
    /// Value the driver supplied in the CONNECT descriptor.
    pub client_id: usize,
}

/// Outcome of a request handled by [`ApiRoutines`] or the dispatcher itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiStatus {
    Complete {
        status: i32,
        information: usize,
        reply: Vec<u8>,
    },
    /// The reply will be sent later through [`IoDispatcher::complete_pending`].
    Pending,
}

impl ApiStatus {
    pub fn status(status: i32) -> Self {
        ApiStatus::Complete {
            status,
            information: 0,
            reply: Vec::new(),
        }
    }

    pub fn success(information: usize) -> Self {
        ApiStatus::Complete {
            status: STATUS_SUCCESS,
            information,
            reply: Vec::new(),
        }
    }
}

/// The console model behind the protocol.
pub trait ApiRoutines {
    /// Handle a `CONSOLE_IO_USER_DEFINED` call against a live object owned
    /// by the calling process. The body may be updated in place; it is sent
    /// back as the reply.
    fn user_defined(&mut self, object: &ConsoleObject, message: &mut ConsoleMessage) -> ApiStatus;

    /// Handle RAW_READ, RAW_WRITE and RAW_FLUSH against a live object.
    fn raw_io(&mut self, _function: IoFunction, _object: &ConsoleObject, _payload: &[u8]) -> ApiStatus {
        ApiStatus::status(STATUS_NOT_IMPLEMENTED)
    }
}

/// Routines for a server with no console model: every API is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnimplementedRoutines;

impl ApiRoutines for UnimplementedRoutines {
    fn user_defined(&mut self, _object: &ConsoleObject, _message: &mut ConsoleMessage) -> ApiStatus {
        ApiStatus::status(STATUS_NOT_IMPLEMENTED)
    }
}

/// Reply for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReply {
    pub complete: IoComplete,
    pub payload: Vec<u8>,
}

impl DispatchReply {
    pub fn status(&self) -> i32 {
        self.complete.io_status.status
    }

    pub fn information(&self) -> usize {
        self.complete.io_status.information
    }
}

pub struct IoDispatcher<R: ApiRoutines> {
    routines: R,
    processes: ObjectTable<ClientProcess>,
    objects: ObjectTable<ConsoleObject>,
    /// Identifiers are unique per driver instance, so one set covers every client.
    outstanding: HashSet<u64>,
    next_screen_buffer: u32,
}

impl<R: ApiRoutines> IoDispatcher<R> {
    pub fn new(routines: R) -> Self {
        Self {
            routines,
            processes: ObjectTable::new(),
            objects: ObjectTable::new(),
            outstanding: HashSet::new(),
            next_screen_buffer: MAIN_SCREEN_BUFFER + 1,
        }
    }

    pub fn routines(&self) -> &R {
        &self.routines
    }

    pub fn object(&self, handle: usize) -> Option<&ConsoleObject> {
        self.objects.get_by_handle(handle)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn is_outstanding(&self, identifier: Luid) -> bool {
        self.outstanding.contains(&identifier.as_u64())
    }

    /// Handle one framed request. `Ok(None)` means the routines left the
    /// request pending; its identifier stays reserved until completed.
    pub fn dispatch(&mut self, request: &[u8]) -> Result<Option<DispatchReply>, ServerError> {
        let mut reader = WireReader::new(request);
        let descriptor = IoDescriptor::decode(&mut reader)?;
        let function = descriptor.function()?;
        let identifier = descriptor.identifier.as_u64();

        if !self.outstanding.insert(identifier) {
            warn!("Duplicate request identifier {:#x}", identifier);
            return Err(ServerError::DuplicateIdentifier(identifier));
        }

        debug!(
            "Dispatch {:?} id={:#x} process={:#x} object={:#x}",
            function, identifier, descriptor.process, descriptor.object
        );

        let outcome = match function {
            IoFunction::Connect => self.connect(&descriptor),
            IoFunction::Disconnect => Ok(self.disconnect(&descriptor)),
            IoFunction::CreateObject => self.create_object(&descriptor, &mut reader),
            IoFunction::CloseObject => Ok(self.close_object(&descriptor)),
            IoFunction::RawWrite | IoFunction::RawRead | IoFunction::RawFlush => {
                let payload = reader.take(reader.remaining())?;
                Ok(self.raw_io(function, &descriptor, payload))
            }
            IoFunction::UserDefined => self.user_defined(&descriptor, request),
        };

        match outcome {
            Err(e) => {
                self.outstanding.remove(&identifier);
                Err(e)
            }
            Ok(ApiStatus::Pending) => Ok(None),
            Ok(ApiStatus::Complete {
                status,
                information,
                reply,
            }) => {
                self.outstanding.remove(&identifier);
                Ok(Some(Self::reply(descriptor.identifier, status, information, reply)))
            }
        }
    }

    /// Complete a request previously left pending.
    pub fn complete_pending(
        &mut self,
        identifier: Luid,
        status: i32,
        information: usize,
        reply: Vec<u8>,
    ) -> Result<DispatchReply, ServerError> {
        if !self.outstanding.remove(&identifier.as_u64()) {
            return Err(ServerError::UnknownIdentifier(identifier.as_u64()));
        }
        Ok(Self::reply(identifier, status, information, reply))
    }

    fn reply(identifier: Luid, status: i32, information: usize, payload: Vec<u8>) -> DispatchReply {
        let mut complete = IoComplete::new(identifier, status, information);
        complete.write.size = payload.len() as u32;
        DispatchReply { complete, payload }
    }

    fn connect(&mut self, descriptor: &IoDescriptor) -> Result<ApiStatus, ServerError> {
        let process = self.processes.insert(ClientProcess {
            client_id: descriptor.process,
        })?;

        let full_access = AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE;
        let full_share = ShareMode::READ | ShareMode::WRITE;

        let input = self.objects.insert(ConsoleObject {
            kind: ObjectKind::Input,
            process,
            access: full_access,
            share: full_share,
        });
        let output = input.and_then(|input| {
            self.objects
                .insert(ConsoleObject {
                    kind: ObjectKind::Output {
                        screen_buffer: MAIN_SCREEN_BUFFER,
                    },
                    process,
                    access: full_access,
                    share: full_share,
                })
                .map(|output| (input, output))
        });

        let (input, output) = match output {
            Ok(pair) => pair,
            Err(e) => {
                self.objects.retain(|object| object.process != process);
                self.processes.remove(process);
                return Err(e);
            }
        };

        let info = ConnectionInfo {
            process: process.to_handle(),
            input: input.to_handle(),
            output: output.to_handle(),
        };
        debug!("Client {:#x} connected: {:?}", descriptor.process, info);

        Ok(ApiStatus::Complete {
            status: STATUS_SUCCESS,
            information: ConnectionInfo::WIRE_SIZE,
            reply: info.to_bytes(),
        })
    }

    fn disconnect(&mut self, descriptor: &IoDescriptor) -> ApiStatus {
        let Some(process) = ObjectId::from_handle(descriptor.process) else {
            return ApiStatus::status(STATUS_INVALID_HANDLE);
        };
        if self.processes.remove(process).is_none() {
            warn!("Disconnect for unknown process {:#x}", descriptor.process);
            return ApiStatus::status(STATUS_INVALID_HANDLE);
        }

        let closed = self.objects.retain(|object| object.process != process);
        debug!("Client {:#x} disconnected, {} objects closed", descriptor.process, closed);
        ApiStatus::success(0)
    }

    fn create_object(
        &mut self,
        descriptor: &IoDescriptor,
        reader: &mut WireReader<'_>,
    ) -> Result<ApiStatus, ServerError> {
        let info = CreateObjectInfo::decode(reader)?;

        let Some(process) = ObjectId::from_handle(descriptor.process).filter(|id| self.processes.contains(*id))
        else {
            return Ok(ApiStatus::status(STATUS_INVALID_HANDLE));
        };

        let object_type = match info.object_type() {
            Ok(ObjectType::Generic) => {
                // The caller's access decides what a generic open means
                let rw = info.desired_access() & (AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE);
                if rw == AccessMask::GENERIC_READ {
                    ObjectType::CurrentInput
                } else if rw == AccessMask::GENERIC_WRITE {
                    ObjectType::CurrentOutput
                } else {
                    return Ok(ApiStatus::status(STATUS_INVALID_PARAMETER));
                }
            }
            Ok(object_type) => object_type,
            Err(ProtocolError::UnknownObjectType(value)) => {
                warn!("Create request with unknown object type {:#x}", value);
                return Ok(ApiStatus::status(STATUS_INVALID_PARAMETER));
            }
            Err(e) => return Err(e.into()),
        };

        let kind = match object_type {
            ObjectType::CurrentInput => ObjectKind::Input,
            ObjectType::CurrentOutput => ObjectKind::Output {
                screen_buffer: MAIN_SCREEN_BUFFER,
            },
            ObjectType::NewOutput => {
                let screen_buffer = self.next_screen_buffer;
                self.next_screen_buffer += 1;
                ObjectKind::Output { screen_buffer }
            }
            ObjectType::Generic => return Ok(ApiStatus::status(STATUS_INVALID_PARAMETER)),
        };

        let id = match self.objects.insert(ConsoleObject {
            kind,
            process,
            access: info.desired_access(),
            share: info.share_mode(),
        }) {
            Ok(id) => id,
            Err(ServerError::TableFull) => return Ok(ApiStatus::status(STATUS_NO_MEMORY)),
            Err(e) => return Err(e),
        };

        Ok(ApiStatus::success(id.to_handle()))
    }

    fn close_object(&mut self, descriptor: &IoDescriptor) -> ApiStatus {
        match ObjectId::from_handle(descriptor.object).and_then(|id| self.objects.remove(id)) {
            Some(_) => ApiStatus::success(0),
            None => {
                warn!("Close of stale or unknown object {:#x}", descriptor.object);
                ApiStatus::status(STATUS_INVALID_HANDLE)
            }
        }
    }

    fn raw_io(&mut self, function: IoFunction, descriptor: &IoDescriptor, payload: &[u8]) -> ApiStatus {
        let Some(object) = self.objects.get_by_handle(descriptor.object) else {
            return ApiStatus::status(STATUS_INVALID_HANDLE);
        };

        // Reads and flushes target input; writes target a screen buffer
        let wrong_kind = match function {
            IoFunction::RawWrite => object.is_input(),
            _ => !object.is_input(),
        };
        if wrong_kind {
            return ApiStatus::status(STATUS_INVALID_HANDLE);
        }

        self.routines.raw_io(function, object, payload)
    }

    fn user_defined(&mut self, descriptor: &IoDescriptor, request: &[u8]) -> Result<ApiStatus, ServerError> {
        let mut message = match ConsoleMessage::decode(request) {
            Ok(message) => message,
            Err(ProtocolError::UnknownApi(number)) => {
                warn!("Unknown console API {:#010x}", number);
                return Ok(ApiStatus::status(STATUS_ILLEGAL_FUNCTION));
            }
            Err(e) => return Err(e.into()),
        };

        let Some(process) = ObjectId::from_handle(descriptor.process).filter(|id| self.processes.contains(*id))
        else {
            warn!("API call from unknown process {:#x}", descriptor.process);
            return Ok(ApiStatus::status(STATUS_INVALID_HANDLE));
        };
        let Some(object) = self
            .objects
            .get_by_handle(descriptor.object)
            .filter(|object| object.process == process)
        else {
            warn!("API call on stale or foreign object {:#x}", descriptor.object);
            return Ok(ApiStatus::status(STATUS_INVALID_HANDLE));
        };
        let outcome = self.routines.user_defined(object, &mut message);

        Ok(match outcome {
            ApiStatus::Complete {
                status,
                information,
                reply,
            } if reply.is_empty() => {
                // Send the (possibly updated) header and body back
                let encoded = message.encode();
                ApiStatus::Complete {
                    status,
                    information,
                    reply: encoded[IoDescriptor::WIRE_SIZE..].to_vec(),
                }
            }
            other => other,
        })
    }
}
