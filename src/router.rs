use alloc::format;

use axerrno::{ax_err, AxResult};
use log::{debug, error, warn};

use crate::command::{read_u32_arg, CommandCode, ResponseBuffer, CREATE_VCPU, CREATE_VM};
use crate::hierarchy::{DeviceHierarchy, ObjectData};
use crate::object::{Handle, Identity};
use crate::status::{translate, HostStatus};
use crate::AxVmmBackend;

/// The outcome of a routed request, as reported to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Response {
    /// The translated status of the request.
    pub status: HostStatus,
    /// The number of response bytes produced; zero for a failed request.
    pub bytes_written: usize,
}

impl Response {
    /// Builds the host response for the outcome of [`Router::route`].
    pub fn from_result(result: AxResult<usize>) -> Self {
        match result {
            Ok(bytes_written) => Self {
                status: HostStatus::Success,
                bytes_written,
            },
            Err(err) => Self {
                status: translate(err),
                bytes_written: 0,
            },
        }
    }
}

/// Dispatches requests addressed to control objects to the backend's handlers.
pub struct Router<'a, B: AxVmmBackend> {
    backend: &'a B,
    hierarchy: &'a DeviceHierarchy<B>,
}

impl<'a, B: AxVmmBackend> Router<'a, B> {
    /// Creates a router over `hierarchy` dispatching into `backend`.
    pub fn new(backend: &'a B, hierarchy: &'a DeviceHierarchy<B>) -> Self {
        Self { backend, hierarchy }
    }

    /// Routes command `code` to the object addressed by `handle`.
    ///
    /// The response payload lands in `output`, whose length is the response capacity.
    /// Returns the number of bytes produced.
    pub fn route(
        &self,
        handle: Handle,
        code: CommandCode,
        input: &[u8],
        output: &mut [u8],
    ) -> AxResult<usize> {
        let (identity, data) = self.hierarchy.resolve(handle)?;
        let kind = identity.kind();
        if code.namespace() != Some(kind.namespace()) {
            return ax_err!(
                InvalidInput,
                format!("command {:#x} is not valid for a {:?} object", code.as_raw(), kind)
            );
        }
        debug!("{:?}: command {:#x}", identity, code.as_raw());

        let mut response = ResponseBuffer::new(output);
        match (data, identity) {
            (ObjectData::Root, _) if code == CREATE_VM => {
                let vm = read_u32_arg(input)?;
                self.create_and_reply(Identity::vm(vm), &mut response)?;
            }
            (ObjectData::Root, _) => {
                self.backend.handle_root_command(code, input, &mut response)?;
            }
            (ObjectData::Vm(_), Identity::Vm { vm }) if code == CREATE_VCPU => {
                let vcpu = read_u32_arg(input)?;
                self.create_and_reply(Identity::vcpu(vm, vcpu)?, &mut response)?;
            }
            (ObjectData::Vm(vm), _) => {
                self.backend.handle_vm_command(&vm, code, input, &mut response)?;
            }
            (ObjectData::VCpu(vcpu), _) => {
                self.backend.handle_vcpu_command(&vcpu, code, input, &mut response)?;
            }
        }
        Ok(response.bytes_written())
    }

    /// Routes a request and translates its outcome for the host.
    pub fn route_to_host(
        &self,
        handle: Handle,
        code: CommandCode,
        input: &[u8],
        output: &mut [u8],
    ) -> Response {
        let result = self.route(handle, code, input, output);
        match &result {
            Err(err) if translate(*err) == HostStatus::InternalError => {
                error!("command {:#x} to {:?} broke an invariant: {:?}", code.as_raw(), handle, err)
            }
            Err(err) => warn!("command {:#x} to {:?} failed: {:?}", code.as_raw(), handle, err),
            Ok(_) => {}
        }
        Response::from_result(result)
    }

    /// Creates the object named by `identity` and replies with its handle.
    ///
    /// The capacity is checked first so that a short buffer never leaves an object behind.
    fn create_and_reply(&self, identity: Identity, response: &mut ResponseBuffer<'_>) -> AxResult {
        let reply_len = core::mem::size_of::<u64>();
        response.ensure_fits(reply_len)?;
        let handle = self.hierarchy.create_child(self.backend, identity)?;
        response.write(&handle.as_raw().to_le_bytes())
    }
}
