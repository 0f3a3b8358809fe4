use alloc::boxed::Box;
use alloc::format;
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;

use axerrno::{ax_err, AxResult};
use log::{info, warn};

use crate::command::CommandCode;
use crate::config::AxVmmConfig;
use crate::hierarchy::{DeviceHierarchy, Enumerator};
use crate::object::{Handle, ObjectKind};
use crate::router::{Response, Router};
use crate::suspend::{PowerEvent, PowerState, QuiescenceCoordinator};
use crate::{AxVmmBackend, AxVmmHal};

/// The size of the zero page allocated at load.
pub const PAGE_SIZE: usize = 4096;

/// The hardware virtualization technology a backend is initialized for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirtTech {
    /// Intel VT-x.
    Vmx,
    /// AMD-V.
    Svm,
}

/// The vendor of the host processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuVendor {
    /// `GenuineIntel`.
    Intel,
    /// `AuthenticAMD`.
    Amd,
    /// Any other vendor identification string.
    Unknown([u8; 12]),
}

impl CpuVendor {
    /// Identifies the vendor from the 12-byte `CPUID` vendor string.
    pub fn from_vendor_id(id: &[u8; 12]) -> Self {
        match id {
            b"GenuineIntel" => CpuVendor::Intel,
            b"AuthenticAMD" => CpuVendor::Amd,
            other => CpuVendor::Unknown(*other),
        }
    }

    /// The virtualization technology supported for this vendor, if any.
    pub const fn virt_tech(self) -> Option<VirtTech> {
        match self {
            CpuVendor::Intel => Some(VirtTech::Vmx),
            CpuVendor::Amd => Some(VirtTech::Svm),
            CpuVendor::Unknown(_) => None,
        }
    }
}

impl fmt::Display for CpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuVendor::Intel => f.write_str("GenuineIntel"),
            CpuVendor::Amd => f.write_str("AuthenticAMD"),
            CpuVendor::Unknown(id) => match core::str::from_utf8(id) {
                Ok(name) => f.write_str(name.trim_end_matches('\0')),
                Err(_) => write!(f, "{:02x?}", id),
            },
        }
    }
}

fn alloc_zero_page() -> AxResult<Box<[u8]>> {
    let mut page = Vec::new();
    if page.try_reserve_exact(PAGE_SIZE).is_err() {
        return ax_err!(NoMemory, "failed to allocate the zero page");
    }
    page.resize(PAGE_SIZE, 0u8);
    Ok(page.into_boxed_slice())
}

/// The loaded control layer: the root object and everything below it, the request
/// router and the suspend coordinator, bound to one virtualization backend.
///
/// Dropping the driver unloads it: every remaining object is released through the
/// backend, the root name is withdrawn and the backend is torn down.
pub struct AxVmmDriver<B: AxVmmBackend, H: AxVmmHal> {
    config: AxVmmConfig,
    vendor: CpuVendor,
    backend: B,
    hierarchy: DeviceHierarchy<B>,
    coordinator: QuiescenceCoordinator,
    zero_page: Box<[u8]>,
    _hal: PhantomData<fn() -> H>,
}

impl<B: AxVmmBackend, H: AxVmmHal> AxVmmDriver<B, H> {
    /// Loads the control layer.
    ///
    /// Detects the processor vendor, allocates the zero page, initializes the backend for
    /// the vendor's virtualization technology, creates the root object and publishes its
    /// name. Any failure aborts the whole load and leaves nothing behind; an unsupported
    /// processor fails with `Unsupported`.
    pub fn load(config: AxVmmConfig) -> AxResult<Self> {
        let vendor = CpuVendor::from_vendor_id(&H::cpu_vendor_id());
        let Some(tech) = vendor.virt_tech() else {
            return ax_err!(Unsupported, format!("processor {} is not supported", vendor));
        };

        let zero_page = alloc_zero_page()?;
        let backend = B::init(tech)?;
        let hierarchy = DeviceHierarchy::new();

        if config.publish_root {
            if let Err(err) = H::publish_name(&config.device_name) {
                warn!("failed to publish {}: {:?}", config.device_name, err);
                backend.teardown();
                return Err(err);
            }
        }

        info!("{} loaded on a {} processor ({:?})", config.device_name, vendor, tech);
        Ok(Self {
            config,
            vendor,
            backend,
            hierarchy,
            coordinator: QuiescenceCoordinator::new(),
            zero_page,
            _hal: PhantomData,
        })
    }

    /// The configuration the driver was loaded with.
    pub fn config(&self) -> &AxVmmConfig {
        &self.config
    }

    /// The detected processor vendor.
    pub const fn vendor(&self) -> CpuVendor {
        self.vendor
    }

    /// The virtualization backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The control object hierarchy.
    pub fn hierarchy(&self) -> &DeviceHierarchy<B> {
        &self.hierarchy
    }

    /// The zero page, `PAGE_SIZE` bytes of zeroes.
    pub fn zero_page(&self) -> &[u8] {
        &self.zero_page
    }

    /// The handle of the root object.
    pub fn root(&self) -> Handle {
        self.hierarchy.root()
    }

    /// Opens the object named `name` (as produced by [`Identity::name`](crate::Identity::name)
    /// with the configured device name).
    pub fn open(&self, name: &str) -> AxResult<Handle> {
        let base = &self.config.device_name;
        let found = self
            .hierarchy
            .enumerate(None)
            .find(|info| info.identity.name(base) == name);
        match found {
            Some(info) => Ok(info.handle),
            None => ax_err!(NotFound, format!("no object named {}", name)),
        }
    }

    /// Routes a command and returns the number of response bytes produced.
    pub fn control(
        &self,
        handle: Handle,
        code: CommandCode,
        input: &[u8],
        output: &mut [u8],
    ) -> AxResult<usize> {
        Router::new(&self.backend, &self.hierarchy).route(handle, code, input, output)
    }

    /// Routes a command and reports the translated host status.
    pub fn device_control(
        &self,
        handle: Handle,
        code: CommandCode,
        input: &[u8],
        output: &mut [u8],
    ) -> Response {
        Router::new(&self.backend, &self.hierarchy).route_to_host(handle, code, input, output)
    }

    /// Closes the object addressed by `handle`, releasing its backend data.
    ///
    /// Closing the root always succeeds and never removes it.
    pub fn close(&self, handle: Handle) -> AxResult {
        self.hierarchy.close(&self.backend, handle)
    }

    /// Handles a host power-transition event.
    pub fn power_event(&self, event: PowerEvent) -> AxResult {
        info!("power event {:?}", event);
        self.coordinator
            .handle_event(event, &self.hierarchy, &self.backend)
    }

    /// The current power state.
    pub fn power_state(&self) -> PowerState {
        self.coordinator.state()
    }

    /// The number of virtual CPU execution contexts currently parked.
    pub fn parked_contexts(&self) -> usize {
        self.coordinator.barrier().acknowledged()
    }

    /// The number of live control objects, the root included.
    pub fn object_count(&self) -> usize {
        self.hierarchy.len()
    }

    /// Enumerates live objects, optionally only those of `kind`.
    pub fn enumerate(&self, kind: Option<ObjectKind>) -> Enumerator<'_, B> {
        self.hierarchy.enumerate(kind)
    }

    /// Enumerates the virtual CPUs of the virtual machine `vm`.
    pub fn enumerate_children(&self, vm: Handle) -> Enumerator<'_, B> {
        self.hierarchy.enumerate_children(vm)
    }
}

impl<B: AxVmmBackend, H: AxVmmHal> Drop for AxVmmDriver<B, H> {
    fn drop(&mut self) {
        // The backend resumes before any parked context is let go.
        if self.coordinator.state() == PowerState::Suspended {
            if let Err(err) = self
                .coordinator
                .handle_event(PowerEvent::Resume, &self.hierarchy, &self.backend)
            {
                warn!("failed to resume before unload: {:?}", err);
            }
        }
        self.coordinator.barrier().release_all();
        self.hierarchy.release_all(&self.backend);
        if self.config.publish_root {
            H::unpublish_name(&self.config.device_name);
        }
        self.backend.teardown();
        info!("{} unloaded", self.config.device_name);
    }
}
