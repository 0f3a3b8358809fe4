use axerrno::AxResult;

use crate::command::{CommandCode, ResponseBuffer};
use crate::driver::VirtTech;
use crate::suspend::ParkToken;

/// The virtualization core behind the control objects.
///
/// This trait is the seam between the control layer and everything that actually runs
/// guests: CPU-mode entry and exit, memory virtualization, instruction emulation and the
/// vendor-specific (VMX or SVM) initialization. The control layer never looks inside the
/// per-object data it stores; it only hands it back to the hooks below.
///
/// # Contract
///
/// - Every hook may be called from any thread, concurrently with other hooks.
/// - `create_*` hand ownership of the new data to the control layer; `release_*` hand it
///   back exactly once, when the object is closed or the driver is unloaded.
/// - A [`ParkToken`] accepted by [`AxVmmBackend::deliver_park`] must eventually be parked
///   by the execution context of that virtual CPU.
pub trait AxVmmBackend: Send + Sync + Sized {
    /// Per-VM data owned by a virtual machine object.
    type Vm: Send + Sync;

    /// Per-VCPU data owned by a virtual CPU object.
    type VCpu: Send + Sync;

    /// Initializes the virtualization core for the detected vendor technology.
    fn init(tech: VirtTech) -> AxResult<Self>;

    /// Tears down the virtualization core. Called once, at unload.
    fn teardown(&self);

    /// Saves the virtualization state before a host suspend.
    ///
    /// Called only while every signaled execution context is parked.
    fn suspend(&self);

    /// Restores the virtualization state after a host resume.
    ///
    /// Called before any parked execution context is released.
    fn resume(&self);

    /// Allocates the data of virtual machine `vm_index`.
    fn create_vm(&self, vm_index: u32) -> AxResult<Self::Vm>;

    /// Allocates the data of CPU `vcpu_index` of `vm`.
    fn create_vcpu(&self, vm: &Self::Vm, vcpu_index: u32) -> AxResult<Self::VCpu>;

    /// Releases the data of a closed virtual machine.
    ///
    /// All of its virtual CPUs have been released before this is called.
    fn release_vm(&self, vm: &Self::Vm) -> AxResult;

    /// Releases the data of a closed virtual CPU.
    fn release_vcpu(&self, vcpu: &Self::VCpu) -> AxResult;

    /// Handles a root-namespace command.
    fn handle_root_command(
        &self,
        code: CommandCode,
        input: &[u8],
        response: &mut ResponseBuffer<'_>,
    ) -> AxResult;

    /// Handles a VM-namespace command sent to `vm`.
    fn handle_vm_command(
        &self,
        vm: &Self::Vm,
        code: CommandCode,
        input: &[u8],
        response: &mut ResponseBuffer<'_>,
    ) -> AxResult;

    /// Handles a VCPU-namespace command sent to `vcpu`.
    fn handle_vcpu_command(
        &self,
        vcpu: &Self::VCpu,
        code: CommandCode,
        input: &[u8],
        response: &mut ResponseBuffer<'_>,
    ) -> AxResult;

    /// Delivers a park request to the execution context of `vcpu`.
    ///
    /// The context observes the token at its next safe point and calls
    /// [`ParkToken::park`]. If the context can no longer be signaled (it has already
    /// exited), the token is handed back and the context is not waited for.
    fn deliver_park(&self, vcpu: &Self::VCpu, token: ParkToken) -> Result<(), ParkToken>;
}
