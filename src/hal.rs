use axerrno::AxResult;

/// The interfaces which the underlying host (kernel or hypervisor) must implement.
pub trait AxVmmHal {
    /// Returns the 12-byte CPU vendor identification string.
    ///
    /// The default implementation executes `CPUID` leaf 0 on x86_64 and reports an empty
    /// vendor elsewhere.
    fn cpu_vendor_id() -> [u8; 12] {
        host_cpu_vendor_id()
    }

    /// Publishes `name` so that host processes can open the root object.
    fn publish_name(name: &str) -> AxResult;

    /// Withdraws a name published by [`AxVmmHal::publish_name`].
    fn unpublish_name(_name: &str) {}
}

#[cfg(target_arch = "x86_64")]
#[allow(unused_unsafe)]
fn host_cpu_vendor_id() -> [u8; 12] {
    // SAFETY: leaf 0 is available on every x86_64 processor.
    let leaf = unsafe { core::arch::x86_64::__cpuid(0) };
    let mut id = [0u8; 12];
    id[0..4].copy_from_slice(&leaf.ebx.to_le_bytes());
    id[4..8].copy_from_slice(&leaf.edx.to_le_bytes());
    id[8..12].copy_from_slice(&leaf.ecx.to_le_bytes());
    id
}

#[cfg(not(target_arch = "x86_64"))]
fn host_cpu_vendor_id() -> [u8; 12] {
    [0u8; 12]
}
