use alloc::format;
use alloc::string::String;

use axerrno::{ax_err, AxResult};

use crate::command::Namespace;

/// The largest CPU index a virtual CPU object may carry (inclusive).
pub const MAX_VCPU_INDEX: u32 = 128;

/// The kind of an addressable control object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObjectKind {
    /// The single root object, created at load time.
    Root,
    /// A virtual machine object, created by the root.
    VirtualMachine,
    /// A virtual CPU object, created by its virtual machine.
    VirtualCpu,
}

impl ObjectKind {
    /// The command namespace accepted by objects of this kind.
    pub const fn namespace(self) -> Namespace {
        match self {
            ObjectKind::Root => Namespace::Root,
            ObjectKind::VirtualMachine => Namespace::Vm,
            ObjectKind::VirtualCpu => Namespace::VCpu,
        }
    }
}

/// The deterministic key naming a control object.
///
/// Two objects with the same identity can never be registered at the same time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Identity {
    /// The root object.
    Root,
    /// A virtual machine, keyed by its machine index.
    Vm {
        /// The machine index.
        vm: u32,
    },
    /// A virtual CPU, keyed by its machine index and CPU index.
    VCpu {
        /// The machine index of the owning virtual machine.
        vm: u32,
        /// The CPU index, in `0..=MAX_VCPU_INDEX`.
        vcpu: u32,
    },
}

impl Identity {
    /// The identity of virtual machine `vm`.
    pub const fn vm(vm: u32) -> Self {
        Identity::Vm { vm }
    }

    /// The identity of CPU `vcpu` of virtual machine `vm`.
    ///
    /// Fails with `InvalidInput` if `vcpu` is larger than [`MAX_VCPU_INDEX`].
    pub fn vcpu(vm: u32, vcpu: u32) -> AxResult<Self> {
        if vcpu > MAX_VCPU_INDEX {
            return ax_err!(
                InvalidInput,
                format!("vcpu index {} out of range 0..={}", vcpu, MAX_VCPU_INDEX)
            );
        }
        Ok(Identity::VCpu { vm, vcpu })
    }

    /// The kind of object this identity names.
    pub const fn kind(&self) -> ObjectKind {
        match self {
            Identity::Root => ObjectKind::Root,
            Identity::Vm { .. } => ObjectKind::VirtualMachine,
            Identity::VCpu { .. } => ObjectKind::VirtualCpu,
        }
    }

    /// The identity of the owning virtual machine, for a virtual CPU.
    pub const fn parent(&self) -> Option<Identity> {
        match self {
            Identity::VCpu { vm, .. } => Some(Identity::Vm { vm: *vm }),
            _ => None,
        }
    }

    /// The machine index, for virtual machines and virtual CPUs.
    pub const fn vm_index(&self) -> Option<u32> {
        match self {
            Identity::Root => None,
            Identity::Vm { vm } | Identity::VCpu { vm, .. } => Some(*vm),
        }
    }

    /// The name of the object under the root name `base`.
    ///
    /// `axvm`, `axvm_vm3` and `axvm_vm3_vcpu1` for a base of `axvm`.
    pub fn name(&self, base: &str) -> String {
        match self {
            Identity::Root => String::from(base),
            Identity::Vm { vm } => format!("{}_vm{}", base, vm),
            Identity::VCpu { vm, vcpu } => format!("{}_vm{}_vcpu{}", base, vm, vcpu),
        }
    }
}

/// An opaque handle to a control object.
///
/// Handles are never reused within one hierarchy, so a stale handle resolves to nothing
/// rather than to a newer object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value, as carried in lifecycle command responses.
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for Handle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// A snapshot of one registered control object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// The handle addressing the object.
    pub handle: Handle,
    /// The identity of the object.
    pub identity: Identity,
    /// The owning virtual machine, for a virtual CPU.
    pub parent: Option<Handle>,
}

impl ObjectInfo {
    /// The kind of the object.
    pub const fn kind(&self) -> ObjectKind {
        self.identity.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeSet;

    #[test]
    fn vcpu_index_bounds() {
        assert!(Identity::vcpu(0, 0).is_ok());
        assert!(Identity::vcpu(0, MAX_VCPU_INDEX).is_ok());
        assert_eq!(
            Identity::vcpu(0, MAX_VCPU_INDEX + 1),
            Err(axerrno::AxError::InvalidInput)
        );
        assert_eq!(Identity::vcpu(7, u32::MAX), Err(axerrno::AxError::InvalidInput));
    }

    #[test]
    fn names_are_distinct() {
        let mut names = BTreeSet::new();
        assert!(names.insert(Identity::Root.name("axvm")));
        for vm in 0..12 {
            assert!(names.insert(Identity::vm(vm).name("axvm")));
            for vcpu in 0..12 {
                assert!(names.insert(Identity::vcpu(vm, vcpu).unwrap().name("axvm")));
            }
        }
        assert_eq!(Identity::vcpu(3, 1).unwrap().name("axvm"), "axvm_vm3_vcpu1");
        assert_eq!(Identity::vm(11).name("axvm"), "axvm_vm11");
    }

    #[test]
    fn kinds_and_parents() {
        let vcpu = Identity::vcpu(3, 1).unwrap();
        assert_eq!(vcpu.kind(), ObjectKind::VirtualCpu);
        assert_eq!(vcpu.parent(), Some(Identity::vm(3)));
        assert_eq!(Identity::vm(3).parent(), None);
        assert_eq!(Identity::Root.vm_index(), None);
        assert_eq!(ObjectKind::VirtualCpu.namespace(), Namespace::VCpu);
    }
}
