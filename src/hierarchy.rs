use alloc::collections::BTreeMap;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::Bound;

use axerrno::{ax_err, AxResult};
use log::debug;
use spin::{RwLock, RwLockReadGuard};

use crate::object::{Handle, Identity, ObjectInfo, ObjectKind, MAX_VCPU_INDEX};
use crate::AxVmmBackend;

/// The backend data owned by a control object, tagged by kind.
pub(crate) enum ObjectData<B: AxVmmBackend> {
    Root,
    Vm(Arc<B::Vm>),
    VCpu(Arc<B::VCpu>),
}

impl<B: AxVmmBackend> Clone for ObjectData<B> {
    fn clone(&self) -> Self {
        match self {
            ObjectData::Root => ObjectData::Root,
            ObjectData::Vm(vm) => ObjectData::Vm(vm.clone()),
            ObjectData::VCpu(vcpu) => ObjectData::VCpu(vcpu.clone()),
        }
    }
}

struct Node<B: AxVmmBackend> {
    identity: Identity,
    parent: Option<Handle>,
    children: Vec<Handle>,
    data: ObjectData<B>,
}

impl<B: AxVmmBackend> Node<B> {
    fn info(&self, handle: Handle) -> ObjectInfo {
        ObjectInfo {
            handle,
            identity: self.identity,
            parent: self.parent,
        }
    }
}

struct Tree<B: AxVmmBackend> {
    nodes: BTreeMap<Handle, Node<B>>,
    by_identity: BTreeMap<Identity, Handle>,
    next_handle: u64,
    /// Set while a suspend is in progress; create and close are refused.
    frozen: bool,
}

impl<B: AxVmmBackend> Tree<B> {
    fn allocate_handle(&mut self) -> Handle {
        let handle = Handle::from_raw(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn insert(&mut self, identity: Identity, parent: Option<Handle>, data: ObjectData<B>) -> Handle {
        let handle = self.allocate_handle();
        self.nodes.insert(
            handle,
            Node {
                identity,
                parent,
                children: Vec::new(),
                data,
            },
        );
        self.by_identity.insert(identity, handle);
        if let Some(node) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            node.children.push(handle);
        }
        handle
    }

    /// Releases and unlinks `handle` and everything below it, children first.
    ///
    /// Every object is unlinked even if a release hook fails; the first failure is returned.
    fn remove(&mut self, backend: &B, handle: Handle) -> AxResult {
        let children = match self.nodes.get_mut(&handle) {
            Some(node) => core::mem::take(&mut node.children),
            None => return ax_err!(NotFound, format!("no object with handle {:?}", handle)),
        };

        let mut result = Ok(());
        for child in children {
            let removed = self.remove(backend, child);
            result = result.and(removed);
        }

        let Some(node) = self.nodes.get(&handle) else {
            return result;
        };
        let released = match &node.data {
            ObjectData::Root => Ok(()),
            ObjectData::Vm(vm) => backend.release_vm(vm),
            ObjectData::VCpu(vcpu) => backend.release_vcpu(vcpu),
        };
        debug!("released {:?} ({:?}): {:?}", node.identity, handle, released);

        if let Some(node) = self.nodes.remove(&handle) {
            self.by_identity.remove(&node.identity);
            if let Some(parent) = node.parent.and_then(|parent| self.nodes.get_mut(&parent)) {
                parent.children.retain(|child| *child != handle);
            }
        }
        result.and(released)
    }
}

/// The registry of every live control object: one root, its virtual machines and their
/// virtual CPUs.
///
/// Creation, closing and the suspend sweep are mutually exclusive (they take the
/// hierarchy lock for writing); enumeration and request resolution share it for reading.
pub struct DeviceHierarchy<B: AxVmmBackend> {
    root: Handle,
    tree: RwLock<Tree<B>>,
}

impl<B: AxVmmBackend> DeviceHierarchy<B> {
    /// Creates the hierarchy with its root object.
    pub(crate) fn new() -> Self {
        let mut tree = Tree {
            nodes: BTreeMap::new(),
            by_identity: BTreeMap::new(),
            next_handle: 1,
            frozen: false,
        };
        let root = tree.insert(Identity::Root, None, ObjectData::Root);
        Self {
            root,
            tree: RwLock::new(tree),
        }
    }

    /// The handle of the root object.
    pub const fn root(&self) -> Handle {
        self.root
    }

    /// Creates the virtual machine or virtual CPU named by `identity`.
    ///
    /// The backend data is allocated through the backend's create hook before the object
    /// is registered; a failing hook leaves the hierarchy untouched.
    ///
    /// Fails with
    /// - `InvalidInput` for the root identity, an out-of-range CPU index, a missing parent
    ///   VM, or an identity that is already registered;
    /// - `WouldBlock` while a suspend is in progress.
    pub(crate) fn create_child(&self, backend: &B, identity: Identity) -> AxResult<Handle> {
        let mut tree = self.tree.write();
        if tree.frozen {
            return ax_err!(WouldBlock, "object hierarchy is frozen for suspend");
        }
        if tree.by_identity.contains_key(&identity) {
            return ax_err!(InvalidInput, format!("{:?} already exists", identity));
        }

        let (parent, data) = match identity {
            Identity::Root => return ax_err!(InvalidInput, "the root object already exists"),
            Identity::Vm { vm } => (None, ObjectData::Vm(Arc::new(backend.create_vm(vm)?))),
            Identity::VCpu { vm, vcpu } => {
                if vcpu > MAX_VCPU_INDEX {
                    return ax_err!(InvalidInput, format!("vcpu index {} out of range", vcpu));
                }
                let Some(parent) = tree.by_identity.get(&Identity::vm(vm)).copied() else {
                    return ax_err!(InvalidInput, format!("vm {} does not exist", vm));
                };
                let vm_data = match tree.nodes.get(&parent).map(|node| &node.data) {
                    Some(ObjectData::Vm(vm_data)) => vm_data.clone(),
                    _ => return ax_err!(BadState, format!("vm {} has no vm data", vm)),
                };
                let vcpu_data = backend.create_vcpu(&vm_data, vcpu)?;
                (Some(parent), ObjectData::VCpu(Arc::new(vcpu_data)))
            }
        };

        let handle = tree.insert(identity, parent, data);
        debug!("created {:?} as {:?}", identity, handle);
        Ok(handle)
    }

    /// Closes the object addressed by `handle`.
    ///
    /// The backend's release hook runs before the object leaves the hierarchy. Closing a
    /// virtual machine first closes its remaining virtual CPUs. Closing the root is a
    /// no-op that always succeeds.
    pub(crate) fn close(&self, backend: &B, handle: Handle) -> AxResult {
        if handle == self.root {
            return Ok(());
        }
        let mut tree = self.tree.write();
        if !tree.nodes.contains_key(&handle) {
            return ax_err!(NotFound, format!("no object with handle {:?}", handle));
        }
        if tree.frozen {
            return ax_err!(WouldBlock, "object hierarchy is frozen for suspend");
        }
        tree.remove(backend, handle)
    }

    /// Resolves `handle` to the identity and data of its object.
    pub(crate) fn resolve(&self, handle: Handle) -> AxResult<(Identity, ObjectData<B>)> {
        let tree = self.tree.read();
        match tree.nodes.get(&handle) {
            Some(node) => Ok((node.identity, node.data.clone())),
            None => ax_err!(NotFound, format!("no object with handle {:?}", handle)),
        }
    }

    /// Looks up the handle of the object named by `identity`.
    pub fn lookup(&self, identity: &Identity) -> Option<Handle> {
        self.tree.read().by_identity.get(identity).copied()
    }

    /// Returns a snapshot of the object addressed by `handle`.
    pub fn info(&self, handle: Handle) -> Option<ObjectInfo> {
        self.tree.read().nodes.get(&handle).map(|node| node.info(handle))
    }

    /// The number of live objects, the root included.
    pub fn len(&self) -> usize {
        self.tree.read().nodes.len()
    }

    /// Always `false`: the root object lives as long as the hierarchy.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Enumerates live objects in creation order, optionally only those of `kind`.
    ///
    /// The enumerator holds the hierarchy lock for reading until it is dropped, so the
    /// sequence it yields is consistent with concurrent create and close calls, which wait.
    /// Do not create or close objects on the same thread while holding it.
    pub fn enumerate(&self, kind: Option<ObjectKind>) -> Enumerator<'_, B> {
        Enumerator {
            tree: self.tree.read(),
            filter: Filter::Kind(kind),
            cursor: None,
        }
    }

    /// Enumerates the virtual CPUs of the virtual machine `vm`.
    pub fn enumerate_children(&self, vm: Handle) -> Enumerator<'_, B> {
        Enumerator {
            tree: self.tree.read(),
            filter: Filter::ChildrenOf(vm),
            cursor: None,
        }
    }

    /// Freezes the hierarchy and offers every virtual CPU to `signal`, returning how many
    /// were signaled.
    ///
    /// Runs under the write lock, so no virtual CPU can appear or vanish during the sweep,
    /// and none can until [`DeviceHierarchy::thaw`].
    pub(crate) fn freeze_and_sweep<F>(&self, mut signal: F) -> usize
    where
        F: FnMut(&Identity, &B::VCpu) -> bool,
    {
        let mut tree = self.tree.write();
        tree.frozen = true;
        tree.nodes
            .values()
            .filter(|node| match &node.data {
                ObjectData::VCpu(vcpu) => signal(&node.identity, vcpu),
                _ => false,
            })
            .count()
    }

    /// Lifts the freeze set by [`DeviceHierarchy::freeze_and_sweep`].
    pub(crate) fn thaw(&self) {
        self.tree.write().frozen = false;
    }

    /// Whether create and close are currently refused.
    pub fn is_frozen(&self) -> bool {
        self.tree.read().frozen
    }

    /// Releases every virtual machine (and its virtual CPUs). Used at unload.
    pub(crate) fn release_all(&self, backend: &B) {
        let mut tree = self.tree.write();
        let vms: Vec<Handle> = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.identity.kind() == ObjectKind::VirtualMachine)
            .map(|(handle, _)| *handle)
            .collect();
        for vm in vms {
            if let Err(err) = tree.remove(backend, vm) {
                log::warn!("releasing {:?} at unload failed: {:?}", vm, err);
            }
        }
    }
}

enum Filter {
    Kind(Option<ObjectKind>),
    ChildrenOf(Handle),
}

/// A lazy, restartable walk over the control objects of a [`DeviceHierarchy`].
pub struct Enumerator<'a, B: AxVmmBackend> {
    tree: RwLockReadGuard<'a, Tree<B>>,
    filter: Filter,
    cursor: Option<Handle>,
}

impl<B: AxVmmBackend> Enumerator<'_, B> {
    /// Restarts the walk from the first object.
    pub fn rewind(&mut self) {
        self.cursor = None;
    }

    fn matches(&self, node: &Node<B>) -> bool {
        match self.filter {
            Filter::Kind(None) => true,
            Filter::Kind(Some(kind)) => node.identity.kind() == kind,
            Filter::ChildrenOf(parent) => node.parent == Some(parent),
        }
    }
}

impl<B: AxVmmBackend> Iterator for Enumerator<'_, B> {
    type Item = ObjectInfo;

    fn next(&mut self) -> Option<ObjectInfo> {
        loop {
            let (handle, node) = match self.cursor {
                None => self.tree.nodes.iter().next()?,
                Some(cursor) => self
                    .tree
                    .nodes
                    .range((Bound::Excluded(cursor), Bound::Unbounded))
                    .next()?,
            };
            let info = node.info(*handle);
            let matched = self.matches(node);
            self.cursor = Some(info.handle);
            if matched {
                return Some(info);
            }
        }
    }
}
