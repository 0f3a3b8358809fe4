// Copyright 2025 The Axvisor Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! AxVmCtl - the control-object layer between a host I/O-control transport and a hypervisor core.
//!
//! This crate exposes a hierarchy of addressable control objects (one root, one per virtual
//! machine, one per virtual CPU), routes opaque commands to the virtualization backend based
//! on the kind of object they target, and quiesces every virtual CPU execution context across
//! a host suspend. The virtualization core itself is reached through the `AxVmmBackend` trait.
//!
//! # Features
//!
//! - Root / VM / VCPU control objects with deterministic identities
//! - Per-kind command namespaces and an all-or-nothing response buffer protocol
//! - Translation of internal errors into host status codes
//! - Suspend/resume state machine (Running → Suspending → Suspended → Resuming → Running)
//! - Park barrier for virtual CPU execution contexts during a host power transition

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// Core modules
mod backend; // Virtualization backend trait definition
mod command; // Command codes and the response buffer protocol
mod config; // Load-time configuration
mod driver; // Load/unload and the public request surface
mod hal; // Host abstraction layer interfaces
mod hierarchy; // Control object registry and enumeration
mod object; // Control object kinds, identities and handles
mod router; // Command dispatch by object kind
mod status; // Host status translation
mod suspend; // Suspend/resume quiescence

// Public API exports
pub use backend::AxVmmBackend;
pub use command::{CommandCode, Namespace, ResponseBuffer, CREATE_VCPU, CREATE_VM};
pub use config::{AxVmmConfig, DEFAULT_DEVICE_NAME};
pub use driver::{AxVmmDriver, CpuVendor, VirtTech, PAGE_SIZE};
pub use hal::AxVmmHal;
pub use hierarchy::{DeviceHierarchy, Enumerator};
pub use object::{Handle, Identity, ObjectInfo, ObjectKind, MAX_VCPU_INDEX};
pub use router::{Response, Router};
pub use status::{status_of, translate, HostStatus};
pub use suspend::{ParkToken, PowerEvent, PowerState, QuiescenceCoordinator, SuspendBarrier};
