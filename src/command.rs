use axerrno::{ax_err, AxResult};

/// The command namespace of a control object kind.
///
/// A command code belongs to exactly one namespace and is only meaningful when sent
/// to an object of the matching kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Namespace {
    /// Root-management commands.
    Root = 0xAE01,
    /// VM-management commands.
    Vm = 0xAE02,
    /// VCPU-management commands.
    VCpu = 0xAE03,
}

impl Namespace {
    const fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0xAE01 => Some(Namespace::Root),
            0xAE02 => Some(Namespace::Vm),
            0xAE03 => Some(Namespace::VCpu),
            _ => None,
        }
    }
}

/// A command code: the namespace in the upper 16 bits, the function number in the lower.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandCode(u32);

impl CommandCode {
    /// Builds the code of function `nr` in namespace `ns`.
    pub const fn new(ns: Namespace, nr: u16) -> Self {
        Self(((ns as u32) << 16) | nr as u32)
    }

    /// The raw code as carried by the transport.
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// The namespace this code belongs to, `None` if it belongs to none.
    pub const fn namespace(self) -> Option<Namespace> {
        Namespace::from_raw((self.0 >> 16) as u16)
    }

    /// The function number within the namespace.
    pub const fn nr(self) -> u16 {
        self.0 as u16
    }
}

impl From<u32> for CommandCode {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Root command: create a virtual machine.
///
/// Input: the VM index as a little-endian `u32`. Output: the new handle as a little-endian `u64`.
pub const CREATE_VM: CommandCode = CommandCode::new(Namespace::Root, 0x01);

/// VM command: create a virtual CPU in the addressed virtual machine.
///
/// Input: the CPU index as a little-endian `u32`. Output: the new handle as a little-endian `u64`.
pub const CREATE_VCPU: CommandCode = CommandCode::new(Namespace::Vm, 0x41);

/// Reads the little-endian `u32` argument at the start of `input`.
pub(crate) fn read_u32_arg(input: &[u8]) -> AxResult<u32> {
    match input.get(..4) {
        Some(bytes) => Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        None => ax_err!(InvalidInput, "command argument is shorter than 4 bytes"),
    }
}

/// The caller-supplied buffer a command writes its response payload into.
///
/// A write either lands completely or not at all.
pub struct ResponseBuffer<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl<'a> ResponseBuffer<'a> {
    /// Wraps `buf`, whose length is the response capacity.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, written: 0 }
    }

    /// The capacity of the buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The number of bytes produced so far.
    pub fn bytes_written(&self) -> usize {
        self.written
    }

    /// Copies `payload` into the buffer at `offset`.
    ///
    /// Fails with `StorageFull`, writing nothing, if `offset + payload.len()` exceeds the
    /// capacity. On success the response size becomes `offset + payload.len()`.
    pub fn write_at(&mut self, offset: usize, payload: &[u8]) -> AxResult {
        let end = match offset.checked_add(payload.len()) {
            Some(end) if end <= self.buf.len() => end,
            _ => {
                return ax_err!(
                    StorageFull,
                    alloc::format!(
                        "response of {} bytes at offset {} exceeds capacity {}",
                        payload.len(),
                        offset,
                        self.buf.len()
                    )
                )
            }
        };
        self.buf[offset..end].copy_from_slice(payload);
        self.written = end;
        Ok(())
    }

    /// Copies `payload` into the start of the buffer.
    pub fn write(&mut self, payload: &[u8]) -> AxResult {
        self.write_at(0, payload)
    }

    /// Fails with `StorageFull` unless `len` bytes fit at the start of the buffer.
    pub(crate) fn ensure_fits(&self, len: usize) -> AxResult {
        if len > self.buf.len() {
            return ax_err!(StorageFull, "response buffer too small for a handle");
        }
        Ok(())
    }
}
