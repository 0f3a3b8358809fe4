use alloc::string::String;

/// The default base name of the root object.
pub const DEFAULT_DEVICE_NAME: &str = "axvm";

/// Load-time configuration of an [`AxVmmDriver`](crate::AxVmmDriver).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AxVmmConfig {
    /// The name of the root object. Virtual machine and virtual CPU names derive from it.
    pub device_name: String,
    /// Whether the root name is published through [`AxVmmHal`](crate::AxVmmHal) at load.
    pub publish_root: bool,
}

impl AxVmmConfig {
    /// A configuration with root name `device_name`, published at load.
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            publish_root: true,
        }
    }
}

impl Default for AxVmmConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_NAME)
    }
}
