use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::backend::{AudioBackend, CpalBackend};
use crate::audio::error::{AudioError, AudioResult};

/// Identity of a device within one enumeration of the audio host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub usize);

impl DeviceId {
    /// Position of the device in the host's device list
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of an audio device's capabilities
///
/// Regenerated on every enumeration, never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device identifier (enumeration index)
    pub id: DeviceId,
    /// Human-readable device name
    pub name: String,
    /// Maximum number of input channels (0 for output-only devices)
    pub max_input_channels: u16,
    /// Maximum number of output channels (0 for input-only devices)
    pub max_output_channels: u16,
    /// Native sample rate in Hz
    pub default_sample_rate: u32,
    /// Whether this is the host's default input device
    pub is_default_input: bool,
    /// Whether this is the host's default output device
    pub is_default_output: bool,
}

impl DeviceDescriptor {
    /// Whether the device can capture audio
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }

    /// Whether the device can play audio
    pub fn is_output(&self) -> bool {
        self.max_output_channels > 0
    }

    /// Validate a descriptor produced by a backend
    ///
    /// Devices without any channels cannot be used by the controller and are
    /// dropped from the enumeration.
    pub(crate) fn validate(self) -> Option<Self> {
        if !self.is_input() && !self.is_output() {
            warn!(device = %self.name, "Skipping device without channels");
            return None;
        }
        if self.name.trim().is_empty() {
            return Some(Self {
                name: format!("Device {}", self.id),
                ..self
            });
        }
        Some(self)
    }
}

/// Device enumeration on top of an [`AudioBackend`]
///
/// An empty list means "no devices", only a failing host query is an error.
pub struct DeviceRegistry<B: AudioBackend = CpalBackend> {
    backend: Arc<B>,
}

impl<B: AudioBackend> Clone for DeviceRegistry<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl DeviceRegistry<CpalBackend> {
    /// Registry over the default cpal host
    ///
    /// # Example
    /// ```no_run
    /// use pickbeat::audio::DeviceRegistry;
    ///
    /// let registry = DeviceRegistry::system();
    /// for device in registry.list_input_devices().unwrap_or_default() {
    ///     println!("{} {} ({} ch)", device.id, device.name, device.max_input_channels);
    /// }
    /// ```
    pub fn system() -> Self {
        Self::new(Arc::new(CpalBackend))
    }
}

impl<B: AudioBackend> DeviceRegistry<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// All usable devices
    ///
    /// # Errors
    /// Returns `AudioError::DeviceUnavailable` if the host cannot be queried.
    pub fn list_devices(&self) -> AudioResult<Vec<DeviceDescriptor>> {
        let devices: Vec<DeviceDescriptor> = self
            .backend
            .devices()?
            .into_iter()
            .filter_map(DeviceDescriptor::validate)
            .collect();
        debug!(count = devices.len(), "Enumerated audio devices");
        Ok(devices)
    }

    /// Devices with at least one input channel
    pub fn list_input_devices(&self) -> AudioResult<Vec<DeviceDescriptor>> {
        Ok(self
            .list_devices()?
            .into_iter()
            .filter(DeviceDescriptor::is_input)
            .collect())
    }

    /// Devices with at least one output channel
    pub fn list_output_devices(&self) -> AudioResult<Vec<DeviceDescriptor>> {
        Ok(self
            .list_devices()?
            .into_iter()
            .filter(DeviceDescriptor::is_output)
            .collect())
    }

    /// Look up a device by id
    ///
    /// # Errors
    /// Returns `AudioError::DeviceNotFound` if the id is not in the current enumeration.
    pub fn find(&self, id: DeviceId) -> AudioResult<DeviceDescriptor> {
        self.list_devices()?
            .into_iter()
            .find(|device| device.id == id)
            .ok_or(AudioError::DeviceNotFound(id))
    }

    /// Number of input channels of a device
    pub fn channel_count(&self, id: DeviceId) -> AudioResult<u16> {
        Ok(self.find(id)?.max_input_channels)
    }

    /// The host's default input device, falling back to the first input device
    pub fn default_input_device(&self) -> AudioResult<Option<DeviceDescriptor>> {
        let devices = self.list_input_devices()?;
        let default = devices.iter().position(|d| d.is_default_input).unwrap_or(0);
        Ok(devices.into_iter().nth(default))
    }

    /// The host's default output device, falling back to the first output device
    pub fn default_output_device(&self) -> AudioResult<Option<DeviceDescriptor>> {
        let devices = self.list_output_devices()?;
        let default = devices.iter().position(|d| d.is_default_output).unwrap_or(0);
        Ok(devices.into_iter().nth(default))
    }
}
