//! Hardware abstraction for device enumeration and stream creation
//!
//! [`CpalBackend`] talks to the system audio host. Streams returned by a
//! backend are created, kept and dropped on the controller's session thread,
//! so they do not need to be `Send`.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize};
use tracing::{debug, error, warn};

use crate::audio::capture::CaptureProcessor;
use crate::audio::device::{DeviceDescriptor, DeviceId};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::monitor::MonitorProcessor;

/// Negotiated parameters for opening one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Interleaved channel count
    pub channels: u16,
    /// Requested sample rate in Hz
    pub sample_rate: u32,
    /// Requested frames per callback
    pub block_size: u32,
}

impl StreamParams {
    /// Duration of one block in seconds, the callback's time budget
    pub fn block_duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        f64::from(self.block_size) / f64::from(self.sample_rate)
    }
}

/// Audio host operations used by the device registry and stream controller
pub trait AudioBackend: Send + Sync + 'static {
    /// Open stream handle; dropping it must detach the callback from the device
    type Stream: 'static;

    /// Enumerate all devices of the host
    ///
    /// # Errors
    /// `AudioError::DeviceUnavailable` if the host cannot be queried.
    fn devices(&self) -> AudioResult<Vec<DeviceDescriptor>>;

    /// Open and start a capture stream driving `processor`
    fn open_input(
        &self,
        device: &DeviceDescriptor,
        params: &StreamParams,
        processor: CaptureProcessor,
    ) -> AudioResult<Self::Stream>;

    /// Open and start a playback stream driven by `processor`
    fn open_output(
        &self,
        device: &DeviceDescriptor,
        params: &StreamParams,
        processor: MonitorProcessor,
    ) -> AudioResult<Self::Stream>;
}

/// [`AudioBackend`] over the default cpal host
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    fn describe(
        index: usize,
        device: &Device,
        default_input: Option<&str>,
        default_output: Option<&str>,
    ) -> DeviceDescriptor {
        let name = device.name().unwrap_or_default();
        let max_input_channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);
        let max_output_channels = device
            .supported_output_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);
        let default_sample_rate = device
            .default_input_config()
            .or_else(|_| device.default_output_config())
            .map(|config| config.sample_rate().0)
            .unwrap_or(0);

        DeviceDescriptor {
            id: DeviceId(index),
            is_default_input: max_input_channels > 0 && default_input == Some(name.as_str()),
            is_default_output: max_output_channels > 0 && default_output == Some(name.as_str()),
            name,
            max_input_channels,
            max_output_channels,
            default_sample_rate,
        }
    }

    /// Find the cpal device behind a descriptor
    ///
    /// Indices shift when devices are plugged in or removed, so the name must
    /// match too; a device with the same name at another index is accepted.
    fn resolve(host: &Host, descriptor: &DeviceDescriptor) -> AudioResult<Device> {
        let mut by_name = None;
        for (index, device) in host.devices()?.enumerate() {
            let Ok(name) = device.name() else {
                continue;
            };
            if name != descriptor.name {
                continue;
            }
            if index == descriptor.id.index() {
                return Ok(device);
            }
            by_name.get_or_insert(device);
        }
        by_name.ok_or(AudioError::DeviceNotFound(descriptor.id))
    }

    /// Build a stream config, pinning the buffer size where the device allows it
    fn stream_config<I>(ranges: I, params: &StreamParams) -> StreamConfig
    where
        I: IntoIterator<Item = cpal::SupportedStreamConfigRange>,
    {
        let rate = SampleRate(params.sample_rate);
        let matching = ranges.into_iter().find(|range| {
            range.channels() == params.channels
                && range.sample_format() == SampleFormat::F32
                && range.min_sample_rate() <= rate
                && rate <= range.max_sample_rate()
        });
        let buffer_size = match matching {
            Some(range) => fixed_buffer_size(range.buffer_size(), params.block_size),
            None => {
                debug!(?params, "No exact f32 config match, using default buffer size");
                BufferSize::Default
            }
        };

        StreamConfig {
            channels: params.channels,
            sample_rate: rate,
            buffer_size,
        }
    }
}

/// Clamp the requested block size into the range the device supports
pub(crate) fn fixed_buffer_size(supported: &SupportedBufferSize, frames: u32) -> BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } => BufferSize::Fixed(frames.clamp(*min, *max)),
        SupportedBufferSize::Unknown => BufferSize::Default,
    }
}

impl AudioBackend for CpalBackend {
    type Stream = cpal::Stream;

    fn devices(&self) -> AudioResult<Vec<DeviceDescriptor>> {
        let host = cpal::default_host();
        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        Ok(host
            .devices()?
            .enumerate()
            .map(|(index, device)| {
                Self::describe(
                    index,
                    &device,
                    default_input.as_deref(),
                    default_output.as_deref(),
                )
            })
            .collect())
    }

    fn open_input(
        &self,
        descriptor: &DeviceDescriptor,
        params: &StreamParams,
        mut processor: CaptureProcessor,
    ) -> AudioResult<Self::Stream> {
        let host = cpal::default_host();
        let device = Self::resolve(&host, descriptor)?;
        let ranges = device
            .supported_input_configs()
            .map_err(|e| AudioError::DeviceOpen(e.to_string()))?;
        let config = Self::stream_config(ranges, params);
        debug!(device = %descriptor.name, ?config, "Building input stream");

        let controls = processor.controls();
        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| processor.process(data),
            move |err| {
                controls.record_callback_error();
                error!("Input stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;
        Ok(stream)
    }

    fn open_output(
        &self,
        descriptor: &DeviceDescriptor,
        params: &StreamParams,
        mut processor: MonitorProcessor,
    ) -> AudioResult<Self::Stream> {
        let host = cpal::default_host();
        let device = Self::resolve(&host, descriptor)?;
        let ranges = device
            .supported_output_configs()
            .map_err(|e| AudioError::DeviceOpen(e.to_string()))?;
        let config = Self::stream_config(ranges, params);
        if descriptor.default_sample_rate != 0 && descriptor.default_sample_rate != params.sample_rate {
            warn!(
                device = %descriptor.name,
                native = descriptor.default_sample_rate,
                requested = params.sample_rate,
                "Output device runs at a different native rate"
            );
        }
        debug!(device = %descriptor.name, ?config, "Building output stream");

        let controls = processor.controls();
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| processor.render(data),
            move |err| {
                controls.record_callback_error();
                error!("Output stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;
        Ok(stream)
    }
}
