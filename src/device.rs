// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Compute devices, and the root of every object created on one.
use std::fmt::Formatter;
use std::str::FromStr;
use std::sync::Arc;

use crate::buffer::{Buffer, StorageMode};
use crate::command_queue::CommandQueue;
use crate::imp;
use crate::pipeline::{PipelineBuildError, PipelineState};
use crate::shader::{CompileError, Function, Library};

/// Which adapter to prefer when more than one is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PowerPreference {
    /// Let the backend decide.
    #[default]
    None,
    LowPower,
    HighPerformance,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown power preference `{0}`, expected `low`, `high` or `none`")]
pub struct UnknownPowerPreference(String);

impl FromStr for PowerPreference {
    type Err = UnknownPowerPreference;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(PowerPreference::None),
            "low" | "low_power" => Ok(PowerPreference::LowPower),
            "high" | "high_performance" => Ok(PowerPreference::HighPerformance),
            _ => Err(UnknownPowerPreference(s.to_string())),
        }
    }
}

/// How to choose and open a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOptions {
    pub power_preference: PowerPreference,
    /// Only accept a software adapter.
    pub force_fallback_adapter: bool,
    /// Debug label for the device.
    pub label: String,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        DeviceOptions {
            power_preference: PowerPreference::None,
            force_fallback_adapter: false,
            label: "kernels_and_queues".to_string(),
        }
    }
}

impl DeviceOptions {
    /**
    Options read from the environment.

    * `KQ_POWER_PREFERENCE`: `low`, `high` or `none`.
    * `KQ_FORCE_FALLBACK_ADAPTER`: `1` to require a software adapter.

    Unset or unparseable variables keep their defaults.
    */
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = DeviceOptions::default();
        if let Some(value) = lookup("KQ_POWER_PREFERENCE") {
            match value.parse() {
                Ok(p) => options.power_preference = p,
                Err(e) => logwise::warn_sync!(
                    "ignoring KQ_POWER_PREFERENCE: {e}",
                    e = logwise::privacy::LogIt(&e)
                ),
            }
        }
        if let Some(value) = lookup("KQ_FORCE_FALLBACK_ADAPTER") {
            options.force_fallback_adapter = value.trim() == "1";
        }
        options
    }
}

/// The device could not be found or opened.
#[derive(Debug)]
pub struct DeviceError(imp::Error);
impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}
impl std::error::Error for DeviceError {}

/**
A compute accelerator.

Clones refer to the same device. Everything created from a device holds a reference to it,
so dropping the `Device` never invalidates buffers, libraries, pipelines or queues.
*/
#[derive(Debug, Clone)]
pub struct Device(pub(crate) imp::BoundDevice);

impl Device {
    /// The system's default device, or `None` if there is no usable adapter.
    pub fn create_default() -> Option<Device> {
        match Self::with_options(&DeviceOptions::from_env()) {
            Ok(device) => Some(device),
            Err(e) => {
                logwise::warn_sync!(
                    "no default device: {e}",
                    e = logwise::privacy::LogIt(&e)
                );
                None
            }
        }
    }

    pub fn with_options(options: &DeviceOptions) -> Result<Device, DeviceError> {
        let adapter = imp::BoundDevice::pick(options).map_err(DeviceError)?;
        imp::BoundDevice::bind(adapter, &options.label)
            .map(Device)
            .map_err(DeviceError)
    }

    /// Opens every adapter the backend can see. Adapters that fail to open are skipped.
    pub fn enumerate() -> Vec<Device> {
        imp::BoundDevice::enumerate_adapters()
            .into_iter()
            .filter_map(|adapter| match imp::BoundDevice::bind(adapter, "kernels_and_queues") {
                Ok(d) => Some(Device(d)),
                Err(e) => {
                    logwise::warn_sync!(
                        "skipping adapter: {e}",
                        e = logwise::privacy::LogIt(&e)
                    );
                    None
                }
            })
            .collect()
    }

    /// The adapter name.
    pub fn name(&self) -> String {
        self.0.name()
    }

    pub fn max_threads_per_threadgroup(&self) -> u32 {
        self.0.limits().max_compute_invocations_per_workgroup
    }

    /// Buffer offsets passed to [crate::ComputeEncoder::set_buffer] must be multiples of this.
    ///
    /// It satisfies both the storage and the uniform alignment of the device.
    pub fn min_buffer_offset_alignment(&self) -> usize {
        let limits = self.0.limits();
        limits
            .min_storage_buffer_offset_alignment
            .max(limits.min_uniform_buffer_offset_alignment) as usize
    }

    pub fn new_command_queue(&self) -> CommandQueue {
        CommandQueue::new(self.clone())
    }

    /**
    Allocates a buffer of exactly `length` bytes.

    A zero length is allowed. Returns `None` when the device can't allocate the buffer.
    */
    pub fn new_buffer(&self, length: usize, mode: StorageMode) -> Option<Buffer> {
        match imp::Buffer::new(&self.0, length, mode) {
            Ok(b) => Some(Buffer(Arc::new(b))),
            Err(e) => {
                logwise::warn_sync!(
                    "buffer allocation failed: {e}",
                    e = logwise::privacy::LogIt(&e)
                );
                None
            }
        }
    }

    /// Compiles WGSL source.
    pub fn new_library(&self, source: &str) -> Result<Library, CompileError> {
        imp::Library::compile(&self.0, source)
            .map(|l| Library(Arc::new(l)))
            .map_err(CompileError::from)
    }

    pub fn new_compute_pipeline(&self, function: &Function) -> Result<PipelineState, PipelineBuildError> {
        imp::ComputePipeline::build(&self.0, &function.library, function.index)
            .map(|p| PipelineState(Arc::new(p)))
            .map_err(PipelineBuildError)
    }

    pub(crate) fn id(&self) -> u64 {
        self.0.id()
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Device {}

impl std::hash::Hash for Device {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_preference_parses() {
        assert_eq!("low".parse(), Ok(PowerPreference::LowPower));
        assert_eq!("HIGH".parse(), Ok(PowerPreference::HighPerformance));
        assert_eq!(" none ".parse(), Ok(PowerPreference::None));
        assert!("fast".parse::<PowerPreference>().is_err());
    }

    #[test]
    fn options_from_lookup() {
        let options = DeviceOptions::from_lookup(|key| match key {
            "KQ_POWER_PREFERENCE" => Some("high".to_string()),
            "KQ_FORCE_FALLBACK_ADAPTER" => Some("1".to_string()),
            _ => None,
        });
        assert_eq!(options.power_preference, PowerPreference::HighPerformance);
        assert!(options.force_fallback_adapter);
    }

    #[test]
    fn bad_environment_keeps_defaults() {
        let options = DeviceOptions::from_lookup(|key| match key {
            "KQ_POWER_PREFERENCE" => Some("turbo".to_string()),
            "KQ_FORCE_FALLBACK_ADAPTER" => Some("yes".to_string()),
            _ => None,
        });
        assert_eq!(options, DeviceOptions::default());
    }
}
