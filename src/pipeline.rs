// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Validated compute pipelines.
use crate::imp;
use std::fmt::Display;
use std::sync::Arc;

/// Threads per threadgroup in each dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadgroupSize {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl ThreadgroupSize {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        ThreadgroupSize {
            width,
            height,
            depth,
        }
    }

    pub const fn total(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    /**
    The number of threadgroups needed to cover a grid of `threads`.

    Partial threadgroups round up; a zero dimension stays zero.
    */
    pub fn threadgroups_for(&self, threads: [u32; 3]) -> [u32; 3] {
        [
            threads[0].div_ceil(self.width),
            threads[1].div_ceil(self.height),
            threads[2].div_ceil(self.depth),
        ]
    }
}

impl Display for ThreadgroupSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// The function can't be turned into a pipeline on this device.
#[derive(Debug)]
pub struct PipelineBuildError(pub(crate) imp::Error);

impl PipelineBuildError {
    pub fn diagnostic(&self) -> String {
        self.0.to_string()
    }
}

impl Display for PipelineBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl std::error::Error for PipelineBuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.0)
    }
}

/**
An immutable compute pipeline, valid for dispatch only on the device that built it.

Cheap to clone, and may be bound into any number of encoders.
*/
#[derive(Debug, Clone)]
pub struct PipelineState(pub(crate) Arc<imp::ComputePipeline>);

impl PipelineState {
    /// The workgroup size the kernel declares.
    pub fn threadgroup_size(&self) -> ThreadgroupSize {
        self.0.threadgroup_size()
    }

    /// The device's limit on threads in one threadgroup.
    pub fn max_total_threads_per_threadgroup(&self) -> u32 {
        self.0.max_total_threads()
    }

    pub fn function_name(&self) -> &str {
        self.0.function_name()
    }
}
