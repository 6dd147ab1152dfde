// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
mod bound_device;
mod buffer;
mod entry_point;
mod error;
mod library;
mod pipeline;
mod submit;

pub(crate) use bound_device::BoundDevice;
pub(crate) use buffer::Buffer;
pub(crate) use entry_point::EntryPoint;
pub(crate) use error::Error;
pub(crate) use library::{BindingKind, Library};
pub(crate) use pipeline::ComputePipeline;
pub(crate) use submit::{fail, submit};
