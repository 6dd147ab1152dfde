// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::library::{BindingKind, Library};
use super::{BoundDevice, Error};
use crate::pipeline::ThreadgroupSize;
use crate::shader::FunctionType;
use std::sync::Arc;
use wgpu::{
    BindGroupLayoutEntry, BindingType, BufferBindingType, PipelineLayoutDescriptor, ShaderStages,
};

/// Checks a declared workgroup size against the device's limits.
pub(crate) fn check_workgroup_size(size: ThreadgroupSize, limits: &wgpu::Limits) -> Result<(), String> {
    let per_dimension = [
        (size.width, limits.max_compute_workgroup_size_x, "x"),
        (size.height, limits.max_compute_workgroup_size_y, "y"),
        (size.depth, limits.max_compute_workgroup_size_z, "z"),
    ];
    for (value, max, axis) in per_dimension {
        if value == 0 || value > max {
            return Err(format!(
                "workgroup size {value} in {axis} is outside the device range 1..={max}"
            ));
        }
    }
    let total = size.total();
    let max_total = limits.max_compute_invocations_per_workgroup as u64;
    if total > max_total {
        return Err(format!(
            "workgroup of {total} threads exceeds the device maximum of {max_total} threads per workgroup"
        ));
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct ComputePipeline {
    device_id: u64,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    /// group 0 bindings the kernel uses, sorted by index
    bindings: Vec<(u32, BindingKind)>,
    threadgroup_size: ThreadgroupSize,
    max_total_threads: u32,
    function_name: String,
}

impl ComputePipeline {
    pub(crate) fn build(device: &BoundDevice, library: &Arc<Library>, index: usize) -> Result<Self, Error> {
        let entry = &library.reflection().entry_points[index];
        if library.device_id() != device.id() {
            return Err(Error::Unsupported(format!(
                "function `{}` was compiled for a different device",
                entry.name
            )));
        }
        if entry.function_type != FunctionType::Kernel {
            return Err(Error::Unsupported(format!(
                "function `{}` is a {:?} function, not a compute kernel",
                entry.name, entry.function_type
            )));
        }
        let [width, height, depth] = entry.workgroup_size.ok_or_else(|| {
            Error::Unsupported(format!(
                "workgroup size of `{}` depends on pipeline-overridable constants",
                entry.name
            ))
        })?;
        let threadgroup_size = ThreadgroupSize::new(width, height, depth);
        let limits = device.limits();
        check_workgroup_size(threadgroup_size, &limits).map_err(Error::Unsupported)?;

        let mut bindings = Vec::new();
        let mut entries = Vec::new();
        for info in &entry.bindings {
            let label = info.name.as_deref().unwrap_or("<unnamed>");
            if info.group != 0 {
                return Err(Error::Unsupported(format!(
                    "binding `{label}` is in group {}; only group 0 can be bound",
                    info.group
                )));
            }
            let ty = match info.kind {
                BindingKind::Storage { read_only } => BufferBindingType::Storage { read_only },
                BindingKind::Uniform => BufferBindingType::Uniform,
                BindingKind::Other => {
                    return Err(Error::Unsupported(format!(
                        "binding `{label}` at index {} is not a buffer",
                        info.binding
                    )));
                }
            };
            bindings.push((info.binding, info.kind));
            entries.push(BindGroupLayoutEntry {
                binding: info.binding,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Buffer {
                    ty,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }

        let ((pipeline, layout), error) = device.scoped(|d| {
            let layout = d.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("kq group 0"),
                entries: &entries,
            });
            let pipeline_layout = d.create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some("kq pipeline layout"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = d.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&entry.name),
                layout: Some(&pipeline_layout),
                module: library.module(),
                entry_point: Some(&entry.name),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            (pipeline, layout)
        });
        if let Some(e) = error {
            return Err(e.into());
        }
        logwise::info_sync!(
            "built compute pipeline {name}",
            name = logwise::privacy::LogIt(&entry.name)
        );
        Ok(ComputePipeline {
            device_id: device.id(),
            pipeline,
            layout,
            bindings,
            threadgroup_size,
            max_total_threads: limits.max_compute_invocations_per_workgroup,
            function_name: entry.name.clone(),
        })
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device_id
    }

    pub(crate) fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    pub(crate) fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub(crate) fn bindings(&self) -> &[(u32, BindingKind)] {
        &self.bindings
    }

    pub(crate) fn threadgroup_size(&self) -> ThreadgroupSize {
        self.threadgroup_size
    }

    pub(crate) fn max_total_threads(&self) -> u32 {
        self.max_total_threads
    }

    pub(crate) fn function_name(&self) -> &str {
        &self.function_name
    }
}
