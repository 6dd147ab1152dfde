// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::{BoundDevice, Error};
use crate::shader::FunctionType;
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryPointInfo {
    pub(crate) name: String,
    pub(crate) function_type: FunctionType,
    /// `None` when the size depends on pipeline-overridable constants.
    pub(crate) workgroup_size: Option<[u32; 3]>,
    /// Resources this entry point actually uses, sorted by group and binding
    pub(crate) bindings: Vec<BindingInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindingKind {
    Storage { read_only: bool },
    Uniform,
    /// textures, samplers and anything else a compute dispatch here can't bind
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BindingInfo {
    pub(crate) group: u32,
    pub(crate) binding: u32,
    pub(crate) kind: BindingKind,
    pub(crate) name: Option<String>,
}

/// What the rest of the crate needs to know about a compiled module.
#[derive(Debug, Clone)]
pub(crate) struct Reflection {
    pub(crate) entry_points: Vec<EntryPointInfo>,
}

fn binding_info(var: &naga::GlobalVariable) -> Option<BindingInfo> {
    let resource = var.binding.as_ref()?;
    let kind = match var.space {
        naga::AddressSpace::Storage { access } => BindingKind::Storage {
            read_only: !access.contains(naga::StorageAccess::STORE),
        },
        naga::AddressSpace::Uniform => BindingKind::Uniform,
        _ => BindingKind::Other,
    };
    Some(BindingInfo {
        group: resource.group,
        binding: resource.binding,
        kind,
        name: var.name.clone(),
    })
}

/// Parses and validates WGSL, and extracts each entry point with the resources it uses.
///
/// Failures carry naga's rendered diagnostic unchanged.
pub(crate) fn reflect(source: &str) -> Result<Reflection, Error> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| Error::Compile(e.emit_to_string(source)))?;
    //usage analysis only; the device validates again against its own capabilities
    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| Error::Compile(e.emit_to_string(source)))?;

    let entry_points = module
        .entry_points
        .iter()
        .enumerate()
        .map(|(index, ep)| {
            let function_type = match ep.stage {
                naga::ShaderStage::Compute => FunctionType::Kernel,
                naga::ShaderStage::Vertex => FunctionType::Vertex,
                naga::ShaderStage::Fragment => FunctionType::Fragment,
                #[allow(unreachable_patterns)]
                _ => FunctionType::Other,
            };
            let workgroup_size = match (function_type, &ep.workgroup_size_overrides) {
                (FunctionType::Kernel, None) => Some(ep.workgroup_size),
                _ => None,
            };
            let uses = info.get_entry_point(index);
            let mut bindings: Vec<BindingInfo> = module
                .global_variables
                .iter()
                .filter(|(handle, _)| !uses[*handle].is_empty())
                .filter_map(|(_, var)| binding_info(var))
                .collect();
            bindings.sort_by_key(|b| (b.group, b.binding));
            EntryPointInfo {
                name: ep.name.clone(),
                function_type,
                workgroup_size,
                bindings,
            }
        })
        .collect();

    Ok(Reflection { entry_points })
}

#[derive(Debug)]
pub(crate) struct Library {
    device: BoundDevice,
    module: wgpu::ShaderModule,
    reflection: Reflection,
}

impl Library {
    pub(crate) fn compile(device: &BoundDevice, source: &str) -> Result<Self, Error> {
        let reflection = reflect(source)?;
        let (module, error) = device.scoped(|d| {
            d.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("kq library"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            })
        });
        if let Some(e) = error {
            return Err(Error::Compile(e.to_string()));
        }
        logwise::info_sync!(
            "compiled library with {count} entry points",
            count = reflection.entry_points.len()
        );
        Ok(Library {
            device: device.clone(),
            module,
            reflection,
        })
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device.id()
    }

    pub(crate) fn module(&self) -> &wgpu::ShaderModule {
        &self.module
    }

    pub(crate) fn reflection(&self) -> &Reflection {
        &self.reflection
    }

    /// Exact-name lookup.
    pub(crate) fn entry_point_index(&self, name: &str) -> Option<usize> {
        self.reflection.entry_points.iter().position(|ep| ep.name == name)
    }
}
