// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use std::sync::OnceLock;

static INSTANCE: OnceLock<wgpu::Instance> = OnceLock::new();

/// Process-wide wgpu instance, configured from the environment on first use.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryPoint;

impl EntryPoint {
    pub(crate) fn shared() -> &'static wgpu::Instance {
        INSTANCE.get_or_init(|| {
            let descriptor = wgpu::InstanceDescriptor::from_env_or_default();
            logwise::info_sync!(
                "creating wgpu instance for backends {backends}",
                backends = logwise::privacy::LogIt(&descriptor.backends)
            );
            wgpu::Instance::new(&descriptor)
        })
    }
}
