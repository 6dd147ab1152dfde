// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0

/// Backend error. Diagnostic strings are carried exactly as the backend produced them.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("No such adapter")]
    NoSuchAdapter,
    #[error("{0}")]
    RequestDeviceError(#[from] wgpu::RequestDeviceError),
    #[error("{0}")]
    Compile(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unsupported(String),
}

impl From<wgpu::Error> for Error {
    fn from(e: wgpu::Error) -> Self {
        Error::Validation(e.to_string())
    }
}
