// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::pipeline::PipelineBuildError;
use crate::shader::CompileError;

/// Every way an operation of this crate can fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("required argument `{0}` was null")]
    NullArgument(&'static str),
    #[error("argument `{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error(transparent)]
    Compilation(#[from] CompileError),
    #[error(transparent)]
    PipelineBuild(#[from] PipelineBuildError),
    /// Details of execution errors only go to the log.
    #[error("command buffer finished with an execution error")]
    Execution,
}
