// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Compiled shader modules and their entry points.
use crate::imp;
use std::fmt::Display;
use std::sync::Arc;

/// The pipeline stage an entry point was declared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionType {
    Kernel,
    Vertex,
    Fragment,
    Other,
}

/// The shader compiler rejected the source.
///
/// The diagnostic is the compiler's text, unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError(pub(crate) String);

impl CompileError {
    pub fn diagnostic(&self) -> &str {
        &self.0
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CompileError {}

impl From<imp::Error> for CompileError {
    fn from(e: imp::Error) -> Self {
        match e {
            imp::Error::Compile(diagnostic) => CompileError(diagnostic),
            other => CompileError(other.to_string()),
        }
    }
}

/// A compiled WGSL module.
#[derive(Debug, Clone)]
pub struct Library(pub(crate) Arc<imp::Library>);

impl Library {
    /// Looks up an entry point by its exact name.
    pub fn function(&self, name: &str) -> Option<Function> {
        let index = self.0.entry_point_index(name)?;
        Some(Function {
            library: self.0.clone(),
            index,
        })
    }

    pub fn function_names(&self) -> Vec<String> {
        self.0
            .reflection()
            .entry_points
            .iter()
            .map(|ep| ep.name.clone())
            .collect()
    }
}

/// A named entry point of a [Library].
///
/// Holds its own reference to the compiled module, so it outlives the `Library` it came from.
#[derive(Debug, Clone)]
pub struct Function {
    pub(crate) library: Arc<imp::Library>,
    pub(crate) index: usize,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.library.reflection().entry_points[self.index].name
    }

    pub fn function_type(&self) -> FunctionType {
        self.library.reflection().entry_points[self.index].function_type
    }
}
