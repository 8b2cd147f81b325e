//! The template facade: compile source, or load a shared object, then
//! render against a data binding.

use std::path::Path;

use crate::bytecode::Bytecode;
use crate::ccode::CCode;
use crate::data::Data;
use crate::error::{Error, RuntimeError};
use crate::escaper;
use crate::library::Library;
use crate::parser;
use crate::runtime::Handler;

/// The executor behind a template: JIT bytecode, or a loaded shared object.
enum Executor {
    Jit(Bytecode),
    Shared(Library),
}

/// A compiled template, ready to render. Read-only after construction and
/// safe to share between threads; every render gets its own handler.
pub struct Template {
    executor: Executor,
}

impl Template {
    /// Compiles template source into native code.
    pub fn from_source(source: &str) -> Result<Self, Error> {
        let tree = parser::parse(source).map_err(|e| {
            log::debug!("template failed to compile: {}", e.format_with_source(source));
            e
        })?;
        let bytecode = Bytecode::new(tree)?;
        Ok(Self {
            executor: Executor::Jit(bytecode),
        })
    }

    /// Loads a template: a `.so` file is opened as a compiled shared
    /// object, anything else is read and compiled as template source.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if path.extension().is_some_and(|ext| ext == "so") {
            return Self::from_library(path);
        }
        let source = std::fs::read_to_string(path)?;
        Self::from_source(&source)
    }

    /// Loads a previously compiled shared object.
    pub fn from_library(path: impl AsRef<Path>) -> Result<Self, Error> {
        let library = Library::open(path.as_ref())?;
        Ok(Self {
            executor: Executor::Shared(library),
        })
    }

    /// The template as C source, compilable into a shared object. Only
    /// available for templates that were compiled from source.
    pub fn compile(&self) -> Result<String, Error> {
        match &self.executor {
            Executor::Jit(bytecode) => Ok(CCode::new(bytecode.tree())?.into_string()),
            Executor::Shared(_) => Err(RuntimeError::new(
                "a template loaded from a shared object has no source tree",
            )
            .into()),
        }
    }

    /// Renders the template without output encoding.
    pub fn process(&self, data: &Data) -> Result<String, Error> {
        self.process_encoded(data, "raw")
    }

    /// Renders the template, escaping value output with the named
    /// encoding (`raw`, `html`, `url`, ...).
    pub fn process_encoded(&self, data: &Data, encoding: &str) -> Result<String, Error> {
        let mut handler = Handler::new(data, escaper::get(encoding));
        match &self.executor {
            Executor::Jit(bytecode) => bytecode.process(&mut handler),
            Executor::Shared(library) => library.process(&mut handler),
        }
        for warning in handler.warnings() {
            log::trace!("render warning: {}", warning);
        }
        if handler.failed() {
            let message = handler.error_message().unwrap_or("render failed");
            return Err(RuntimeError::new(message).into());
        }
        Ok(handler.into_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_surfaces_at_construction() {
        assert!(Template::from_source("{if true}unclosed").is_err());
        assert!(Template::from_source("{$}").is_err());
    }

    #[test]
    fn renders_source_templates() {
        let template = Template::from_source("x{$v}y").unwrap();
        let mut data = Data::new();
        data.assign("v", "-");
        assert_eq!(template.process(&data).unwrap(), "x-y");
    }

    #[test]
    fn emits_c_source() {
        let template = Template::from_source("{$v}").unwrap();
        let source = template.compile().unwrap();
        assert!(source.contains("void show_template(void *userdata)"));
    }
}
