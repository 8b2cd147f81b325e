//! Loading of templates that were compiled into a shared object.
//!
//! The object was built from the C source the [`CCode`](crate::ccode)
//! backend emits; it exports one entry, `show_template(void *userdata)`,
//! and resolves the callback ABI against the host process at load time.

use std::ffi::c_void;
use std::path::Path;

use crate::error::{CompileError, Error};
use crate::runtime::Handler;

/// Signature of the exported template entry.
type ShowTemplate = unsafe extern "C" fn(*mut c_void);

/// A previously compiled template, loaded from disk.
pub struct Library {
    /// Keeps the mapped object alive while `entry` is callable.
    #[allow(dead_code)]
    library: libloading::Library,
    entry: ShowTemplate,
}

// Safety: the loaded code is immutable; every render carries its own handler.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    /// Opens a shared object and resolves its template entry.
    pub fn open(path: &Path) -> Result<Self, Error> {
        // Safety: loading runs the object's initializers; a template object
        // has none beyond libc bookkeeping.
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            CompileError::emit(format!("failed to load {}: {}", path.display(), e))
        })?;

        let entry = unsafe {
            let symbol: libloading::Symbol<'_, ShowTemplate> =
                library.get(b"show_template\0").map_err(|e| {
                    CompileError::emit(format!(
                        "{} does not export show_template: {}",
                        path.display(),
                        e
                    ))
                })?;
            *symbol
        };

        log::debug!("loaded compiled template from {}", path.display());
        Ok(Self { library, entry })
    }

    /// Runs the loaded template against a handler.
    pub fn process(&self, handler: &mut Handler<'_>) {
        // Safety: the entry follows the callback ABI contract and the
        // handler outlives the call.
        unsafe { (self.entry)(handler as *mut Handler as *mut c_void) }
    }
}
