//! Generators loaded from shared libraries.
//!
//! A plugin library exports, with C linkage:
//!
//! - `schemagen_abi_version() -> u32`, which must equal [`ABI_VERSION`]
//! - `schemagen_generator_name() -> *const c_char`, a static NUL-terminated
//!   name used as log label and output subdirectory
//! - `schemagen_generator_create() -> *mut c_void`, a leaked
//!   `Box<Box<dyn Generator>>`
//! - optionally `schemagen_register_args(cx, add)`, calling `add` once per
//!   command-line parameter the plugin wants
//!
//! [`export_generator!`](crate::export_generator) writes all of them. The
//! instance crosses the boundary as a Rust trait object, so the plugin must
//! be built with the same compiler and `schemagen` version as the host.

use std::ffi::{CStr, c_char, c_void};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info};

use crate::ast::{ProgramModel, StructDefinition};
use crate::generators::{
    ArgSpec, Artifact, Capability, Generator, GeneratorArgs, GeneratorContext, GeneratorError,
};

pub const ABI_VERSION: u32 = 1;

const ABI_VERSION_SYMBOL: &[u8] = b"schemagen_abi_version\0";
const NAME_SYMBOL: &[u8] = b"schemagen_generator_name\0";
const CREATE_SYMBOL: &[u8] = b"schemagen_generator_create\0";
const REGISTER_ARGS_SYMBOL: &[u8] = b"schemagen_register_args\0";

pub type AbiVersionFn = unsafe extern "C" fn() -> u32;
pub type NameFn = unsafe extern "C" fn() -> *const c_char;
pub type CreateFn = unsafe extern "C" fn() -> *mut c_void;
pub type AddArgFn = unsafe extern "C" fn(cx: *mut c_void, name: *const c_char, help: *const c_char);
pub type RegisterArgsFn = unsafe extern "C" fn(cx: *mut c_void, add: AddArgFn);

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("failed to load plugin {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("plugin {} does not export `{symbol}`: {source}", path.display())]
    MissingSymbol {
        path: PathBuf,
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },
    #[error("plugin {} was built for ABI version {found}, expected {expected}", path.display())]
    AbiMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
    #[error("plugin {} returned an invalid generator name", path.display())]
    InvalidName { path: PathBuf },
    #[error("plugin {} returned no generator instance", path.display())]
    NullInstance { path: PathBuf },
}

fn symbol_name(symbol: &'static [u8]) -> &'static str {
    std::str::from_utf8(&symbol[..symbol.len() - 1]).unwrap_or("?")
}

/// Copies a function pointer out of the library.
///
/// # Safety
/// `T` must match the exported symbol's real signature.
unsafe fn symbol<T: Copy>(library: &Library, name: &'static [u8]) -> Result<T, libloading::Error> {
    unsafe { library.get::<T>(name) }.map(|sym| *sym)
}

/// Takes ownership of an instance produced by `schemagen_generator_create`.
///
/// # Safety
/// `ptr` must be null or come from `Box::into_raw(Box::new(Box<dyn Generator>))`
/// in a library built with the host's compiler, and must not be reused.
pub unsafe fn take_instance(ptr: *mut c_void) -> Option<Box<dyn Generator>> {
    if ptr.is_null() {
        return None;
    }
    let outer = unsafe { Box::from_raw(ptr.cast::<Box<dyn Generator>>()) };
    Some(*outer)
}

/// `AddArgFn` that appends to a `Vec<ArgSpec>` passed as `cx`.
unsafe extern "C" fn collect_arg(cx: *mut c_void, name: *const c_char, help: *const c_char) {
    if cx.is_null() || name.is_null() {
        return;
    }
    let specs = unsafe { &mut *cx.cast::<Vec<ArgSpec>>() };
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    let help = if help.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(help) }.to_string_lossy().into_owned()
    };
    specs.push(ArgSpec { name, help });
}

/// Runs a plugin's argument-registration hook and returns what it declared.
///
/// # Safety
/// `register` must be a `schemagen_register_args` export.
pub unsafe fn collect_args(register: RegisterArgsFn) -> Vec<ArgSpec> {
    let mut specs: Vec<ArgSpec> = Vec::new();
    unsafe { register((&mut specs as *mut Vec<ArgSpec>).cast(), collect_arg) };
    specs
}

/// A generator living in a shared library.
pub struct DynamicGenerator {
    // Dropped before `_library`, whose code it runs.
    inner: Box<dyn Generator>,
    name: String,
    args: Vec<ArgSpec>,
    path: PathBuf,
    _library: Library,
}

impl DynamicGenerator {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let path = path.as_ref().to_path_buf();
        let library = unsafe { Library::new(&path) }.map_err(|source| PluginError::Load {
            path: path.clone(),
            source,
        })?;

        let missing = |name: &'static [u8]| {
            let path = path.clone();
            move |source: libloading::Error| PluginError::MissingSymbol {
                path,
                symbol: symbol_name(name),
                source,
            }
        };

        let abi_version: AbiVersionFn = unsafe { symbol(&library, ABI_VERSION_SYMBOL) }
            .map_err(missing(ABI_VERSION_SYMBOL))?;
        let found = unsafe { abi_version() };
        if found != ABI_VERSION {
            return Err(PluginError::AbiMismatch {
                path: path.clone(),
                expected: ABI_VERSION,
                found,
            });
        }

        let name_fn: NameFn =
            unsafe { symbol(&library, NAME_SYMBOL) }.map_err(missing(NAME_SYMBOL))?;
        let name_ptr = unsafe { name_fn() };
        if name_ptr.is_null() {
            return Err(PluginError::InvalidName { path: path.clone() });
        }
        let name = match unsafe { CStr::from_ptr(name_ptr) }.to_str() {
            Ok(name) if !name.is_empty() => name.to_string(),
            _ => return Err(PluginError::InvalidName { path: path.clone() }),
        };

        let create: CreateFn =
            unsafe { symbol(&library, CREATE_SYMBOL) }.map_err(missing(CREATE_SYMBOL))?;
        let Some(inner) = (unsafe { take_instance(create()) }) else {
            return Err(PluginError::NullInstance { path: path.clone() });
        };

        let register: Option<RegisterArgsFn> =
            unsafe { symbol(&library, REGISTER_ARGS_SYMBOL) }.ok();
        let args = match register {
            Some(register) => unsafe { collect_args(register) },
            None => inner.register_args(),
        };

        info!(plugin = %name, path = %path.display(), args = args.len(), "loaded plugin");
        Ok(Self {
            inner,
            name,
            args,
            path,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Loads every plugin in order; the first failure aborts.
pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<DynamicGenerator>, PluginError> {
    paths
        .iter()
        .map(|p| {
            debug!(path = %p.as_ref().display(), "loading plugin");
            DynamicGenerator::load(p)
        })
        .collect()
}

impl Generator for DynamicGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Option<StructDefinition> {
        self.inner.capability()
    }

    fn supports_interfaces(&self) -> bool {
        self.inner.supports_interfaces()
    }

    fn register_args(&self) -> Vec<ArgSpec> {
        self.args.clone()
    }

    fn configure(&mut self, args: &GeneratorArgs) -> Result<(), GeneratorError> {
        self.inner.configure(args)
    }

    fn add_capability_content(
        &self,
        capability: &Capability,
        target: &mut StructDefinition,
    ) -> Result<(), GeneratorError> {
        self.inner.add_capability_content(capability, target)
    }

    fn inject_struct(
        &self,
        cx: &GeneratorContext<'_>,
        model: &mut ProgramModel,
        struct_name: &str,
    ) -> Result<(), GeneratorError> {
        self.inner.inject_struct(cx, model, struct_name)
    }

    fn emit_capability(
        &self,
        cx: &GeneratorContext<'_>,
        capability: &Capability,
    ) -> Result<Option<Artifact>, GeneratorError> {
        self.inner.emit_capability(cx, capability)
    }

    fn emit(
        &self,
        cx: &GeneratorContext<'_>,
        model: &ProgramModel,
    ) -> Result<Vec<Artifact>, GeneratorError> {
        self.inner.emit(cx, model)
    }
}

/// Exports a generator from a `cdylib` crate.
///
/// ```ignore
/// schemagen::export_generator!("graphql", GraphqlGenerator::default(),
///     args = [("graphql-endpoint", "URL the generated client talks to")]);
/// ```
#[macro_export]
macro_rules! export_generator {
    ($name:literal, $create:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn schemagen_abi_version() -> u32 {
            $crate::plugin::ABI_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn schemagen_generator_name() -> *const ::std::ffi::c_char {
            concat!($name, "\0").as_ptr().cast()
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn schemagen_generator_create() -> *mut ::std::ffi::c_void {
            let generator: ::std::boxed::Box<dyn $crate::generators::Generator> =
                ::std::boxed::Box::new($create);
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(generator)).cast()
        }
    };
    ($name:literal, $create:expr, args = [$(($arg:literal, $help:literal)),* $(,)?]) => {
        $crate::export_generator!($name, $create);

        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn schemagen_register_args(
            cx: *mut ::std::ffi::c_void,
            add: $crate::plugin::AddArgFn,
        ) {
            $(
                unsafe {
                    add(
                        cx,
                        concat!($arg, "\0").as_ptr().cast(),
                        concat!($help, "\0").as_ptr().cast(),
                    )
                };
            )*
        }
    };
}
