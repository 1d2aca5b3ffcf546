//! Shared library loading and exported-symbol lookup
//!
//! Thin wrapper around dlopen/LoadLibrary. Symbols resolve to [`Pointer`]s
//! that can be turned into callable [`Function`]s.
//!
//! An identifier containing spaces is a byte signature instead of a symbol
//! name, e.g. `"55 8B EC 83 E4 F8"`, found by scanning the library's code.

use super::abi::Convention;
use super::call::Function;
use crate::errors::{Error, Result};
use crate::memory::Pointer;
use core::ffi::c_void;
use core::ptr::NonNull;
use std::ffi::CString;
use tracing::debug;

/// Handle to a loaded library; unloaded on drop
pub struct Library {
    name: String,
    handle: NonNull<c_void>,
}

impl Library {
    /// Load a library by name or path
    ///
    /// Bare names go through the platform search path.
    pub fn load(name: &str) -> Result<Self> {
        let cname = CString::new(name)
            .map_err(|_| Error::Library(format!("invalid library name {:?}", name)))?;
        let handle = Self::open(&cname)
            .map_err(|msg| Error::Library(format!("failed to load {}: {}", name, msg)))?;
        debug!(target: "ffi", library = name, "loaded");
        crate::infrastructure::metrics::interop().record_library();
        Ok(Self {
            name: name.to_string(),
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(unix)]
    fn open(name: &CString) -> std::result::Result<NonNull<c_void>, String> {
        unsafe {
            let handle = libc::dlopen(name.as_ptr(), libc::RTLD_NOW);
            NonNull::new(handle).ok_or_else(|| {
                let err = libc::dlerror();
                if err.is_null() {
                    "unknown error".to_string()
                } else {
                    std::ffi::CStr::from_ptr(err).to_string_lossy().into_owned()
                }
            })
        }
    }

    #[cfg(windows)]
    fn open(name: &CString) -> std::result::Result<NonNull<c_void>, String> {
        use winapi::um::errhandlingapi::GetLastError;
        use winapi::um::libloaderapi::LoadLibraryA;

        unsafe {
            let handle = LoadLibraryA(name.as_ptr()) as *mut c_void;
            NonNull::new(handle).ok_or_else(|| format!("error code {}", GetLastError()))
        }
    }

    /// Address of an exported symbol
    pub fn symbol(&self, symbol: &str) -> Result<Pointer> {
        let cname = CString::new(symbol)
            .map_err(|_| Error::Library(format!("invalid symbol name {:?}", symbol)))?;
        let address = self.lookup(&cname);
        if address.is_null() {
            return Err(Error::Library(format!(
                "symbol {} not found in {}",
                symbol, self.name
            )));
        }
        // SAFETY: the loader returned an exported address of this library
        Ok(unsafe { Pointer::from_raw(address) })
    }

    /// Symbol address, or the match of a spaced hex byte signature
    pub fn resolve(&self, identifier: &str) -> Result<Pointer> {
        match parse_signature(identifier)? {
            Some(pattern) => self.find_signature(&pattern),
            None => self.symbol(identifier),
        }
    }

    /// Function found by [`Library::resolve`]
    ///
    /// # Safety
    /// As [`Function::new`] for the resolved address.
    pub unsafe fn function(&self, identifier: &str, convention: Convention, signature: &str) -> Result<Function> {
        Function::parse(self.resolve(identifier)?, convention, signature)
    }

    /// Address of the first occurrence of `pattern` in the library's code
    pub fn find_signature(&self, pattern: &[u8]) -> Result<Pointer> {
        if pattern.is_empty() {
            return Err(Error::Library("empty signature".to_string()));
        }

        for (start, len) in self.code_regions()? {
            // SAFETY: mapped code of a library that stays loaded while borrowed
            let image = unsafe { std::slice::from_raw_parts(start as *const u8, len) };
            if let Some(offset) = image.windows(pattern.len()).position(|window| window == pattern) {
                let address = start + offset;
                debug!(target: "ffi", library = %self.name, address, "signature found");
                // SAFETY: inside the library's mapped code
                return Ok(unsafe { Pointer::from_address(address) });
            }
        }

        Err(Error::Library(format!(
            "signature {} not found in {}",
            format_signature(pattern),
            self.name
        )))
    }

    /// Executable segments as (start, length)
    #[cfg(target_os = "linux")]
    fn code_regions(&self) -> Result<Vec<(usize, usize)>> {
        use std::os::raw::c_int;

        struct Image {
            name: CString,
            regions: Vec<(usize, usize)>,
        }

        unsafe extern "C" fn collect(info: *mut libc::dl_phdr_info, _size: libc::size_t, data: *mut c_void) -> c_int {
            let images = &mut *(data as *mut Vec<Image>);
            let info = &*info;
            if info.dlpi_name.is_null() || *info.dlpi_name == 0 {
                return 0;
            }
            let headers = std::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize);
            let regions = headers
                .iter()
                .filter(|header| header.p_type == libc::PT_LOAD && header.p_flags & libc::PF_X != 0)
                .map(|header| (info.dlpi_addr as usize + header.p_vaddr as usize, header.p_memsz as usize))
                .collect();
            images.push(Image {
                name: std::ffi::CStr::from_ptr(info.dlpi_name).to_owned(),
                regions,
            });
            0
        }

        let mut images: Vec<Image> = Vec::new();
        unsafe { libc::dl_iterate_phdr(Some(collect), &mut images as *mut Vec<Image> as *mut c_void) };

        // The loader hands out one handle per object, so the image whose
        // name reopens to our handle is ours
        for image in images {
            let handle = unsafe { libc::dlopen(image.name.as_ptr(), libc::RTLD_LAZY | libc::RTLD_NOLOAD) };
            if handle.is_null() {
                continue;
            }
            unsafe { libc::dlclose(handle) };
            if handle == self.handle.as_ptr() {
                return Ok(image.regions);
            }
        }
        Err(Error::Library(format!("no mapped image found for {}", self.name)))
    }

    /// Whole module image as one region
    #[cfg(windows)]
    fn code_regions(&self) -> Result<Vec<(usize, usize)>> {
        use winapi::um::processthreadsapi::GetCurrentProcess;
        use winapi::um::psapi::{GetModuleInformation, MODULEINFO};

        let mut info: MODULEINFO = unsafe { std::mem::zeroed() };
        let ok = unsafe {
            GetModuleInformation(
                GetCurrentProcess(),
                self.handle.as_ptr() as _,
                &mut info,
                std::mem::size_of::<MODULEINFO>() as u32,
            )
        };
        if ok == 0 {
            return Err(Error::Library(format!("no module information for {}", self.name)));
        }
        Ok(vec![(info.lpBaseOfDll as usize, info.SizeOfImage as usize)])
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    fn code_regions(&self) -> Result<Vec<(usize, usize)>> {
        Err(Error::Library(format!(
            "signature scanning is not supported on {}",
            std::env::consts::OS
        )))
    }

    #[cfg(unix)]
    fn lookup(&self, name: &CString) -> *mut c_void {
        unsafe { libc::dlsym(self.handle.as_ptr(), name.as_ptr()) }
    }

    #[cfg(windows)]
    fn lookup(&self, name: &CString) -> *mut c_void {
        use winapi::um::libloaderapi::GetProcAddress;

        unsafe { GetProcAddress(self.handle.as_ptr() as _, name.as_ptr()) as *mut c_void }
    }
}

impl Drop for Library {
    #[cfg(unix)]
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }

    #[cfg(windows)]
    fn drop(&mut self) {
        unsafe {
            winapi::um::libloaderapi::FreeLibrary(self.handle.as_ptr() as _);
        }
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish()
    }
}

unsafe impl Send for Library {}
unsafe impl Sync for Library {}

/// Bytes of a spaced hex signature; `None` for plain symbol names
pub fn parse_signature(identifier: &str) -> Result<Option<Vec<u8>>> {
    if !identifier.contains(' ') {
        return Ok(None);
    }

    let digits: Vec<u8> = identifier.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    let invalid = || Error::Library(format!("invalid signature {:?}", identifier));
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(invalid());
    }

    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|text| u8::from_str_radix(text, 16).ok())
                .ok_or_else(invalid)
        })
        .collect::<Result<Vec<u8>>>()
        .map(Some)
}

fn format_signature(pattern: &[u8]) -> String {
    pattern
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Name of the C runtime library on this platform
pub fn libc_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "libSystem.B.dylib"
    } else if cfg!(windows) {
        "msvcrt.dll"
    } else {
        "libc.so.6"
    }
}

/// Load a library, trying the platform's file-name conventions for bare names
///
/// `"m"` tries `m`, then `libm.so`/`libm.dylib`/`m.dll`.
pub fn find_binary(name: &str) -> Result<Library> {
    let first = match Library::load(name) {
        Ok(lib) => return Ok(lib),
        Err(err) => err,
    };

    if name.contains('/') || name.contains('\\') {
        return Err(first);
    }

    let candidates = if cfg!(target_os = "macos") {
        vec![format!("lib{}.dylib", name)]
    } else if cfg!(windows) {
        vec![format!("{}.dll", name)]
    } else {
        vec![format!("lib{}.so", name), format!("lib{}.so.6", name)]
    };

    candidates
        .iter()
        .find_map(|candidate| Library::load(candidate).ok())
        .ok_or(first)
}
