use crate::errors::{Error, Result};
use crate::infrastructure::logging::{parse_level, LogConfig, LogFormat, LogOutput};
use crate::interop::{find_binary, Function, Library, DEFAULT_CIF_CACHE_SIZE};
use crate::layout::{FunctionSpec, SymbolResolver, TypeLayout, TypeManager};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, Level};

/// File name looked up by [`Config::discover`]
pub const CONFIG_FILE: &str = "binutils.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub call: CallConfig,

    /// Function manifest, one table per function
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionSpec>,

    #[serde(default)]
    pub types: BTreeMap<String, TypeLayout>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Write daily-rotated files here instead of stderr
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default)]
    pub filter: Option<String>,

    #[serde(default = "default_false")]
    pub span_events: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    /// Prepared call interfaces kept per call context
    #[serde(default = "default_cif_cache_size")]
    pub cif_cache_size: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            directory: None,
            filter: None,
            span_events: false,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            cif_cache_size: DEFAULT_CIF_CACHE_SIZE,
        }
    }
}

fn default_level() -> String { "warn".to_string() }
fn default_false() -> bool { false }
fn default_cif_cache_size() -> usize { DEFAULT_CIF_CACHE_SIZE }

impl LoggingConfig {
    /// Subscriber settings; unknown level names fall back to `warn`
    pub fn to_log_config(&self) -> LogConfig {
        let output = match &self.directory {
            Some(directory) => LogOutput::File {
                directory: directory.clone(),
                prefix: "binutils".to_string(),
            },
            None => LogOutput::Stderr,
        };

        LogConfig {
            level: parse_level(&self.level).unwrap_or(Level::WARN),
            format: self.format,
            output,
            span_events: self.span_events,
            filter: self.filter.clone(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config {}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Nearest `binutils.toml` in the current directory or its parents
    pub fn discover_path() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.is_file() {
                return Some(config_path);
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }

        None
    }

    /// Load the discovered config, or defaults when there is none
    pub fn discover() -> Self {
        Self::discover_path()
            .and_then(|path| match Self::load(&path) {
                Ok(config) => Some(config),
                Err(err) => {
                    tracing::warn!(target: "config", path = %path.display(), %err, "ignoring unreadable config");
                    None
                }
            })
            .unwrap_or_default()
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content).map_err(|e| Error::Config(format!("Failed to write config: {}", e)))
    }

    /// Fold another config's manifest and layouts into this one
    pub fn merge(&mut self, other: Config) {
        self.functions.extend(other.functions);
        self.types.extend(other.types);
    }

    /// Type manager holding every `[types.*]` layout
    pub fn type_manager(&self) -> Result<TypeManager> {
        let manager = TypeManager::new();
        for (name, layout) in &self.types {
            manager.add_type(name, layout.clone(), false)?;
        }
        Ok(manager)
    }

    pub fn pipe(&self) -> Pipe {
        Pipe::new(self.functions.clone())
    }
}

/// Named functions resolved from shared libraries on demand
///
/// Loaded libraries stay open for the lifetime of the pipe.
pub struct Pipe {
    functions: BTreeMap<String, FunctionSpec>,
    libraries: Mutex<HashMap<String, Arc<Library>>>,
}

impl Pipe {
    pub fn new(functions: BTreeMap<String, FunctionSpec>) -> Self {
        Self {
            functions,
            libraries: Mutex::new(HashMap::new()),
        }
    }

    /// Pipe over the `[functions.*]` tables of several files; later files win
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut config = Config::default();
        for path in paths {
            config.merge(Config::load(path.as_ref())?);
        }
        Ok(config.pipe())
    }

    pub fn add_function(&mut self, name: impl Into<String>, spec: FunctionSpec) {
        self.functions.insert(name.into(), spec);
    }

    pub fn spec(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Resolve a manifest entry to a callable function
    pub fn get(&self, name: &str) -> Result<Function> {
        let spec = self.functions.get(name).ok_or_else(|| Error::UnknownMember {
            owner: "Pipe".to_string(),
            name: name.to_string(),
        })?;
        self.resolve(spec)
    }

    fn library(&self, binary: &str) -> Result<Arc<Library>> {
        let mut libraries = self.libraries.lock();
        if let Some(lib) = libraries.get(binary) {
            return Ok(Arc::clone(lib));
        }
        let lib = Arc::new(find_binary(binary)?);
        libraries.insert(binary.to_string(), Arc::clone(&lib));
        Ok(lib)
    }
}

impl SymbolResolver for Pipe {
    /// Symbol names resolve through the loader; identifiers with spaces are
    /// hex byte signatures searched in the library's code
    fn resolve(&self, spec: &FunctionSpec) -> Result<Function> {
        let identifier = spec.symbols.current().ok_or_else(|| {
            Error::Library(format!(
                "no {} symbol given for a function in {}",
                std::env::consts::OS,
                spec.binary
            ))
        })?;
        let library = self.library(&spec.binary)?;
        let pointer = library.resolve(identifier)?;
        debug!(target: "config", binary = %spec.binary, identifier, address = %pointer, "resolved");
        // SAFETY: a manifest entry declares the signature of the code it names
        Ok(unsafe { Function::new(pointer, spec.convention, spec.parameters.clone()) })
    }
}
