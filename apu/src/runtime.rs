//! Process-wide runtime owning the bound hooks provider.
//!
//! Exactly one provider is bound per process, either explicitly through [`bind_hooks`]
//! or [`initialize`] before first use, or lazily by the first accelerator call.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::backend::{initialize_backend, ApuHooks, BackendKind, Config, NoAccelerator};
use crate::error::ApuError;
use crate::fork::{is_in_bad_fork, track_bad_fork};
use crate::DebugMask;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

pub(crate) struct Runtime {
    hooks: Box<dyn ApuHooks>,
    // Directory where backend_config.json was found
    config_dir: Option<PathBuf>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("hooks", &self.hooks.name())
            .field("config_dir", &self.config_dir)
            .finish()
    }
}

impl Runtime {
    fn new(hooks: Box<dyn ApuHooks>, config_dir: Option<PathBuf>) -> Runtime {
        Runtime { hooks, config_dir }
    }

    // Initializes backend from env vars and config file.
    // Never fails, if nothing else works, NoAccelerator gets bound.
    fn from_environment() -> Runtime {
        let debug = crate::debug();
        // Driver contexts are invalid in forked children, so do not even try to create them
        if is_in_bad_fork() {
            if debug.backend() {
                println!("Initializing APU in forked child, binding no accelerator.");
            }
            return Runtime::new(Box::new(NoAccelerator), None);
        }
        let requested = requested_backend(debug);
        let (config, config_dir) = read_config(debug);
        let hooks = initialize_backend(&config, requested, debug);
        Runtime::new(hooks, config_dir)
    }
}

fn requested_backend(debug: DebugMask) -> Option<BackendKind> {
    let name = std::env::var("APU_BACKEND").ok()?;
    let kind = BackendKind::parse(&name);
    if kind.is_none() && debug.backend() {
        println!("Unknown APU_BACKEND {name:?}, selecting backend automatically.");
    }
    kind
}

// Search through config directories and find apu/backend_config.json
// If not found or failed to parse, use defaults.
fn read_config(debug: DebugMask) -> (Config, Option<PathBuf>) {
    let mut config_dir = None;
    let config = xdg::BaseDirectories::new()
        .map_err(|e| {
            if debug.backend() {
                println!("Failed to find config directories for backend_config.json, {e}");
            }
        })
        .ok()
        .map(|bd| {
            let mut dirs = bd.get_config_dirs();
            dirs.push(bd.get_config_home());
            dirs
        })
        .and_then(|paths| {
            // First file found wins, even if it fails to parse
            paths
                .into_iter()
                .find_map(|mut path| {
                    path.push("apu/backend_config.json");
                    let config = match Config::from_file(&path) {
                        Ok(config) => Some(config),
                        Err(ApuError::IOError(_)) => return None,
                        Err(e) => {
                            if debug.backend() {
                                println!("Failed to parse backend_config.json, {e}");
                            }
                            None
                        }
                    };
                    let _ = path.pop();
                    config_dir = Some(path);
                    Some(config)
                })
                .flatten()
        })
        .inspect(|_| {
            if debug.backend() {
                println!("Backend config successfully read and parsed.");
            }
        })
        .unwrap_or_else(|| {
            if debug.backend() {
                println!("Failed to get backend config, using defaults.");
            }
            Config::default()
        });
    (config, config_dir)
}

fn runtime() -> &'static Runtime {
    // Registered before any provider exists, so the first fork after accelerator use is caught
    track_bad_fork();
    RUNTIME.get_or_init(Runtime::from_environment)
}

/// Bound hooks provider, initializing the runtime if needed
pub(crate) fn hooks() -> &'static dyn ApuHooks {
    runtime().hooks.as_ref()
}

/// Bound hooks provider, without initializing the runtime
pub(crate) fn bound_hooks() -> Option<&'static dyn ApuHooks> {
    RUNTIME.get().map(|rt| rt.hooks.as_ref())
}

/// Binds a hooks provider for this process.
///
/// # Errors
/// Returns [`ApuError::AlreadyInitialized`] if a provider is already bound,
/// either explicitly or by an earlier accelerator call.
pub fn bind_hooks(hooks: Box<dyn ApuHooks>) -> Result<(), ApuError> {
    track_bad_fork();
    let name = hooks.name();
    RUNTIME.set(Runtime::new(hooks, None)).map_err(|_| ApuError::AlreadyInitialized)?;
    if crate::debug().backend() {
        println!("Bound {name} APU backend");
    }
    Ok(())
}

/// Initializes the runtime from the given config instead of backend_config.json.
/// Env var `APU_BACKEND` is still honored.
///
/// # Errors
/// Returns [`ApuError::AlreadyInitialized`] if a provider is already bound.
pub fn initialize(config: &Config) -> Result<(), ApuError> {
    track_bad_fork();
    if RUNTIME.get().is_some() {
        return Err(ApuError::AlreadyInitialized);
    }
    if is_in_bad_fork() {
        return Err(ApuError::BadFork);
    }
    let debug = crate::debug();
    let hooks = initialize_backend(config, requested_backend(debug), debug);
    RUNTIME.set(Runtime::new(hooks, None)).map_err(|_| ApuError::AlreadyInitialized)
}

/// Name of the bound hooks provider, for diagnostics
#[must_use]
pub fn backend_name() -> &'static str {
    hooks().name()
}

/// Directory where backend_config.json was found, if any
#[must_use]
pub fn config_dir() -> Option<&'static Path> {
    runtime().config_dir.as_deref()
}
