//! Hot-reload supervisor for the render module.
//!
//! The supervisor owns the one active module generation. Entry points are
//! only reachable through it, and a generation is fully unloaded (entry points
//! dropped, library closed) before the next one is opened.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use log::{debug, info, warn, LevelFilter, Log};
use thiserror::Error;

use crate::input::Movement;
use crate::render::GpuDevice;
use crate::state::RendererState;

pub type InitializeFn = fn(&mut RendererState, &mut dyn GpuDevice) -> bool;
pub type UpdateFn = fn(&mut RendererState, Movement, f32, f32);
pub type DrawFn = fn(&mut RendererState, &mut dyn GpuDevice);
pub type AttachLoggerFn = fn(&'static dyn Log, LevelFilter);

const INITIALIZE_SYMBOL: &str = "initialize";
const UPDATE_SYMBOL: &str = "update";
const DRAW_SYMBOL: &str = "draw";
const ATTACH_LOGGER_SYMBOL: &str = "attach_logger";

/// Functions resolved from one module generation.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
    pub initialize: InitializeFn,
    pub update: UpdateFn,
    pub draw: DrawFn,
    pub attach_logger: Option<AttachLoggerFn>,
}

impl EntryPoints {
    /// Entry points linked into the current binary.
    pub fn builtin() -> Self {
        Self {
            initialize: crate::module::initialize,
            update: crate::module::update,
            draw: crate::module::draw,
            attach_logger: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to stage {} as {}: {source}", path.display(), shadow.display())]
    Stage {
        path: PathBuf,
        shadow: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("{} does not export `{symbol}`", path.display())]
    MissingSymbol { path: PathBuf, symbol: &'static str },
    #[error("module not ready: {0}")]
    NotReady(String),
}

/// A freshly opened generation, not yet initialized.
pub struct LoadedModule<L> {
    pub entry_points: EntryPoints,
    pub library: L,
}

/// Source of module generations.
///
/// Dropping the returned library must make every entry point it produced
/// unreachable.
pub trait ModuleLoader {
    type Library;

    fn load(&mut self, generation: u64) -> Result<LoadedModule<Self::Library>, LoadError>;

    /// Artifact whose modification time triggers a reload, if any.
    fn artifact(&self) -> Option<&Path> {
        None
    }
}

/// Loads the entry points linked into the host binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticLoader;

impl ModuleLoader for StaticLoader {
    type Library = ();

    fn load(&mut self, _generation: u64) -> Result<LoadedModule<()>, LoadError> {
        Ok(LoadedModule {
            entry_points: EntryPoints::builtin(),
            library: (),
        })
    }
}

/// Opens the module artifact with `libloading`.
///
/// Each generation is opened from its own copy in `shadow_dir`, so the build
/// can replace the artifact while a generation is still mapped.
#[derive(Debug, Clone)]
pub struct DylibLoader {
    artifact: PathBuf,
    shadow_dir: PathBuf,
}

/// Open library plus the shadow copy it was loaded from.
#[derive(Debug)]
pub struct DylibHandle {
    library: Option<libloading::Library>,
    shadow: PathBuf,
}

impl Drop for DylibHandle {
    fn drop(&mut self) {
        if let Some(library) = self.library.take() {
            if let Err(err) = library.close() {
                warn!("failed to close {}: {err}", self.shadow.display());
            }
        }
        if let Err(err) = fs::remove_file(&self.shadow) {
            debug!("could not remove {}: {err}", self.shadow.display());
        }
    }
}

impl DylibLoader {
    pub fn new(artifact: impl Into<PathBuf>, shadow_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact: artifact.into(),
            shadow_dir: shadow_dir.into(),
        }
    }

    pub fn shadow_path(&self, generation: u64) -> PathBuf {
        let stem = self
            .artifact
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string());
        let name = match self.artifact.extension() {
            Some(ext) => format!("{stem}.gen{generation}.{}", ext.to_string_lossy()),
            None => format!("{stem}.gen{generation}"),
        };
        self.shadow_dir.join(name)
    }

    fn stage(&self, generation: u64) -> Result<PathBuf, LoadError> {
        let shadow = self.shadow_path(generation);
        let stage_error = |source| LoadError::Stage {
            path: self.artifact.clone(),
            shadow: shadow.clone(),
            source,
        };
        fs::create_dir_all(&self.shadow_dir).map_err(stage_error)?;
        let copied = fs::copy(&self.artifact, &shadow).map_err(stage_error)?;
        if copied == 0 {
            let _ = fs::remove_file(&shadow);
            return Err(LoadError::NotReady(format!(
                "{} is empty",
                self.artifact.display()
            )));
        }
        Ok(shadow)
    }
}

fn resolve<T: Copy>(
    library: &libloading::Library,
    path: &Path,
    symbol: &'static str,
) -> Result<T, LoadError> {
    let name = format!("{symbol}\0");
    // SAFETY: the symbol is declared in `crate::module` with exactly the
    // signature `T`, and the pointer is only used while `library` is open.
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|symbol| *symbol)
        .map_err(|_| LoadError::MissingSymbol {
            path: path.to_path_buf(),
            symbol,
        })
}

impl ModuleLoader for DylibLoader {
    type Library = DylibHandle;

    fn load(&mut self, generation: u64) -> Result<LoadedModule<DylibHandle>, LoadError> {
        let shadow = self.stage(generation)?;
        // SAFETY: loading runs the library's initializers; the artifact is
        // this crate's own cdylib.
        let library = match unsafe { libloading::Library::new(&shadow) } {
            Ok(library) => library,
            Err(source) => {
                let _ = fs::remove_file(&shadow);
                return Err(LoadError::Open {
                    path: self.artifact.clone(),
                    source,
                });
            }
        };
        let handle = DylibHandle {
            library: Some(library),
            shadow,
        };
        let Some(library) = handle.library.as_ref() else {
            return Err(LoadError::NotReady("library closed during load".into()));
        };

        let entry_points = EntryPoints {
            initialize: resolve(library, &self.artifact, INITIALIZE_SYMBOL)?,
            update: resolve(library, &self.artifact, UPDATE_SYMBOL)?,
            draw: resolve(library, &self.artifact, DRAW_SYMBOL)?,
            attach_logger: resolve(library, &self.artifact, ATTACH_LOGGER_SYMBOL).ok(),
        };
        Ok(LoadedModule {
            entry_points,
            library: handle,
        })
    }

    fn artifact(&self) -> Option<&Path> {
        Some(&self.artifact)
    }
}

/// Polls an artifact's modification time.
#[derive(Debug, Clone)]
pub struct ArtifactWatcher {
    path: PathBuf,
    acknowledged: Option<SystemTime>,
}

impl ArtifactWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            acknowledged: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current modification time, or `None` while the artifact is unreadable.
    pub fn stamp(&self) -> Option<SystemTime> {
        fs::metadata(&self.path)
            .and_then(|metadata| metadata.modified())
            .ok()
    }

    /// Returns the new stamp if the artifact changed since the last
    /// acknowledgement. An unreadable artifact never counts as a change.
    pub fn changed(&self) -> Option<SystemTime> {
        let stamp = self.stamp()?;
        (self.acknowledged != Some(stamp)).then_some(stamp)
    }

    pub fn acknowledge(&mut self, stamp: Option<SystemTime>) {
        if stamp.is_some() {
            self.acknowledged = stamp;
        }
    }
}

/// Lifecycle of the active generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulePhase {
    Loaded,
    Initialized,
    InitializeFailed,
}

struct ActiveModule<L> {
    generation: u64,
    phase: ModulePhase,
    entry_points: EntryPoints,
    library: L,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadReport {
    pub generation: u64,
    pub attempts: u32,
    pub phase: ModulePhase,
}

/// Owns the active module generation and routes every call into it.
pub struct Supervisor<L: ModuleLoader> {
    loader: L,
    watcher: Option<ArtifactWatcher>,
    active: Option<ActiveModule<L::Library>>,
    generations: u64,
    retry_interval: Duration,
    logger: Option<(&'static dyn Log, LevelFilter)>,
}

impl<L: ModuleLoader> Supervisor<L> {
    pub fn new(loader: L, retry_interval: Duration) -> Self {
        let watcher = loader.artifact().map(ArtifactWatcher::new);
        Self {
            loader,
            watcher,
            active: None,
            generations: 0,
            retry_interval,
            logger: None,
        }
    }

    /// Logger handed to modules that export `attach_logger`.
    pub fn with_logger(mut self, logger: &'static dyn Log, level: LevelFilter) -> Self {
        self.logger = Some((logger, level));
        self
    }

    pub fn generation(&self) -> Option<u64> {
        self.active.as_ref().map(|active| active.generation)
    }

    pub fn phase(&self) -> Option<ModulePhase> {
        self.active.as_ref().map(|active| active.phase)
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Reloads if the artifact changed since the last successful load.
    pub fn poll(
        &mut self,
        state: &mut RendererState,
        gpu: &mut dyn GpuDevice,
    ) -> Option<ReloadReport> {
        let watcher = self.watcher.as_ref()?;
        let stamp = watcher.changed()?;
        debug!("{} changed ({stamp:?})", watcher.path().display());
        Some(self.reload_now(state, gpu))
    }

    /// Swaps in a new generation unconditionally.
    ///
    /// Blocks until the loader succeeds.
    pub fn reload_now(
        &mut self,
        state: &mut RendererState,
        gpu: &mut dyn GpuDevice,
    ) -> ReloadReport {
        self.unload();

        self.generations += 1;
        let generation = self.generations;
        let mut attempts = 0u32;
        let (loaded, stamp) = loop {
            attempts = attempts.saturating_add(1);
            let stamp = self.watcher.as_ref().and_then(ArtifactWatcher::stamp);
            match self.loader.load(generation) {
                Ok(loaded) => break (loaded, stamp),
                Err(err) if attempts == 1 => warn!("module load failed, retrying: {err}"),
                Err(err) => debug!("module load attempt {attempts} failed: {err}"),
            }
            thread::sleep(self.retry_interval);
        };

        let LoadedModule {
            entry_points,
            library,
        } = loaded;
        self.active = Some(ActiveModule {
            generation,
            phase: ModulePhase::Loaded,
            entry_points,
            library,
        });

        if let (Some(attach), Some((logger, level))) = (entry_points.attach_logger, self.logger) {
            attach(logger, level);
        }

        let phase = if (entry_points.initialize)(state, gpu) {
            ModulePhase::Initialized
        } else {
            ModulePhase::InitializeFailed
        };
        if let Some(active) = self.active.as_mut() {
            active.phase = phase;
        }
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.acknowledge(stamp);
        }

        match phase {
            ModulePhase::InitializeFailed if state.resources.is_some() => warn!(
                "generation {generation} failed to initialize; keeping the last good resources"
            ),
            ModulePhase::InitializeFailed => warn!("generation {generation} failed to initialize"),
            _ => info!("generation {generation} loaded after {attempts} attempt(s)"),
        }

        ReloadReport {
            generation,
            attempts,
            phase,
        }
    }

    /// Drops the active generation's entry points, then closes its library.
    pub fn unload(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let ActiveModule { generation, library, .. } = active;
        drop(library);
        debug!("generation {generation} unloaded");
    }

    fn callable(&self, state: &RendererState) -> Option<EntryPoints> {
        let active = self.active.as_ref()?;
        match active.phase {
            ModulePhase::Initialized => Some(active.entry_points),
            ModulePhase::InitializeFailed if state.resources.is_some() => {
                Some(active.entry_points)
            }
            _ => None,
        }
    }

    /// Returns whether the module was called.
    pub fn update(&self, state: &mut RendererState, movement: Movement, dx: f32, dy: f32) -> bool {
        match self.callable(state) {
            Some(entry_points) => {
                (entry_points.update)(state, movement, dx, dy);
                true
            }
            None => false,
        }
    }

    /// Returns whether the module was called.
    pub fn draw(&self, state: &mut RendererState, gpu: &mut dyn GpuDevice) -> bool {
        match self.callable(state) {
            Some(entry_points) => {
                (entry_points.draw)(state, gpu);
                true
            }
            None => false,
        }
    }
}

impl<L: ModuleLoader> Drop for Supervisor<L> {
    fn drop(&mut self) {
        self.unload();
    }
}
