use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec2;
use log::{error, info, warn};
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{DeviceEvent, DeviceId, ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode as WinitKey, PhysicalKey};
use winit::window::{CursorGrabMode, Window, WindowId};

use hotray::app::print_final_state;
use hotray::{
    DylibLoader, FramePacer, HeadlessGpu, Host, HostConfig, HostSummary, InputCollector, KeyCode,
    ModuleLoader, Movement, NamedKey, NativeGpu, StaticLoader, Supervisor,
};

#[derive(Parser, Debug)]
#[command(
    name = "hotray",
    about = "Compute-shader raytracer with a hot-reloadable render module"
)]
struct Cli {
    /// JSON host configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Render module artifact to load and watch
    #[arg(long)]
    module: Option<PathBuf>,

    /// Use the render module linked into this binary
    #[arg(long)]
    builtin: bool,

    /// Run without a window on the recording device
    #[arg(long)]
    headless: bool,

    /// Frames to run in headless mode
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// Comma separated movements applied one per headless frame
    #[arg(long, value_delimiter = ',', value_parser = parse_movement)]
    moves: Vec<Movement>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Frame rate cap; 0 runs unpaced
    #[arg(long)]
    fps: Option<u32>,

    /// Print the headless summary as JSON
    #[arg(long)]
    json: bool,
}

fn parse_movement(name: &str) -> Result<Movement, String> {
    Movement::from_name(name).ok_or_else(|| {
        format!("unknown movement `{name}` (expected forward, back, left, right, up, down or none)")
    })
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    if cli.builtin {
        launch(&cli, config, StaticLoader)
    } else {
        let module = config.module_path();
        if !module.exists() {
            warn!(
                "render module {} not found yet; waiting for it to be built",
                module.display()
            );
        }
        info!("watching render module {}", module.display());
        let loader = DylibLoader::new(module, config.shadow_dir());
        launch(&cli, config, loader)
    }
}

fn resolve_config(cli: &Cli) -> Result<HostConfig> {
    let mut config = match &cli.config {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => HostConfig::default(),
    };
    if let Some(module) = &cli.module {
        config.module_path = Some(module.clone());
    }
    if let Some(width) = cli.width {
        config.width = width;
    }
    if let Some(height) = cli.height {
        config.height = height;
    }
    if let Some(fps) = cli.fps {
        config.frame_interval_ms = if fps == 0 { 0 } else { 1000 / u64::from(fps) };
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn launch<L>(cli: &Cli, config: HostConfig, loader: L) -> Result<()>
where
    L: ModuleLoader + Clone,
{
    if cli.headless {
        return run_headless(cli, &config, loader);
    }
    match run_interactive(&config, loader.clone()) {
        Ok(()) => Ok(()),
        Err(err) => {
            if err.downcast_ref::<WindowInitError>().is_some() {
                eprintln!("{err}. Falling back to --headless mode.");
                run_headless(cli, &config, loader)
            } else {
                Err(err)
            }
        }
    }
}

fn supervisor<L: ModuleLoader>(config: &HostConfig, loader: L) -> Supervisor<L> {
    Supervisor::new(loader, config.reload_retry()).with_logger(log::logger(), log::max_level())
}

fn run_headless<L: ModuleLoader>(cli: &Cli, config: &HostConfig, loader: L) -> Result<()> {
    let input = InputCollector::new(config.movement_bindings()?);
    let gpu = HeadlessGpu::new(config.width, config.height);
    let mut host = Host::new(supervisor(config, loader), gpu, input);
    host.start();

    let mut pacer = FramePacer::from_fps(cli.fps.unwrap_or(0));
    for index in 0..cli.frames {
        pacer.wait();
        let movement = usize::try_from(index)
            .ok()
            .and_then(|index| cli.moves.get(index))
            .copied()
            .unwrap_or_default();
        host.input_mut().movement(movement, true);
        host.frame();
        host.input_mut().movement(movement, false);
    }

    report(&host.summary(), cli.json)
}

fn report(summary: &HostSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print_final_state(summary);
    }
    Ok(())
}

fn run_interactive<L: ModuleLoader>(config: &HostConfig, loader: L) -> Result<()> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| WindowInitError::from_panic("event loop", panic))?
        .map_err(|err| WindowInitError::from_error("event loop", err))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = WindowedApp {
        config: config.clone(),
        loader: Some(loader),
        host: None,
        pacer: FramePacer::new(config.frame_interval()),
        error: None,
    };
    event_loop.run_app(&mut app)?;

    if let Some(err) = app.error.take() {
        return Err(err);
    }
    if let Some(host) = &app.host {
        print_final_state(&host.summary());
    }
    Ok(())
}

struct WindowedApp<L: ModuleLoader> {
    config: HostConfig,
    loader: Option<L>,
    host: Option<Host<L, NativeGpu>>,
    pacer: FramePacer,
    error: Option<anyhow::Error>,
}

impl<L: ModuleLoader> WindowedApp<L> {
    fn create_host(&mut self, event_loop: &ActiveEventLoop) -> Result<Host<L, NativeGpu>> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height))
            .with_resizable(false);
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .map_err(|err| WindowInitError::from_error("window", err))?,
        );
        grab_cursor(&window);

        let gpu = block_on(NativeGpu::new(Arc::clone(&window), self.config.vsync))
            .map_err(|err| WindowInitError::from_error("GPU device", err))?;
        let loader = self
            .loader
            .take()
            .context("render module loader already consumed")?;
        let input = InputCollector::new(self.config.movement_bindings()?);
        let mut host = Host::new(supervisor(&self.config, loader), gpu, input);
        host.start();
        Ok(host)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.error = Some(err);
        event_loop.exit();
    }
}

fn grab_cursor(window: &Window) {
    let grabbed = window
        .set_cursor_grab(CursorGrabMode::Locked)
        .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined));
    if let Err(err) = grabbed {
        warn!("cursor grab unavailable: {err}");
    }
    window.set_cursor_visible(false);
}

impl<L: ModuleLoader> ApplicationHandler for WindowedApp<L> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.host.is_some() || self.error.is_some() {
            return;
        }
        match self.create_host(event_loop) {
            Ok(host) => self.host = Some(host),
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(host) = self.host.as_mut() else {
            return;
        };
        if window_id != host.gpu().window_id() {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                host.input_mut().request_quit();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => host.gpu_mut().resize(size),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if let Some(key) = map_keycode(code) {
                    host.input_mut().key(key, state == ElementState::Pressed);
                }
                if host.quit_requested() {
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                let report = host.frame();
                if let Some(reload) = report.reload {
                    info!(
                        "frame {}: generation {} {:?}",
                        report.frame, reload.generation, reload.phase
                    );
                }
                if host.quit_requested() {
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let (DeviceEvent::MouseMotion { delta }, Some(host)) = (event, self.host.as_mut()) {
            host.input_mut()
                .cursor_motion(Vec2::new(delta.0 as f32, delta.1 as f32));
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(host) = &self.host {
            if self.pacer.accept(Instant::now()) {
                host.gpu().window().request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(err) = &self.error {
            error!("{err:#}");
        }
    }
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

fn map_keycode(code: WinitKey) -> Option<KeyCode> {
    Some(match code {
        WinitKey::Space => KeyCode::Named(NamedKey::Space),
        WinitKey::Escape => KeyCode::Named(NamedKey::Escape),
        WinitKey::ArrowLeft => KeyCode::Named(NamedKey::Left),
        WinitKey::ArrowRight => KeyCode::Named(NamedKey::Right),
        WinitKey::ArrowUp => KeyCode::Named(NamedKey::Up),
        WinitKey::ArrowDown => KeyCode::Named(NamedKey::Down),
        WinitKey::ShiftLeft => KeyCode::Named(NamedKey::LeftShift),
        WinitKey::ShiftRight => KeyCode::Named(NamedKey::RightShift),
        WinitKey::ControlLeft => KeyCode::Named(NamedKey::LeftCtrl),
        WinitKey::ControlRight => KeyCode::Named(NamedKey::RightCtrl),
        WinitKey::Digit0 => KeyCode::Character('0'),
        WinitKey::Digit1 => KeyCode::Character('1'),
        WinitKey::Digit2 => KeyCode::Character('2'),
        WinitKey::Digit3 => KeyCode::Character('3'),
        WinitKey::Digit4 => KeyCode::Character('4'),
        WinitKey::Digit5 => KeyCode::Character('5'),
        WinitKey::Digit6 => KeyCode::Character('6'),
        WinitKey::Digit7 => KeyCode::Character('7'),
        WinitKey::Digit8 => KeyCode::Character('8'),
        WinitKey::Digit9 => KeyCode::Character('9'),
        WinitKey::KeyA => KeyCode::Character('A'),
        WinitKey::KeyB => KeyCode::Character('B'),
        WinitKey::KeyC => KeyCode::Character('C'),
        WinitKey::KeyD => KeyCode::Character('D'),
        WinitKey::KeyE => KeyCode::Character('E'),
        WinitKey::KeyF => KeyCode::Character('F'),
        WinitKey::KeyG => KeyCode::Character('G'),
        WinitKey::KeyH => KeyCode::Character('H'),
        WinitKey::KeyI => KeyCode::Character('I'),
        WinitKey::KeyJ => KeyCode::Character('J'),
        WinitKey::KeyK => KeyCode::Character('K'),
        WinitKey::KeyL => KeyCode::Character('L'),
        WinitKey::KeyM => KeyCode::Character('M'),
        WinitKey::KeyN => KeyCode::Character('N'),
        WinitKey::KeyO => KeyCode::Character('O'),
        WinitKey::KeyP => KeyCode::Character('P'),
        WinitKey::KeyQ => KeyCode::Character('Q'),
        WinitKey::KeyR => KeyCode::Character('R'),
        WinitKey::KeyS => KeyCode::Character('S'),
        WinitKey::KeyT => KeyCode::Character('T'),
        WinitKey::KeyU => KeyCode::Character('U'),
        WinitKey::KeyV => KeyCode::Character('V'),
        WinitKey::KeyW => KeyCode::Character('W'),
        WinitKey::KeyX => KeyCode::Character('X'),
        WinitKey::KeyY => KeyCode::Character('Y'),
        WinitKey::KeyZ => KeyCode::Character('Z'),
        WinitKey::F1 => KeyCode::Function(1),
        WinitKey::F2 => KeyCode::Function(2),
        WinitKey::F3 => KeyCode::Function(3),
        WinitKey::F4 => KeyCode::Function(4),
        WinitKey::F5 => KeyCode::Function(5),
        WinitKey::F6 => KeyCode::Function(6),
        WinitKey::F7 => KeyCode::Function(7),
        WinitKey::F8 => KeyCode::Function(8),
        WinitKey::F9 => KeyCode::Function(9),
        WinitKey::F10 => KeyCode::Function(10),
        WinitKey::F11 => KeyCode::Function(11),
        WinitKey::F12 => KeyCode::Function(12),
        _ => return None,
    })
}
