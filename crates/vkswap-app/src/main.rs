// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use glam::Mat4;
use tracing::{error, info};
use vkswap_core::{init_tracing, FormatPolicy, PresentSettings, TracingSink, WindowSettings};
use vkswap_platform::{select_backend, BackendKind, EventMode, Key, WindowBackend, WindowEvent};
use vkswap_render::{FrameOutcome, FrameStats, Presenter, RenderSize, Renderer};
use vkswap_render_vk::{AshDevice, DeviceOptions, FrameBarOverlay, TriangleScene};

mod camera;
mod config;

use camera::{Camera, CameraLink};

/// Event wait per loop iteration for blocking backends.
const FRAME_BUDGET: Duration = Duration::from_millis(16);

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Toplevel,
    SimpleShell,
    DirectDisplay,
}

impl From<BackendArg> for BackendKind {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Toplevel => BackendKind::Toplevel,
            BackendArg::SimpleShell => BackendKind::SimpleShell,
            BackendArg::DirectDisplay => BackendKind::DirectDisplay,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    fullscreen: bool,
    /// Present without waiting for vertical blank
    #[arg(long)]
    no_vsync: bool,
    /// Enable the Khronos validation layer
    #[arg(long)]
    validation: bool,
    /// Physical device index
    #[arg(long)]
    gpu: Option<usize>,
    /// Only try this window backend instead of the fallback chain
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,
    #[arg(long, default_value = "vkswap.toml")]
    config: PathBuf,
}

impl Args {
    /// Flags given on the command line win over the file.
    fn apply(&self, cfg: config::AppCfg) -> (WindowSettings, PresentSettings) {
        let config::AppCfg {
            mut window,
            mut present,
        } = cfg;
        if let Some(w) = self.width {
            window.width = w;
        }
        if let Some(h) = self.height {
            window.height = h;
        }
        window.fullscreen |= self.fullscreen;
        if self.no_vsync {
            present.vsync = false;
        }
        (window, present)
    }
}

fn window_title(base: &str, stats: &FrameStats) -> String {
    format!(
        "{base} | {:.0} fps | {:.2} ms",
        stats.fps, stats.frame_time_ms
    )
}

fn main_loop(
    backend: &mut dyn WindowBackend,
    presenter: &mut Presenter<AshDevice>,
    camera: &RefCell<Camera>,
    bar_visible: &Cell<bool>,
    title: &str,
    mut vsync: bool,
) -> Result<()> {
    let mut last = Instant::now();
    let mut frames: u64 = 0;
    loop {
        for event in backend.next_events(FRAME_BUDGET)? {
            match event {
                WindowEvent::CloseRequested
                | WindowEvent::KeyPressed(Key::Escape)
                | WindowEvent::KeyPressed(Key::Q) => {
                    info!("quit after {frames} frames");
                    return Ok(());
                }
                WindowEvent::Resized { width, height } => {
                    presenter.on_resize(RenderSize { width, height })?;
                }
                WindowEvent::KeyPressed(Key::F) => {
                    let on = !backend.is_fullscreen();
                    info!("fullscreen -> {on}");
                    backend.request_fullscreen(on);
                }
                WindowEvent::KeyPressed(Key::V) => {
                    vsync = !vsync;
                    info!("vsync -> {vsync}");
                    presenter.set_vsync(vsync)?;
                }
                WindowEvent::KeyPressed(Key::O) => {
                    bar_visible.set(!bar_visible.get());
                    info!("frame bar -> {}", bar_visible.get());
                }
                WindowEvent::KeyPressed(Key::Other) => {}
            }
        }

        let now = Instant::now();
        camera.borrow_mut().advance(now - last);
        last = now;

        match presenter.render_frame()? {
            FrameOutcome::Presented | FrameOutcome::Recreated => frames += 1,
            FrameOutcome::Paused | FrameOutcome::NotPrepared
                if backend.event_mode() == EventMode::Polling =>
            {
                // nothing to draw; don't spin
                std::thread::sleep(FRAME_BUDGET);
            }
            _ => {}
        }

        if let Some(stats) = presenter.take_report() {
            backend.update_title(&window_title(title, &stats));
        }
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = config::load_cfg(&args.config);
    let (window, mut present) = args.apply(cfg);

    let chain = BackendKind::chain(args.backend.map(Into::into));
    let mut backend = select_backend(&chain, &window).context("no window backend")?;
    if backend.format_policy() == FormatPolicy::StrictSrgb {
        present.format_policy = FormatPolicy::StrictSrgb;
    }

    let sink = Arc::new(TracingSink::new());
    let device = AshDevice::new(
        backend.as_mut(),
        DeviceOptions {
            validation: args.validation,
            gpu: args.gpu,
        },
        sink.clone(),
    )
    .context("vulkan device")?;
    info!("gpu = {}", device.device_name());

    let mvp = Rc::new(Cell::new(Mat4::IDENTITY));
    let camera = Rc::new(RefCell::new(Camera::new(mvp.clone())));
    let (width, height) = backend.size();
    let vsync = present.vsync;
    let bar_visible = Rc::new(Cell::new(true));
    let mut presenter = Presenter::new(
        device,
        Box::new(TriangleScene::new(mvp)),
        RenderSize { width, height },
        present,
    )
    .with_view(Box::new(CameraLink(camera.clone())))
    .with_overlay(Box::new(FrameBarOverlay::new(60.0, bar_visible.clone())));
    presenter.set_title(window.title.clone());

    let result = presenter
        .prepare()
        .map_err(anyhow::Error::from)
        .and_then(|()| {
            main_loop(
                backend.as_mut(),
                &mut presenter,
                &camera,
                &bar_visible,
                &window.title,
                vsync,
            )
        });

    // the surface belongs to the backend: device goes first
    presenter.shutdown();
    drop(presenter);
    drop(backend);

    let counts = sink.counts();
    info!(
        "validation messages: {} warnings, {} errors",
        counts.warnings, counts.errors
    );
    result
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
