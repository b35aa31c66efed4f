use anyhow::Context;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

use novade_video_texture::config::{PlayerConfig, SourceConfig, DEFAULT_CONFIG_FILE};
use novade_video_texture::logging::{init_logging, init_minimal_logging};
use novade_video_texture::pipeline::ShaderSources;
use novade_video_texture::presentation::PresentationLoop;
use novade_video_texture::recorder::FrameRecorder;
use novade_video_texture::renderer::{staging_policy, VulkanPresenter};
use novade_video_texture::source::{CaptureSource, FrameSource, StaticImageSource, V4l2Device};
use novade_video_texture::surface::{PresentationSurface, WinitSurface};
use novade_video_texture::{ContextOptions, GraphicsContext};

fn main() -> ExitCode {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let config = match PlayerConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_minimal_logging();
            error!("Failed to load configuration from {:?}: {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        init_minimal_logging();
        warn!("Falling back to default logging: {}", e);
    }

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: &PlayerConfig) -> anyhow::Result<()> {
    match &config.source {
        SourceConfig::Capture(capture) => {
            let device = V4l2Device::open(capture)
                .with_context(|| format!("opening capture device {:?}", capture.device))?;
            let recorder = capture
                .record_path
                .as_deref()
                .map(|path| {
                    FrameRecorder::create(path).with_context(|| format!("creating recording {:?}", path))
                })
                .transpose()?;
            present(CaptureSource::new(device), recorder, config)
        }
        SourceConfig::Image(image) => {
            let source =
                StaticImageSource::open(&image.path).with_context(|| format!("loading image {:?}", image.path))?;
            present(source, None, config)
        }
    }
}

fn present<S: FrameSource>(
    source: S,
    recorder: Option<FrameRecorder>,
    config: &PlayerConfig,
) -> anyhow::Result<()> {
    // Declared first so the window outlives the surface created for it.
    let mut window = WinitSurface::new(&config.window).context("creating window")?;

    let options = ContextOptions {
        application_name: config.window.title.clone(),
        enable_validation: config.renderer.enable_validation,
    };
    let context = GraphicsContext::new(&options, Some(&window as &dyn PresentationSurface))
        .context("initializing Vulkan")?;

    let shaders = ShaderSources {
        vertex: &config.renderer.vertex_shader,
        fragment: &config.renderer.fragment_shader,
        entry_point: &config.renderer.entry_point,
    };
    let staging = staging_policy(source.is_live());
    let presenter = VulkanPresenter::new(context, source.format(), staging, window.extent(), shaders)
        .context("creating presentation resources")?;

    let mut presentation = PresentationLoop::new(source, presenter);
    if let Some(recorder) = recorder {
        presentation = presentation.with_recorder(recorder);
    }
    let summary = presentation.run(&mut window).context("presenting frames")?;
    info!(
        "Exiting after {} frames ({} uploads, {} short frames skipped)",
        summary.frames_presented, summary.frames_uploaded, summary.frames_skipped
    );
    Ok(())
}
