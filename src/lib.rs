pub mod app;
pub mod backend;
pub mod camera;
pub mod error;
pub mod renderer;
pub mod settings;
pub mod time;

pub use error::{RenderError, Result};
pub use renderer::SortedRenderer;
pub use settings::PipelineSettings;

use app::App;
use winit::event_loop::EventLoop;

pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

pub fn run() -> std::result::Result<(), winit::error::EventLoopError> {
    init_logging();

    log::info!("Starting robo-render demo");

    let settings = PipelineSettings::load();
    let event_loop = EventLoop::new()?;
    let mut app = App::new(settings);

    let result = event_loop.run_app(&mut app);

    if let Err(ref err) = result {
        log::error!("Application error: {}", err);
    }

    log::info!("Application shutdown complete");

    result
}
