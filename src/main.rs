// ============================================================================
// main.rs — cellflow
// Entry point. Initializes logging, parses arguments, and starts either the
// windowed event loop or a headless run.
// ============================================================================

mod app;
mod frame;
mod headless;
mod pipeline;
mod scheduler;
mod state;

use app::{App, AppConfig};
use headless::HeadlessConfig;
use winit::event_loop::EventLoop;

const USAGE: &str = "usage: cellflow [--headless] [--frames N] [--out DIR]";

fn main() {
    env_logger::init();

    let mut headless = false;
    let mut headless_config = HeadlessConfig::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--headless" => headless = true,
            "--frames" => match args.next().and_then(|v| v.parse().ok()) {
                Some(frames) => headless_config.frames = frames,
                None => {
                    eprintln!("--frames expects a number\n{USAGE}");
                    std::process::exit(2);
                }
            },
            "--out" => match args.next() {
                Some(dir) => headless_config.out_dir = Some(dir),
                None => {
                    eprintln!("--out expects a directory\n{USAGE}");
                    std::process::exit(2);
                }
            },
            "--help" | "-h" => {
                println!("{USAGE}");
                return;
            }
            other => {
                eprintln!("unknown argument: {other}\n{USAGE}");
                std::process::exit(2);
            }
        }
    }

    if headless {
        if let Err(err) = headless::run_headless(&headless_config) {
            log::error!("headless run failed: {err}");
            std::process::exit(1);
        }
        return;
    }

    let event_loop = EventLoop::new().unwrap();
    event_loop.set_control_flow(winit::event_loop::ControlFlow::Wait);

    let mut app = App::new(AppConfig::default());
    event_loop.run_app(&mut app).unwrap();
}
