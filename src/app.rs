// ============================================================================
// app.rs — cellflow
// Windowed shell: winit event-loop handler, GPU acquisition and release,
// surface resize, and the per-tick glue between scheduler and passes.
// ============================================================================

use std::sync::Arc;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    window::{Window, WindowAttributes},
};

use crate::frame::{encode_tick, write_field_uniforms};
use crate::pipeline::{create_pipelines, Pipelines, ShaderSet};
use crate::scheduler::{Scheduler, TickDriver, TickToken};
use crate::state::{StatePair, SIM_HEIGHT, SIM_WIDTH};

// ======================== Tick driver ========================

/// Maps the scheduler's refresh primitives onto winit. `schedule_next` is a
/// redraw request; winit cannot revoke one once made, so `cancel` relies on
/// the scheduler's Disposed phase to fence any stale redraw that still fires.
pub struct WindowDriver {
    window: Arc<Window>,
    next_token: TickToken,
}

impl WindowDriver {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            next_token: 0,
        }
    }
}

impl TickDriver for WindowDriver {
    fn schedule_next(&mut self) -> TickToken {
        self.window.request_redraw();
        self.next_token += 1;
        self.next_token
    }

    fn cancel(&mut self, token: TickToken) {
        log::trace!("tick request {} cancelled", token);
    }
}

// ======================== Application ========================

pub struct App {
    state: Option<AppState>,
    config: AppConfig,
}

#[derive(Clone)]
pub struct AppConfig {
    pub window_width: u32,
    pub window_height: u32,
    pub shaders: ShaderSet,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window_width: 800,
            window_height: 600,
            shaders: ShaderSet::default(),
        }
    }
}

struct AppState {
    // GPU
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,

    // Simulation
    pair: StatePair,
    pipelines: Pipelines,
    // The scheduler's driver holds the window handle; dropping this state
    // detaches the surface from the screen.
    scheduler: Scheduler<WindowDriver>,

    released: bool,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            state: None,
            config,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title("cellflow")
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.config.window_width,
                self.config.window_height,
            ));

        // No display container means no activation at all: acquire nothing,
        // start nothing.
        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::warn!("no display container available ({err}); activation skipped");
                return;
            }
        };

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = match instance.create_surface(window.clone()) {
            Ok(surface) => surface,
            Err(err) => {
                log::error!("failed to create surface: {err}; activation skipped");
                return;
            }
        };

        let (device, queue, surface_config) =
            match pollster::block_on(init_gpu(&instance, &surface, &window)) {
                Ok(gpu) => gpu,
                Err(err) => {
                    log::error!("GPU initialization failed: {err}; activation skipped");
                    return;
                }
            };

        surface.configure(&device, &surface_config);

        let pair = StatePair::new(&device, &queue);
        let pipelines = create_pipelines(&device, &pair, surface_config.format, &self.config.shaders);

        let mut scheduler = Scheduler::new(WindowDriver::new(window));
        scheduler.start();

        log::info!(
            "cellflow activated: surface {}x{}, simulation fixed at {}x{}",
            surface_config.width,
            surface_config.height,
            SIM_WIDTH,
            SIM_HEIGHT,
        );

        self.state = Some(AppState {
            device,
            queue,
            surface,
            surface_config,
            pair,
            pipelines,
            scheduler,
            released: false,
        });
    }

    fn window_event(
        &mut self,
        event_loop: &winit::event_loop::ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(state) = &mut self.state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                state.release();
                self.state = None;
                event_loop.exit();
            }

            // Resize touches the visible surface only. The simulation pair
            // keeps its fixed resolution; reallocating it here would discard
            // live state mid-run.
            WindowEvent::Resized(new_size) => {
                if let Some((width, height)) = apply_resize(new_size) {
                    state.surface_config.width = width;
                    state.surface_config.height = height;
                    state.surface.configure(&state.device, &state.surface_config);
                }
            }

            WindowEvent::RedrawRequested => {
                tick(state);
            }

            _ => {}
        }
    }

    fn suspended(&mut self, _event_loop: &winit::event_loop::ActiveEventLoop) {
        if let Some(state) = &mut self.state {
            state.release();
        }
        self.state = None;
    }

    fn exiting(&mut self, _event_loop: &winit::event_loop::ActiveEventLoop) {
        if let Some(state) = &mut self.state {
            state.release();
        }
        self.state = None;
    }
}

// ======================== Lifecycle ========================

impl AppState {
    /// Release everything acquired at activation: cancel the pending tick,
    /// then geometry, programs, render targets. Runs on every exit path and
    /// tolerates repeated invocation.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.scheduler.stop();
        self.pipelines.release();
        self.pair.dispose();
        self.released = true;
        log::info!("cellflow deactivated");
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.release();
    }
}

// ======================== GPU Initialization ========================

async fn init_gpu(
    instance: &wgpu::Instance,
    surface: &wgpu::Surface<'_>,
    window: &Window,
) -> Result<(wgpu::Device, wgpu::Queue, wgpu::SurfaceConfiguration), String> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(surface),
            force_fallback_adapter: false,
        })
        .await
        .ok_or_else(|| String::from("no suitable GPU adapter"))?;

    log::info!("GPU: {}", adapter.get_info().name);

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("cellflow_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        )
        .await
        .map_err(|e| format!("failed to create device: {e}"))?;

    let size = window.inner_size();
    let surface_caps = surface.get_capabilities(&adapter);
    let surface_format = surface_caps
        .formats
        .iter()
        .find(|f| f.is_srgb())
        .copied()
        .unwrap_or(surface_caps.formats[0]);

    // Fifo paces ticks to the display refresh, which is what drives the loop.
    let present_mode = surface_caps
        .present_modes
        .iter()
        .find(|&&mode| mode == wgpu::PresentMode::Fifo)
        .copied()
        .unwrap_or(surface_caps.present_modes[0]);

    let surface_config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format: surface_format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode,
        alpha_mode: surface_caps.alpha_modes[0],
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };

    Ok((device, queue, surface_config))
}

// ======================== Frame tick ========================

/// One tick: time + uniforms, simulate, display, swap, request next. A
/// surface that is not ready skips both passes for this tick only; the
/// scheduler keeps going and no error leaves this function.
fn tick(state: &mut AppState) {
    let Some(tick) = state.scheduler.begin_tick() else {
        return;
    };

    let output = match state.surface.get_current_texture() {
        Ok(t) => t,
        Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
            state.surface.configure(&state.device, &state.surface_config);
            state.scheduler.complete_tick(false);
            return;
        }
        Err(e) => {
            log::error!("surface error: {:?}; tick {} skipped", e, tick.index);
            state.scheduler.complete_tick(false);
            return;
        }
    };

    write_field_uniforms(&state.queue, &state.pipelines, tick.time);

    let view = output
        .texture
        .create_view(&wgpu::TextureViewDescriptor::default());

    let mut encoder = state
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tick_encoder"),
        });
    encode_tick(&mut encoder, &state.pipelines, &state.pair, &tick, &view);
    state.queue.submit(std::iter::once(encoder.finish()));

    output.present();
    state.scheduler.complete_tick(true);
}

// ======================== Resize ========================

/// The surface adopts the most recent notified size; zero-area notifications
/// (minimized window) are ignored rather than configuring a dead surface.
fn apply_resize(new_size: PhysicalSize<u32>) -> Option<(u32, u32)> {
    (new_size.width > 0 && new_size.height > 0).then_some((new_size.width, new_size.height))
}

// ======================== Tests ========================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_adopts_the_notified_size() {
        assert_eq!(apply_resize(PhysicalSize::new(400, 300)), Some((400, 300)));
        assert_eq!(apply_resize(PhysicalSize::new(1, 1)), Some((1, 1)));
    }

    #[test]
    fn zero_area_resize_is_ignored() {
        assert_eq!(apply_resize(PhysicalSize::new(0, 300)), None);
        assert_eq!(apply_resize(PhysicalSize::new(400, 0)), None);
        assert_eq!(apply_resize(PhysicalSize::new(0, 0)), None);
    }

    #[test]
    fn simulation_resolution_is_independent_of_resizes() {
        for size in [(800, 600), (400, 300), (1, 1), (3840, 2160)] {
            let _ = apply_resize(PhysicalSize::new(size.0, size.1));
            assert_eq!(SIM_WIDTH, 512);
            assert_eq!(SIM_HEIGHT, 512);
        }
    }
}
