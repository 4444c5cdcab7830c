// ============================================================================
// headless.rs — cellflow
// Headless runner: drives the same scheduler and two-pass tick sequence
// against an offscreen display target, then exports the final frame and a
// run report.
// ============================================================================

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use chrono::Local;
use serde::Serialize;

use crate::frame::{encode_tick, write_field_uniforms};
use crate::pipeline::{create_pipelines, ShaderSet};
use crate::scheduler::{CountingDriver, Scheduler};
use crate::state::{StatePair, SIM_DT, SIM_HEIGHT, SIM_WIDTH};

#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub frames: u64,
    pub display_width: u32,
    pub display_height: u32,
    pub out_dir: Option<String>,
    pub progress_interval: u64,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            frames: 600,
            display_width: 800,
            display_height: 600,
            out_dir: None,
            progress_interval: 100,
        }
    }
}

#[derive(Serialize)]
struct RunReport {
    frames: u64,
    sim_width: u32,
    sim_height: u32,
    dt: f32,
    display_width: u32,
    display_height: u32,
    wall_seconds: f64,
    avg_fps: f64,
}

pub fn run_headless(config: &HeadlessConfig) -> Result<(), String> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or_else(|| String::from("failed to get GPU adapter for headless mode"))?;

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("cellflow_headless_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
        },
        None,
    ))
    .map_err(|e| format!("failed to create headless device: {e}"))?;

    let mut pair = StatePair::new(&device, &queue);
    let display_format = wgpu::TextureFormat::Rgba8Unorm;
    let mut pipelines = create_pipelines(&device, &pair, display_format, &ShaderSet::default());

    let display_width = config.display_width.max(1);
    let display_height = config.display_height.max(1);
    let display_target = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("headless_display"),
        size: wgpu::Extent3d {
            width: display_width,
            height: display_height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: display_format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let display_view = display_target.create_view(&wgpu::TextureViewDescriptor::default());

    let mut scheduler = Scheduler::new(CountingDriver::default());
    scheduler.start();

    log::info!(
        "headless run started: {} frames, simulation {}x{}, display {}x{}",
        config.frames,
        SIM_WIDTH,
        SIM_HEIGHT,
        display_width,
        display_height,
    );

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut last_report_frame = 0u64;

    while scheduler.completed_ticks() < config.frames {
        let Some(tick) = scheduler.begin_tick() else {
            break;
        };

        write_field_uniforms(&queue, &pipelines, tick.time);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("headless_tick_encoder"),
        });
        encode_tick(&mut encoder, &pipelines, &pair, &tick, &display_view);
        queue.submit(std::iter::once(encoder.finish()));
        scheduler.complete_tick(true);

        let done = scheduler.completed_ticks();
        if config.progress_interval > 0 && done % config.progress_interval == 0 {
            let total_elapsed = started.elapsed().as_secs_f64().max(1e-6);
            let total_fps = done as f64 / total_elapsed;

            let window_elapsed = last_report.elapsed().as_secs_f64().max(1e-6);
            let window_frames = done - last_report_frame;
            let window_fps = window_frames as f64 / window_elapsed;

            let remaining = config.frames.saturating_sub(done);
            let eta_secs = if total_fps > 1e-6 {
                remaining as f64 / total_fps
            } else {
                0.0
            };

            log::info!(
                "headless progress: {}/{} | fps={:.0} (window {:.0}) | ETA={:.1}s",
                done,
                config.frames,
                total_fps,
                window_fps,
                eta_secs,
            );

            last_report = Instant::now();
            last_report_frame = done;
        }
    }

    let wall_seconds = started.elapsed().as_secs_f64();
    let frames_done = scheduler.completed_ticks();

    if let Some(dir) = &config.out_dir {
        let run_dir =
            PathBuf::from(dir).join(format!("run_{}", Local::now().format("%Y%m%d_%H%M%S")));
        fs::create_dir_all(&run_dir)
            .map_err(|e| format!("failed to create run directory {:?}: {}", run_dir, e))?;

        let rgba = readback_rgba(&device, &queue, &display_target, display_width, display_height)?;
        let frame_path = run_dir.join(format!("frame{:06}.png", frames_done));
        image::save_buffer(
            &frame_path,
            &rgba,
            display_width,
            display_height,
            image::ColorType::Rgba8,
        )
        .map_err(|e| format!("failed to save final frame: {e}"))?;
        log::info!("final frame saved: {:?}", frame_path);

        let report = RunReport {
            frames: frames_done,
            sim_width: SIM_WIDTH,
            sim_height: SIM_HEIGHT,
            dt: SIM_DT,
            display_width,
            display_height,
            wall_seconds,
            avg_fps: frames_done as f64 / wall_seconds.max(1e-6),
        };
        let report_path = run_dir.join("report.json");
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("failed to serialize run report: {e}"))?;
        fs::write(&report_path, json)
            .map_err(|e| format!("failed to write run report: {e}"))?;
        log::info!("run report saved: {:?}", report_path);
    }

    scheduler.stop();
    log::debug!(
        "tick requests: {} issued, {} cancelled",
        scheduler.driver().scheduled,
        scheduler.driver().cancelled.len(),
    );
    pipelines.release();
    pair.dispose();

    log::info!(
        "headless run finished: {} frames in {:.1}s",
        frames_done,
        wall_seconds,
    );
    Ok(())
}

// ======================== Readback ========================

fn padded_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let unpadded = width * 4;
    (unpadded + align - 1) / align * align
}

/// Copy the display target to a staging buffer and strip the row padding.
/// The target is Rgba8Unorm, so rows come back in RGBA order already.
fn readback_rgba(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, String> {
    let padded_bpr = padded_bytes_per_row(width);
    let unpadded_bpr = width * 4;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size: (padded_bpr * height) as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    match rx.recv() {
        Ok(Ok(())) => {}
        _ => return Err(String::from("GPU readback failed")),
    }

    let data = slice.get_mapped_range();
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for row in 0..height {
        let start = (row * padded_bpr) as usize;
        rgba.extend_from_slice(&data[start..start + unpadded_bpr as usize]);
    }
    drop(data);
    staging.unmap();

    Ok(rgba)
}

// ======================== Tests ========================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_rows_honor_copy_alignment() {
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        for width in [1u32, 63, 64, 100, 512, 800, 1920] {
            let padded = padded_bytes_per_row(width);
            assert_eq!(padded % align, 0, "width {}", width);
            assert!(padded >= width * 4);
            assert!(padded - width * 4 < align);
        }
    }

    #[test]
    fn default_config_is_sane() {
        let config = HeadlessConfig::default();
        assert!(config.frames > 0);
        assert!(config.display_width > 0 && config.display_height > 0);
        assert!(config.out_dir.is_none());
    }
}
