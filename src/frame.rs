// ============================================================================
// frame.rs — cellflow
// Per-tick GPU work: uniform upload and the two-pass draw sequence
// (simulation into the Target texture, then display to the visible surface).
// Shared by the windowed shell and the headless runner.
// ============================================================================

use crate::pipeline::{Pipelines, QUAD_VERTICES};
use crate::scheduler::Tick;
use crate::state::{FieldUniforms, StatePair};

/// Step 2 of the tick sequence: push elapsed time (plus the fixed resolution
/// and dt) to the uniform block both simulate bind groups share.
pub fn write_field_uniforms(queue: &wgpu::Queue, pipelines: &Pipelines, time: f32) {
    queue.write_buffer(
        &pipelines.field_uniforms_buffer,
        0,
        bytemuck::bytes_of(&FieldUniforms::at_time(time)),
    );
}

/// Steps 3-4: encode the simulation pass into the Target texture, then the
/// display pass into `display_view` reading the texture pass one just wrote.
/// Roles are not touched here; the scheduler swaps them afterwards.
pub fn encode_tick(
    encoder: &mut wgpu::CommandEncoder,
    pipelines: &Pipelines,
    pair: &StatePair,
    tick: &Tick,
    display_view: &wgpu::TextureView,
) {
    // Simulation pass: full-screen quad over the Target, reading the Source.
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("simulate_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: pair.view(tick.target),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipelines.simulate_pipeline);
        pass.set_bind_group(0, &pipelines.simulate_bind_groups[tick.source], &[]);
        pass.set_vertex_buffer(0, pipelines.quad.vertex_buffer.slice(..));
        pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
    }

    // Display pass: tone-map the buffer written above to the visible surface.
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("display_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: display_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: 0.02,
                        g: 0.02,
                        b: 0.05,
                        a: 1.0,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipelines.display_pipeline);
        pass.set_bind_group(0, &pipelines.display_bind_groups[tick.source], &[]);
        pass.set_vertex_buffer(0, pipelines.quad.vertex_buffer.slice(..));
        pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
    }
}
