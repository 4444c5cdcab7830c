// ============================================================================
// pipeline.rs — cellflow
// Render pipeline creation (simulate & display), full-screen quad geometry,
// and bind-group-layout helpers.
// ============================================================================

use std::borrow::Cow;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::state::{FieldUniforms, StatePair, STATE_FORMAT};

// ======================== Shader sources ========================

/// The three externally authored program sources, treated as opaque WGSL
/// text. Contract: the simulation fragment program accepts
/// {state texture, resolution, dt, time}; the display fragment program
/// accepts {state texture}.
#[derive(Clone)]
pub struct ShaderSet {
    pub vertex: Cow<'static, str>,
    pub simulate: Cow<'static, str>,
    pub display: Cow<'static, str>,
}

impl Default for ShaderSet {
    fn default() -> Self {
        Self {
            vertex: Cow::Borrowed(include_str!("shaders/quad.wgsl")),
            simulate: Cow::Borrowed(include_str!("shaders/simulate.wgsl")),
            display: Cow::Borrowed(include_str!("shaders/display.wgsl")),
        }
    }
}

// ======================== Quad ========================

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
}

/// Two triangles covering clip space, shared by both draw calls.
pub const QUAD_VERTICES: [Vertex; 6] = [
    Vertex { pos: [-1.0, -1.0], uv: [0.0, 1.0] },
    Vertex { pos: [1.0, -1.0], uv: [1.0, 1.0] },
    Vertex { pos: [1.0, 1.0], uv: [1.0, 0.0] },
    Vertex { pos: [-1.0, -1.0], uv: [0.0, 1.0] },
    Vertex { pos: [1.0, 1.0], uv: [1.0, 0.0] },
    Vertex { pos: [-1.0, 1.0], uv: [0.0, 0.0] },
];

pub struct Quad {
    pub vertex_buffer: wgpu::Buffer,
    released: bool,
}

impl Quad {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    pub fn new(device: &wgpu::Device) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad_vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        Self {
            vertex_buffer,
            released: false,
        }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.vertex_buffer.destroy();
        self.released = true;
    }
}

// ======================== Pipelines ========================

/// Both render pipelines and their per-orientation bind groups, created once
/// at activation and never rebuilt. Bind groups are indexed by the Source
/// slot: entry i reads state texture i in the simulation pass and the
/// just-written texture 1-i in the display pass.
pub struct Pipelines {
    pub simulate_pipeline: wgpu::RenderPipeline,
    pub simulate_bind_groups: [wgpu::BindGroup; 2],

    pub display_pipeline: wgpu::RenderPipeline,
    pub display_bind_groups: [wgpu::BindGroup; 2],

    pub field_uniforms_buffer: wgpu::Buffer,
    pub quad: Quad,

    released: bool,
}

impl Pipelines {
    /// Release the geometry and uniform buffers. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.quad.release();
        self.field_uniforms_buffer.destroy();
        self.released = true;
        log::debug!("pipelines released");
    }
}

// ======================== Pipeline creation ========================

pub fn create_pipelines(
    device: &wgpu::Device,
    pair: &StatePair,
    surface_format: wgpu::TextureFormat,
    shaders: &ShaderSet,
) -> Pipelines {
    // ---- Load shaders ----
    let vertex_shader = load_shader(device, "quad", &shaders.vertex);
    let simulate_shader = load_shader(device, "simulate", &shaders.simulate);
    let display_shader = load_shader(device, "display", &shaders.display);

    let quad = Quad::new(device);

    // ---- Samplers ----
    // The update rule reads exact texels on a toroidal field; the display
    // pass may stretch to an arbitrary surface size.
    let state_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("state_sampler"),
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    });
    let display_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("display_sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    });

    // ---- Field uniforms ----
    let field_uniforms_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("field_uniforms"),
        contents: bytemuck::bytes_of(&FieldUniforms::at_time(0.0)),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    });

    // ================================================================
    // SIMULATE PIPELINE
    // ================================================================
    let simulate_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("simulate_bgl"),
        entries: &[bgl_uniform(0), bgl_texture(1), bgl_sampler(2)],
    });

    let simulate_pipeline = create_render_pipeline(
        device,
        "simulate",
        &simulate_bgl,
        &vertex_shader,
        &simulate_shader,
        STATE_FORMAT,
    );

    let simulate_bind_groups = [
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("simulate_bg_0"),
            layout: &simulate_bgl,
            entries: &[
                bg_buffer(0, &field_uniforms_buffer),
                bg_texture(1, pair.view(0)),
                bg_sampler(2, &state_sampler),
            ],
        }),
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("simulate_bg_1"),
            layout: &simulate_bgl,
            entries: &[
                bg_buffer(0, &field_uniforms_buffer),
                bg_texture(1, pair.view(1)),
                bg_sampler(2, &state_sampler),
            ],
        }),
    ];

    // ================================================================
    // DISPLAY PIPELINE
    // ================================================================
    let display_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("display_bgl"),
        entries: &[bgl_texture(0), bgl_sampler(1)],
    });

    let display_pipeline = create_render_pipeline(
        device,
        "display",
        &display_bgl,
        &vertex_shader,
        &display_shader,
        surface_format,
    );

    // Display reads the texture the simulation pass just wrote: when the
    // Source is slot i, that is slot 1-i.
    let display_bind_groups = [
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("display_bg_0"),
            layout: &display_bgl,
            entries: &[bg_texture(0, pair.view(1)), bg_sampler(1, &display_sampler)],
        }),
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("display_bg_1"),
            layout: &display_bgl,
            entries: &[bg_texture(0, pair.view(0)), bg_sampler(1, &display_sampler)],
        }),
    ];

    Pipelines {
        simulate_pipeline,
        simulate_bind_groups,
        display_pipeline,
        display_bind_groups,
        field_uniforms_buffer,
        quad,
        released: false,
    }
}

// ======================== Helpers ========================

fn load_shader(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.to_owned().into()),
    })
}

fn create_render_pipeline(
    device: &wgpu::Device,
    name: &str,
    bgl: &wgpu::BindGroupLayout,
    vertex_module: &wgpu::ShaderModule,
    fragment_module: &wgpu::ShaderModule,
    target_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{name}_pipeline_layout")),
        bind_group_layouts: &[bgl],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("{name}_pipeline")),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: vertex_module,
            entry_point: Some("vs_main"),
            buffers: &[Quad::layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: fragment_module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_texture(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
        },
        count: None,
    }
}

fn bgl_sampler(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn bg_buffer(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

fn bg_texture<'a>(binding: u32, view: &'a wgpu::TextureView) -> wgpu::BindGroupEntry<'a> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(view),
    }
}

fn bg_sampler<'a>(binding: u32, sampler: &'a wgpu::Sampler) -> wgpu::BindGroupEntry<'a> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::Sampler(sampler),
    }
}

// ======================== Tests ========================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_struct() {
        assert_eq!(std::mem::size_of::<Vertex>(), 16);
        let layout = Quad::layout();
        assert_eq!(layout.array_stride, 16);
        assert_eq!(layout.attributes.len(), 2);
        assert_eq!(layout.attributes[1].offset, 8);
    }

    #[test]
    fn quad_covers_clip_space() {
        assert_eq!(QUAD_VERTICES.len(), 6);
        let xs: Vec<f32> = QUAD_VERTICES.iter().map(|v| v.pos[0]).collect();
        let ys: Vec<f32> = QUAD_VERTICES.iter().map(|v| v.pos[1]).collect();
        assert_eq!(xs.iter().cloned().fold(f32::INFINITY, f32::min), -1.0);
        assert_eq!(xs.iter().cloned().fold(f32::NEG_INFINITY, f32::max), 1.0);
        assert_eq!(ys.iter().cloned().fold(f32::INFINITY, f32::min), -1.0);
        assert_eq!(ys.iter().cloned().fold(f32::NEG_INFINITY, f32::max), 1.0);
        for v in &QUAD_VERTICES {
            assert!((0.0..=1.0).contains(&v.uv[0]));
            assert!((0.0..=1.0).contains(&v.uv[1]));
        }
    }

    #[test]
    fn default_shader_set_honors_the_uniform_contract() {
        let shaders = ShaderSet::default();
        assert!(shaders.vertex.contains("vs_main"));
        assert!(shaders.simulate.contains("fs_main"));
        assert!(shaders.display.contains("fs_main"));
        for field in ["resolution", "dt", "time"] {
            assert!(
                shaders.simulate.contains(field),
                "simulate shader missing `{}`",
                field
            );
        }
    }
}
