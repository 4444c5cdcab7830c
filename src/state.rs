// ============================================================================
// state.rs — cellflow
// Render target pair: two fixed-resolution offscreen textures with explicit
// Source/Target role labels, plus the per-frame uniform block.
// ============================================================================

use bytemuck::{Pod, Zeroable};
use rand::Rng;

// ======================== Constants ========================

pub const SIM_WIDTH: u32 = 512;
pub const SIM_HEIGHT: u32 = 512;
/// Fixed integration step for the update rule, decoupled from frame cadence.
pub const SIM_DT: f32 = 0.02;

pub const STATE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub fn sim_extent() -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: SIM_WIDTH,
        height: SIM_HEIGHT,
        depth_or_array_layers: 1,
    }
}

// ======================== Uniforms ========================

/// Uniform block bound to the simulation fragment program each tick.
/// The state texture itself is bound separately, per ping-pong orientation.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct FieldUniforms {
    pub resolution: [f32; 2],
    pub dt: f32,
    pub time: f32,
}

impl FieldUniforms {
    pub fn at_time(time: f32) -> Self {
        Self {
            resolution: [SIM_WIDTH as f32, SIM_HEIGHT as f32],
            dt: SIM_DT,
            time,
        }
    }
}

// ======================== Roles ========================

/// One of the two state textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// Explicit two-slot role labeling. Exactly one slot is Source and the other
/// Target at all times; `swap` is a pure relabeling, no reallocation or copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roles {
    source: Slot,
}

impl Default for Roles {
    fn default() -> Self {
        Self { source: Slot::A }
    }
}

impl Roles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> Slot {
        self.source
    }

    pub fn target(&self) -> Slot {
        self.source.other()
    }

    pub fn swap(&mut self) {
        self.source = self.source.other();
    }
}

// ======================== StatePair ========================

/// The two offscreen state textures. Dimensions are fixed at allocation and
/// never change, independent of display surface size.
pub struct StatePair {
    textures: [wgpu::Texture; 2],
    views: [wgpu::TextureView; 2],
    disposed: bool,
}

impl StatePair {
    /// Allocate both textures and upload the initial field into slot A
    /// (the initial Source). Slot B starts zeroed.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;

        let make = |label: &str| -> wgpu::Texture {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: sim_extent(),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: STATE_FORMAT,
                usage,
                view_formats: &[],
            })
        };

        let textures = [make("state_a"), make("state_b")];
        let views = [
            textures[0].create_view(&wgpu::TextureViewDescriptor::default()),
            textures[1].create_view(&wgpu::TextureViewDescriptor::default()),
        ];

        let field = seed_field(&mut rand::thread_rng());
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &textures[0],
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &field,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(SIM_WIDTH * 4),
                rows_per_image: Some(SIM_HEIGHT),
            },
            sim_extent(),
        );

        Self {
            textures,
            views,
            disposed: false,
        }
    }

    pub fn view(&self, index: usize) -> &wgpu::TextureView {
        &self.views[index]
    }

    /// Release both textures' GPU memory. Safe to call more than once; calls
    /// after the first are no-ops.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.textures[0].destroy();
        self.textures[1].destroy();
        self.disposed = true;
        log::debug!("state pair disposed");
    }
}

// ======================== Initial field ========================

/// Build the initial RGBA field: full activator (R) everywhere, with random
/// circular clusters of inhibitor (G) that kick the reaction off. Gaussian
/// falloff inside each cluster, toroidal wrap at the edges.
pub fn seed_field(rng: &mut impl Rng) -> Vec<u8> {
    let n = (SIM_WIDTH * SIM_HEIGHT) as usize;
    let mut field = vec![0u8; n * 4];
    for px in field.chunks_exact_mut(4) {
        px[0] = 255;
        px[3] = 255;
    }

    let num_clusters = 16;
    for _ in 0..num_clusters {
        let cx = rng.gen_range(0..SIM_WIDTH) as i32;
        let cy = rng.gen_range(0..SIM_HEIGHT) as i32;
        let radius = rng.gen_range(4..12) as f32;

        let ir = radius as i32 + 1;
        for dy in -ir..=ir {
            for dx in -ir..=ir {
                let dist = ((dx * dx + dy * dy) as f32).sqrt();
                if dist > radius {
                    continue;
                }

                let px = ((cx + dx) % SIM_WIDTH as i32 + SIM_WIDTH as i32) % SIM_WIDTH as i32;
                let py = ((cy + dy) % SIM_HEIGHT as i32 + SIM_HEIGHT as i32) % SIM_HEIGHT as i32;
                let idx = (py as u32 * SIM_WIDTH + px as u32) as usize * 4;

                let falloff = (-dist * dist / (2.0 * radius * radius * 0.25)).exp();

                let v = (falloff * 255.0).min(255.0) as u8;
                field[idx] = field[idx].min(128);
                field[idx + 1] = field[idx + 1].max(v);
            }
        }
    }

    field
}

// ======================== Tests ========================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn roles_start_with_source_a() {
        let roles = Roles::new();
        assert_eq!(roles.source(), Slot::A);
        assert_eq!(roles.target(), Slot::B);
    }

    #[test]
    fn roles_are_disjoint_and_cover_both_slots() {
        let mut roles = Roles::new();
        for _ in 0..7 {
            assert_ne!(roles.source(), roles.target());
            assert_ne!(roles.source().index(), roles.target().index());
            roles.swap();
        }
    }

    #[test]
    fn source_parity_after_n_swaps() {
        for n in 0..32usize {
            let mut roles = Roles::new();
            for _ in 0..n {
                roles.swap();
            }
            let expected = if n % 2 == 0 { Slot::A } else { Slot::B };
            assert_eq!(roles.source(), expected, "after {} swaps", n);
        }
    }

    #[test]
    fn field_uniforms_layout_is_16_bytes() {
        assert_eq!(std::mem::size_of::<FieldUniforms>(), 16);
        let u = FieldUniforms::at_time(1.5);
        assert_eq!(u.resolution, [SIM_WIDTH as f32, SIM_HEIGHT as f32]);
        assert_eq!(u.dt, SIM_DT);
        assert_eq!(u.time, 1.5);
    }

    #[test]
    fn seed_field_covers_full_resolution() {
        let mut rng = StdRng::seed_from_u64(7);
        let field = seed_field(&mut rng);
        assert_eq!(field.len(), (SIM_WIDTH * SIM_HEIGHT * 4) as usize);
    }

    #[test]
    fn seed_field_is_opaque_and_contains_clusters() {
        let mut rng = StdRng::seed_from_u64(7);
        let field = seed_field(&mut rng);

        assert!(field.chunks_exact(4).all(|px| px[3] == 255));
        // Background keeps the activator saturated.
        assert!(field.chunks_exact(4).any(|px| px[0] == 255 && px[1] == 0));
        // At least one seeded cluster pixel.
        assert!(field.chunks_exact(4).any(|px| px[1] > 128));
    }
}
