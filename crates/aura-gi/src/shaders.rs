//! Embedded WGSL sources for the injection, propagation, apply, and
//! visualization passes, plus the [`ShaderSet`] lifecycle wrapper.
//!
//! The spherical-harmonic and attenuation constants are spliced in from
//! `aura-grid` at module-build time, so the GPU kernels are numerically
//! identical to the CPU kernel.

use aura_grid::{COSINE_LOBE_C0, COSINE_LOBE_C1, HOP_ATTENUATION, SH_C0, SH_C1};

/// Fixed-point scale for atomic injection accumulation (12 fractional bits).
pub const FIXED_POINT_SCALE: f32 = 4096.0;

/// i32 slots per cell in the injection accumulation buffer:
/// 3 channels x 4 SH coefficients, then occlusion, then 3 spare.
pub const INJECT_SLOTS_PER_CELL: u32 = 16;

/// Kernel constants shared by every shader module.
fn constants_wgsl() -> String {
    format!(
        "const SH_C0: f32 = {SH_C0:?};\n\
         const SH_C1: f32 = {SH_C1:?};\n\
         const COSINE_LOBE_C0: f32 = {COSINE_LOBE_C0:?};\n\
         const COSINE_LOBE_C1: f32 = {COSINE_LOBE_C1:?};\n\
         const HOP_ATTENUATION: f32 = {HOP_ATTENUATION:?};\n\
         const FIXED_POINT_SCALE: f32 = {FIXED_POINT_SCALE:?};\n"
    )
}

/// Cell struct and SH helpers shared by every shader module.
const COMMON_WGSL: &str = r#"
struct Cell {
    red: vec4<f32>,
    green: vec4<f32>,
    blue: vec4<f32>,
    occlusion: vec4<f32>,
}

fn sh_eval(dir: vec3<f32>) -> vec4<f32> {
    return vec4<f32>(SH_C0, -SH_C1 * dir.y, SH_C1 * dir.z, -SH_C1 * dir.x);
}

fn sh_cosine_lobe(dir: vec3<f32>) -> vec4<f32> {
    return vec4<f32>(
        COSINE_LOBE_C0,
        -COSINE_LOBE_C1 * dir.y,
        COSINE_LOBE_C1 * dir.z,
        -COSINE_LOBE_C1 * dir.x,
    );
}

fn cell_index(c: vec3<u32>, res: u32) -> u32 {
    return (c.y * res + c.z) * res + c.x;
}
"#;

/// RSM injection and fixed-point resolve.
const INJECT_WGSL: &str = r#"
struct InjectParams {
    inv_view_proj: mat4x4<f32>,
    camera_pos: vec4<f32>,
    camera_dir_area: vec4<f32>,  // xyz camera dir, w view area at unit depth
    grid_origin_cell: vec4<f32>, // xyz grid min corner, w cell size
    dims: vec4<u32>,             // x rt width, y rt height, z grid resolution
}

@group(0) @binding(0) var<uniform> params: InjectParams;
@group(0) @binding(1) var<storage, read_write> inject: array<atomic<i32>>;
@group(0) @binding(2) var base_color: texture_2d<f32>;
@group(0) @binding(3) var normals: texture_2d<f32>;
@group(0) @binding(4) var depths: texture_depth_2d;
@group(0) @binding(5) var<storage, read_write> resolved: array<Cell>;
@group(0) @binding(6) var<storage, read_write> injected: array<Cell>;

fn atomic_add_fixed(slot: u32, value: f32) {
    atomicAdd(&inject[slot], i32(round(value * FIXED_POINT_SCALE)));
}

@compute @workgroup_size(8, 8, 1)
fn inject_rsm(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.dims.x || gid.y >= params.dims.y) {
        return;
    }
    let depth = textureLoad(depths, vec2<i32>(gid.xy), 0);
    if (depth <= 0.0 || depth >= 1.0) {
        return;
    }

    let size = vec2<f32>(f32(params.dims.x), f32(params.dims.y));
    let uv = (vec2<f32>(gid.xy) + vec2<f32>(0.5)) / size;
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world_h = params.inv_view_proj * ndc;
    let world = world_h.xyz / world_h.w;
    let normal = normalize(textureLoad(normals, vec2<i32>(gid.xy), 0).xyz * 2.0 - 1.0);

    // Surfel area grows with the square of view depth; dividing by the
    // texel count makes total energy independent of RSM resolution.
    let dist = max(dot(world - params.camera_pos.xyz, params.camera_dir_area.xyz), 0.0);
    let texels = f32(params.dims.x) * f32(params.dims.y);
    let area = params.camera_dir_area.w * dist * dist / texels;
    let flux = textureLoad(base_color, vec2<i32>(gid.xy), 0).rgb * area;

    let res = params.dims.z;
    let cell_size = params.grid_origin_cell.w;

    // Radiance lands half a cell along the normal to avoid self-occlusion.
    let grid = (world + normal * cell_size * 0.5 - params.grid_origin_cell.xyz) / cell_size;
    if (grid.x >= 0.0 && grid.y >= 0.0 && grid.z >= 0.0) {
        let c = vec3<u32>(grid);
        if (c.x < res && c.y < res && c.z < res) {
            let base = cell_index(c, res) * 16u;
            var lobe = sh_cosine_lobe(normal);
            for (var k = 0u; k < 4u; k = k + 1u) {
                atomic_add_fixed(base + k, lobe[k] * flux.r);
                atomic_add_fixed(base + 4u + k, lobe[k] * flux.g);
                atomic_add_fixed(base + 8u + k, lobe[k] * flux.b);
            }
        }
    }

    // Occluder surfel at the unoffset position: blocking in proportion to
    // the surfel area over the cell cross-section.
    let occ_grid = (world - params.grid_origin_cell.xyz) / cell_size;
    if (occ_grid.x >= 0.0 && occ_grid.y >= 0.0 && occ_grid.z >= 0.0) {
        let oc = vec3<u32>(occ_grid);
        if (oc.x < res && oc.y < res && oc.z < res) {
            let facing = abs(dot(normal, params.camera_dir_area.xyz));
            let blocking = clamp(area * facing / (cell_size * cell_size), 0.0, 1.0);
            atomic_add_fixed(cell_index(oc, res) * 16u + 12u, blocking);
        }
    }
}

@compute @workgroup_size(64, 1, 1)
fn resolve_injection(@builtin(global_invocation_id) gid: vec3<u32>) {
    let res = params.dims.z;
    let idx = gid.x;
    if (idx >= res * res * res) {
        return;
    }
    let base = idx * 16u;
    var cell = Cell();
    for (var k = 0u; k < 4u; k = k + 1u) {
        cell.red[k] = f32(atomicExchange(&inject[base + k], 0)) / FIXED_POINT_SCALE;
        cell.green[k] = f32(atomicExchange(&inject[base + 4u + k], 0)) / FIXED_POINT_SCALE;
        cell.blue[k] = f32(atomicExchange(&inject[base + 8u + k], 0)) / FIXED_POINT_SCALE;
    }
    let occ = f32(atomicExchange(&inject[base + 12u], 0)) / FIXED_POINT_SCALE;
    cell.occlusion = vec4<f32>(clamp(occ, 0.0, 1.0), 0.0, 0.0, 0.0);
    resolved[idx] = cell;
    injected[idx] = cell;
}
"#;

/// One radiance-transfer hop: gather from the six face neighbors.
const PROPAGATE_WGSL: &str = r#"
struct PropagateParams {
    dims: vec4<u32>, // x = grid resolution
}

@group(0) @binding(0) var<uniform> params: PropagateParams;
@group(0) @binding(1) var<storage, read> src: array<Cell>;
@group(0) @binding(2) var<storage, read_write> dst: array<Cell>;
@group(0) @binding(3) var<storage, read_write> accum: array<Cell>;

fn face_dir(face: u32) -> vec3<f32> {
    switch face {
        case 0u: { return vec3<f32>(1.0, 0.0, 0.0); }
        case 1u: { return vec3<f32>(-1.0, 0.0, 0.0); }
        case 2u: { return vec3<f32>(0.0, 1.0, 0.0); }
        case 3u: { return vec3<f32>(0.0, -1.0, 0.0); }
        case 4u: { return vec3<f32>(0.0, 0.0, 1.0); }
        default: { return vec3<f32>(0.0, 0.0, -1.0); }
    }
}

@compute @workgroup_size(4, 4, 4)
fn propagate(@builtin(global_invocation_id) gid: vec3<u32>) {
    let res = params.dims.x;
    if (gid.x >= res || gid.y >= res || gid.z >= res) {
        return;
    }
    let idx = cell_index(gid, res);
    let here = src[idx];
    var out = Cell();
    // Occluders persist across hops.
    out.occlusion = here.occlusion;
    let occlusion_factor = 1.0 - here.occlusion.x;

    for (var face = 0u; face < 6u; face = face + 1u) {
        let travel = face_dir(face);
        let np = vec3<i32>(gid) - vec3<i32>(travel);
        if (np.x < 0 || np.y < 0 || np.z < 0 ||
            np.x >= i32(res) || np.y >= i32(res) || np.z >= i32(res)) {
            continue;
        }
        let neighbor = src[cell_index(vec3<u32>(np), res)];

        // Neighbor's flux toward this cell, normalized against the total
        // over its six faces so a hop never amplifies DC energy.
        let toward = sh_eval(travel);
        var flux = vec3<f32>(
            max(dot(neighbor.red, toward), 0.0),
            max(dot(neighbor.green, toward), 0.0),
            max(dot(neighbor.blue, toward), 0.0),
        );
        var totals = vec3<f32>(0.0);
        for (var f = 0u; f < 6u; f = f + 1u) {
            let basis = sh_eval(face_dir(f));
            totals += vec3<f32>(
                max(dot(neighbor.red, basis), 0.0),
                max(dot(neighbor.green, basis), 0.0),
                max(dot(neighbor.blue, basis), 0.0),
            );
        }
        let energy = max(
            vec3<f32>(neighbor.red.x, neighbor.green.x, neighbor.blue.x),
            vec3<f32>(0.0),
        );
        flux = select(vec3<f32>(0.0), flux / totals * energy, totals > vec3<f32>(0.0));
        flux *= HOP_ATTENUATION * occlusion_factor;

        // Continue as a cosine lobe whose DC gain equals the moved flux.
        let lobe = sh_cosine_lobe(travel) / COSINE_LOBE_C0;
        out.red += lobe * flux.r;
        out.green += lobe * flux.g;
        out.blue += lobe * flux.b;
    }

    dst[idx] = out;
    var acc = accum[idx];
    acc.red += out.red;
    acc.green += out.green;
    acc.blue += out.blue;
    accum[idx] = acc;
}
"#;

/// Full-screen indirect-light apply pass.
const APPLY_WGSL: &str = r#"
struct CascadeApply {
    center_span: vec4<f32>, // xyz world center, w span
    factors: vec4<f32>,     // x intensity, y cell size, z resolution
}

struct ApplyParams {
    inv_view_proj: mat4x4<f32>,
    camera_pos: vec4<f32>,
    counts: vec4<u32>, // x cascade count, y rt width, z rt height
    cascades: array<CascadeApply, 4>,
}

@group(0) @binding(0) var<uniform> params: ApplyParams;
@group(0) @binding(1) var normals: texture_2d<f32>;
@group(0) @binding(2) var depths: texture_depth_2d;
@group(0) @binding(3) var ambient_occlusion: texture_2d<f32>;
@group(0) @binding(4) var<storage, read> grid0: array<Cell>;
@group(0) @binding(5) var<storage, read> grid1: array<Cell>;
@group(0) @binding(6) var<storage, read> grid2: array<Cell>;
@group(0) @binding(7) var<storage, read> grid3: array<Cell>;

@vertex
fn vs_fullscreen(@builtin(vertex_index) idx: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((idx << 1u) & 2u), f32(idx & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

fn load_cell(cascade: u32, idx: u32) -> Cell {
    switch cascade {
        case 0u: { return grid0[idx]; }
        case 1u: { return grid1[idx]; }
        case 2u: { return grid2[idx]; }
        default: { return grid3[idx]; }
    }
}

fn sample_cascade(ci: u32, world: vec3<f32>, normal: vec3<f32>) -> vec3<f32> {
    let c = params.cascades[ci];
    let res = u32(c.factors.z);
    let cell_size = c.factors.y;
    let origin = c.center_span.xyz - vec3<f32>(c.center_span.w * 0.5);
    let gp = (world - origin) / cell_size - vec3<f32>(0.5);
    let base = floor(gp);
    let frac = gp - base;
    // Incoming radiance at the surface: evaluate against the direction
    // opposite the normal.
    let basis = sh_eval(-normal);
    var rgb = vec3<f32>(0.0);
    for (var corner = 0u; corner < 8u; corner = corner + 1u) {
        let o = vec3<f32>(
            f32(corner & 1u),
            f32((corner >> 1u) & 1u),
            f32((corner >> 2u) & 1u),
        );
        let p = base + o;
        if (p.x < 0.0 || p.y < 0.0 || p.z < 0.0 ||
            p.x >= f32(res) || p.y >= f32(res) || p.z >= f32(res)) {
            continue;
        }
        let w = mix(1.0 - frac.x, frac.x, o.x)
            * mix(1.0 - frac.y, frac.y, o.y)
            * mix(1.0 - frac.z, frac.z, o.z);
        let cell = load_cell(ci, cell_index(vec3<u32>(p), res));
        rgb += w * vec3<f32>(
            max(dot(cell.red, basis), 0.0),
            max(dot(cell.green, basis), 0.0),
            max(dot(cell.blue, basis), 0.0),
        );
    }
    return rgb * c.factors.x;
}

fn cascade_contains(ci: u32, world: vec3<f32>) -> bool {
    let c = params.cascades[ci];
    let half = c.center_span.w * 0.5 - c.factors.y; // one-cell margin
    let d = abs(world - c.center_span.xyz);
    return max(d.x, max(d.y, d.z)) < half;
}

@fragment
fn fs_apply(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let pix = vec2<i32>(pos.xy);
    let depth = textureLoad(depths, pix, 0);
    if (depth <= 0.0 || depth >= 1.0) {
        return vec4<f32>(0.0);
    }
    let size = vec2<f32>(f32(params.counts.y), f32(params.counts.z));
    let uv = pos.xy / size;
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world_h = params.inv_view_proj * ndc;
    let world = world_h.xyz / world_h.w;
    let normal = normalize(textureLoad(normals, pix, 0).xyz * 2.0 - 1.0);
    let ao = textureLoad(ambient_occlusion, pix, 0).r;

    // Finest cascade containing the point wins; coarser ones are fallback.
    for (var ci = 0u; ci < params.counts.x; ci = ci + 1u) {
        if (cascade_contains(ci, world)) {
            return vec4<f32>(sample_cascade(ci, world, normal) * ao, 1.0);
        }
    }
    return vec4<f32>(0.0);
}
"#;

/// Debug probe billboards, colored by stored radiance.
const VISUALIZE_WGSL: &str = r#"
struct VisualizeParams {
    view_proj: mat4x4<f32>,
    camera_right: vec4<f32>,
    camera_up: vec4<f32>,
    grid_origin_cell: vec4<f32>, // xyz grid min corner, w cell size
    dims: vec4<f32>,             // x resolution, y probe size, z intensity
}

@group(0) @binding(0) var<uniform> params: VisualizeParams;
@group(0) @binding(1) var<storage, read> grid: array<Cell>;

struct ProbeOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec3<f32>,
}

@vertex
fn vs_probe(
    @builtin(vertex_index) vid: u32,
    @builtin(instance_index) iid: u32,
) -> ProbeOutput {
    let res = u32(params.dims.x);
    let x = iid % res;
    let z = (iid / res) % res;
    let y = iid / (res * res);
    let cell = grid[cell_index(vec3<u32>(x, y, z), res)];
    let energy = max(
        vec3<f32>(cell.red.x, cell.green.x, cell.blue.x),
        vec3<f32>(0.0),
    );

    var corner = vec2<f32>(0.0);
    switch vid {
        case 0u: { corner = vec2<f32>(-1.0, -1.0); }
        case 1u: { corner = vec2<f32>(1.0, -1.0); }
        case 2u: { corner = vec2<f32>(1.0, 1.0); }
        case 3u: { corner = vec2<f32>(-1.0, -1.0); }
        case 4u: { corner = vec2<f32>(1.0, 1.0); }
        default: { corner = vec2<f32>(-1.0, 1.0); }
    }

    // Collapse dark probes to degenerate quads.
    var size = params.dims.y * 0.5;
    if (energy.r + energy.g + energy.b <= 0.0) {
        size = 0.0;
    }
    let cell_size = params.grid_origin_cell.w;
    let center = params.grid_origin_cell.xyz
        + (vec3<f32>(f32(x), f32(y), f32(z)) + vec3<f32>(0.5)) * cell_size;
    let world = center
        + (params.camera_right.xyz * corner.x + params.camera_up.xyz * corner.y) * size;

    var out: ProbeOutput;
    out.position = params.view_proj * vec4<f32>(world, 1.0);
    out.color = energy * params.dims.z;
    return out;
}

@fragment
fn fs_probe(in: ProbeOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(in.color, 1.0);
}
"#;

/// Compiled shader modules for every pass. Created by `add_shaders`,
/// destroyed by `remove_shaders`.
pub struct ShaderSet {
    pub inject: wgpu::ShaderModule,
    pub propagate: wgpu::ShaderModule,
    pub apply: wgpu::ShaderModule,
    pub visualize: wgpu::ShaderModule,
}

impl ShaderSet {
    /// Compiles all shader modules.
    pub fn new(device: &wgpu::Device) -> Self {
        let compile = |label: &str, body: &str| {
            let source = format!("{}\n{}\n{}", constants_wgsl(), COMMON_WGSL, body);
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        };
        log::info!("compiling LPV shader modules");
        Self {
            inject: compile("lpv-inject", INJECT_WGSL),
            propagate: compile("lpv-propagate", PROPAGATE_WGSL),
            apply: compile("lpv-apply", APPLY_WGSL),
            visualize: compile("lpv-visualize", VISUALIZE_WGSL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_block_is_valid_wgsl() {
        let block = constants_wgsl();
        assert!(block.contains("const SH_C0: f32 = 0.2820948;"));
        assert!(block.contains("const HOP_ATTENUATION: f32 = 0.99;"));
        // Every line is a const declaration.
        for line in block.lines() {
            assert!(line.starts_with("const "), "unexpected line: {line}");
            assert!(line.ends_with(';'));
        }
    }

    #[test]
    fn test_shader_sources_reference_shared_cell_struct() {
        for body in [INJECT_WGSL, PROPAGATE_WGSL, APPLY_WGSL, VISUALIZE_WGSL] {
            assert!(body.contains("Cell"), "pass must use the shared cell layout");
        }
    }
}
