//! Physics kernel interface: slot layout, prelude and reflection.
//!
//! A physics kernel is a WGSL compute shader. Every resource lives in
//! `@group(0)`; bindings 0..=8 are the fixed slots the engine feeds every
//! step, bindings from 9 up are scalar coefficients (`var<uniform> name: f32`)
//! that callers set by name.
//!
//! Before compilation the engine prepends a prelude with the model
//! dimensions:
//!
//! ```wgsl
//! const GRID_WIDTH: u32 = 64u;
//! const GRID_HEIGHT: u32 = 48u;
//! const CELL_COUNT: u32 = 3072u;
//! ```
//!
//! Generation `g` of the generation buffer starts at element `g * CELL_COUNT`.
//! For rotation index `r` the previous generation is `r`, current is
//! `(r + 1) % 3` and next (the write target) is `(r + 2) % 3`.

use std::collections::BTreeMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, ScalarKind, ShaderStage, StorageAccess, TypeInner};

use crate::error::{EngineError, Result};

/// Number of fixed slots. Coefficient slots start here.
pub const FIRST_COEFFICIENT_SLOT: u32 = 9;

/// Size of a scalar uniform buffer. Uniform bindings are padded to 16 bytes.
pub const SCALAR_UNIFORM_SIZE: u64 = 16;

/// Fixed kernel slots, in binding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixedSlot {
    /// Region id grid, `array<i32>`.
    RegionIds,
    /// Three generations, `array<f32>` of `3 * CELL_COUNT`.
    Generations,
    /// Boundary gain grid, `array<f32>`.
    BoundaryGain,
    /// Rotation index, `u32`.
    RotationIndex,
    /// Sample offset within the block, `u32`.
    SampleOffset,
    /// Block excitation, `array<f32>`.
    Excitation,
    /// Block output, `array<f32>`. Kernels that sum several listener cells
    /// may declare it `array<atomic<u32>>` and accumulate f32 bit patterns.
    Output,
    /// Flattened excitation cell, `u32`.
    InputPosition,
    /// Listener mask, `array<i32>`.
    OutputMask,
}

/// How a fixed slot must be declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRequirement {
    /// `var<uniform>`.
    Uniform,
    /// `var<storage, read>` or `var<storage, read_write>`.
    Storage,
    /// `var<storage, read_write>`.
    WritableStorage,
}

impl FixedSlot {
    /// All fixed slots, in binding order.
    pub const ALL: [FixedSlot; 9] = [
        FixedSlot::RegionIds,
        FixedSlot::Generations,
        FixedSlot::BoundaryGain,
        FixedSlot::RotationIndex,
        FixedSlot::SampleOffset,
        FixedSlot::Excitation,
        FixedSlot::Output,
        FixedSlot::InputPosition,
        FixedSlot::OutputMask,
    ];

    /// Binding index.
    pub const fn slot(self) -> u32 {
        self as u32
    }

    /// Fixed slot at `slot`, if any.
    pub fn from_slot(slot: u32) -> Option<Self> {
        Self::ALL.get(slot as usize).copied()
    }

    /// Declaration the slot must use.
    pub const fn requirement(self) -> SlotRequirement {
        match self {
            Self::RotationIndex | Self::SampleOffset | Self::InputPosition => {
                SlotRequirement::Uniform
            }
            Self::Generations | Self::Output => SlotRequirement::WritableStorage,
            Self::RegionIds | Self::BoundaryGain | Self::Excitation | Self::OutputMask => {
                SlotRequirement::Storage
            }
        }
    }

    /// Human readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::RegionIds => "region ids",
            Self::Generations => "generations",
            Self::BoundaryGain => "boundary gain",
            Self::RotationIndex => "rotation index",
            Self::SampleOffset => "sample offset",
            Self::Excitation => "excitation",
            Self::Output => "output",
            Self::InputPosition => "input position",
            Self::OutputMask => "output mask",
        }
    }
}

/// Resource kind of a reflected binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Uniform buffer.
    Uniform,
    /// Storage buffer.
    Storage {
        /// Declared without `write` access.
        read_only: bool,
    },
}

/// A binding declared by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelBinding {
    /// Binding index in group 0.
    pub slot: u32,
    /// Variable name, when declared with one.
    pub name: Option<String>,
    /// Resource kind.
    pub kind: BindingKind,
}

impl KernelBinding {
    /// Layout entry matching the declaration.
    pub fn layout_entry(&self) -> wgpu::BindGroupLayoutEntry {
        let ty = match self.kind {
            BindingKind::Uniform => wgpu::BufferBindingType::Uniform,
            BindingKind::Storage { read_only } => wgpu::BufferBindingType::Storage { read_only },
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.slot,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }
}

/// Name to slot map of the coefficients a kernel declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoefficientRegistry {
    by_name: BTreeMap<String, u32>,
}

impl CoefficientRegistry {
    /// Slot of the coefficient called `name`.
    pub fn slot(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Name of the coefficient at `slot`.
    pub fn name(&self, slot: u32) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, &s)| s == slot)
            .map(|(name, _)| name.as_str())
    }

    /// Whether a coefficient lives at `slot`.
    pub fn contains_slot(&self, slot: u32) -> bool {
        self.by_name.values().any(|&s| s == slot)
    }

    /// `(name, slot)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.by_name.iter().map(|(name, &slot)| (name.as_str(), slot))
    }

    /// Number of coefficients.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the kernel declares no coefficients.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn insert(&mut self, name: String, slot: u32) {
        self.by_name.insert(name, slot);
    }
}

/// Reflected interface of a compiled kernel.
#[derive(Debug, Clone)]
pub struct KernelLayout {
    /// Entry point used for dispatch.
    pub entry_point: String,
    /// `@workgroup_size` of the entry point.
    pub workgroup_size: [u32; 3],
    /// Declared bindings, ordered by slot.
    pub bindings: Vec<KernelBinding>,
    /// Coefficient slots.
    pub coefficients: CoefficientRegistry,
}

impl KernelLayout {
    /// Whether the kernel declares `slot`.
    pub fn declares(&self, slot: u32) -> bool {
        self.bindings.iter().any(|b| b.slot == slot)
    }

    /// Bind group layout entries for every declared binding.
    pub fn layout_entries(&self) -> Vec<wgpu::BindGroupLayoutEntry> {
        self.bindings.iter().map(KernelBinding::layout_entry).collect()
    }

    /// Workgroup counts covering a `width x height` grid.
    pub fn dispatch_size(&self, width: u32, height: u32) -> (u32, u32) {
        let wx = self.workgroup_size[0].max(1);
        let wy = self.workgroup_size[1].max(1);
        (width.div_ceil(wx), height.div_ceil(wy))
    }
}

/// WGSL constants describing the loaded model.
pub fn model_prelude(width: u32, height: u32) -> String {
    format!(
        "const GRID_WIDTH: u32 = {width}u;\n\
         const GRID_HEIGHT: u32 = {height}u;\n\
         const CELL_COUNT: u32 = {}u;\n",
        width as u64 * height as u64
    )
}

/// Number of lines [`model_prelude`] adds ahead of the kernel source.
pub const PRELUDE_LINES: usize = 3;

/// Prelude followed by the kernel source.
pub fn assemble_source(width: u32, height: u32, kernel: &str) -> String {
    let mut source = model_prelude(width, height);
    source.push_str(kernel);
    source
}

/// Parse, validate and reflect a complete kernel source.
///
/// `preferred_entry` is used when the module defines a compute entry point
/// by that name; otherwise the module must define exactly one.
pub fn reflect(source: &str, preferred_entry: &str) -> Result<KernelLayout> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| EngineError::kernel(with_prelude_note(e.emit_to_string(source))))?;

    Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|e| EngineError::kernel(with_prelude_note(e.emit_to_string(source))))?;

    let entry = select_entry_point(&module, preferred_entry)?;
    let entry_point = entry.name.clone();
    let workgroup_size = entry.workgroup_size;

    let mut bindings = Vec::new();
    let mut coefficients = CoefficientRegistry::default();
    let mut problems = Vec::new();

    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        let label = var.name.clone().unwrap_or_else(|| format!("binding {}", binding.binding));

        if binding.group != 0 {
            problems.push(format!(
                "{label}: bind group {} is not supported, kernels use @group(0) only",
                binding.group
            ));
            continue;
        }

        let kind = match var.space {
            AddressSpace::Uniform => BindingKind::Uniform,
            AddressSpace::Storage { access } => BindingKind::Storage {
                read_only: !access.contains(StorageAccess::STORE),
            },
            other => {
                problems.push(format!("{label}: unsupported address space {other:?}"));
                continue;
            }
        };

        let slot = binding.binding;
        match FixedSlot::from_slot(slot) {
            Some(fixed) => {
                if let Err(msg) = check_fixed_slot(fixed, kind) {
                    problems.push(format!("{label} (@binding({slot}), {}): {msg}", fixed.name()));
                }
            }
            None => {
                let is_f32 = matches!(
                    module.types[var.ty].inner,
                    TypeInner::Scalar(naga::Scalar {
                        kind: ScalarKind::Float,
                        width: 4,
                    })
                );
                if kind != BindingKind::Uniform || !is_f32 {
                    problems.push(format!(
                        "{label} (@binding({slot})): coefficient slots must be declared \
                         as `var<uniform> name: f32`"
                    ));
                } else if let Some(name) = &var.name {
                    coefficients.insert(name.clone(), slot);
                }
            }
        }

        bindings.push(KernelBinding {
            slot,
            name: var.name.clone(),
            kind,
        });
    }

    if !problems.is_empty() {
        return Err(EngineError::kernel(problems.join("\n")));
    }

    bindings.sort_by_key(|b| b.slot);

    Ok(KernelLayout {
        entry_point,
        workgroup_size,
        bindings,
        coefficients,
    })
}

fn check_fixed_slot(slot: FixedSlot, kind: BindingKind) -> std::result::Result<(), &'static str> {
    match (slot.requirement(), kind) {
        (SlotRequirement::Uniform, BindingKind::Uniform) => Ok(()),
        (SlotRequirement::Uniform, _) => Err("must be declared var<uniform>"),
        (SlotRequirement::Storage, BindingKind::Storage { .. }) => Ok(()),
        (SlotRequirement::WritableStorage, BindingKind::Storage { read_only: false }) => Ok(()),
        (SlotRequirement::Storage, _) => Err("must be declared var<storage>"),
        (SlotRequirement::WritableStorage, _) => Err("must be declared var<storage, read_write>"),
    }
}

fn select_entry_point<'a>(
    module: &'a naga::Module,
    preferred: &str,
) -> Result<&'a naga::EntryPoint> {
    let compute: Vec<_> = module
        .entry_points
        .iter()
        .filter(|ep| ep.stage == ShaderStage::Compute)
        .collect();

    if let Some(ep) = compute.iter().find(|ep| ep.name == preferred) {
        return Ok(*ep);
    }
    match compute.as_slice() {
        [only] => Ok(*only),
        [] => Err(EngineError::kernel("kernel defines no @compute entry point")),
        many => Err(EngineError::kernel(format!(
            "entry point `{preferred}` not found; kernel defines {}",
            many.iter()
                .map(|ep| ep.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

fn with_prelude_note(diagnostics: String) -> String {
    format!(
        "{diagnostics}\nnote: line numbers include the {PRELUDE_LINES}-line model prelude"
    )
}

/// Default two-region membrane kernel.
///
/// Region 2 uses `lambda_two`/`mu_two`; every other positive id uses
/// `lambda_one`/`mu_one`. Cells with id 0 and cells on the outer ring of the
/// grid are held at zero. Listener cells add their value to the output
/// atomically, so any number of them can be active.
pub const DEFAULT_MEMBRANE_KERNEL: &str = r#"
@group(0) @binding(0) var<storage, read> region_ids: array<i32>;
@group(0) @binding(1) var<storage, read_write> generations: array<f32>;
@group(0) @binding(2) var<storage, read> boundary_gain: array<f32>;
@group(0) @binding(3) var<uniform> rotation_index: u32;
@group(0) @binding(4) var<uniform> sample_offset: u32;
@group(0) @binding(5) var<storage, read> excitation: array<f32>;
@group(0) @binding(6) var<storage, read_write> output: array<atomic<u32>>;
@group(0) @binding(7) var<uniform> input_position: u32;
@group(0) @binding(8) var<storage, read> output_mask: array<i32>;

@group(0) @binding(9) var<uniform> mu_one: f32;
@group(0) @binding(10) var<uniform> lambda_one: f32;
@group(0) @binding(11) var<uniform> lambda_two: f32;
@group(0) @binding(12) var<uniform> mu_two: f32;

fn cell(generation: u32, idx: u32) -> f32 {
    return generations[generation * CELL_COUNT + idx];
}

fn accumulate_output(offset: u32, value: f32) {
    var old = atomicLoad(&output[offset]);
    loop {
        let sum = bitcast<u32>(bitcast<f32>(old) + value);
        let result = atomicCompareExchangeWeak(&output[offset], old, sum);
        if (result.exchanged) {
            break;
        }
        old = result.old_value;
    }
}

@compute @workgroup_size(16, 16)
fn fdtd_kernel(@builtin(global_invocation_id) gid: vec3<u32>) {
    let x = gid.x;
    let y = gid.y;
    if (x >= GRID_WIDTH || y >= GRID_HEIGHT) {
        return;
    }

    let idx = y * GRID_WIDTH + x;
    let prev_gen = rotation_index % 3u;
    let cur_gen = (rotation_index + 1u) % 3u;
    let next_gen = (rotation_index + 2u) % 3u;

    let id = region_ids[idx];
    let interior = x > 0u && y > 0u && x + 1u < GRID_WIDTH && y + 1u < GRID_HEIGHT;

    var value = 0.0;
    if (id > 0 && interior) {
        var lambda = lambda_one;
        var mu = mu_one;
        if (id == 2) {
            lambda = lambda_two;
            mu = mu_two;
        }

        let p_curr = cell(cur_gen, idx);
        let p_prev = cell(prev_gen, idx);
        let laplacian = cell(cur_gen, idx - GRID_WIDTH) + cell(cur_gen, idx + GRID_WIDTH)
            + cell(cur_gen, idx - 1u) + cell(cur_gen, idx + 1u) - 4.0 * p_curr;

        value = (2.0 * p_curr - (1.0 - mu) * p_prev + lambda * laplacian) / (1.0 + mu);
        value = value * (1.0 - boundary_gain[idx]);
    }

    if (idx == input_position) {
        value = value + excitation[sample_offset];
    }

    generations[next_gen * CELL_COUNT + idx] = value;

    if (output_mask[idx] != 0) {
        accumulate_output(sample_offset, value);
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn reflect_default() -> KernelLayout {
        reflect(&assemble_source(8, 6, DEFAULT_MEMBRANE_KERNEL), "fdtd_kernel").unwrap()
    }

    #[test]
    fn test_prelude() {
        let prelude = model_prelude(4, 3);
        assert!(prelude.contains("const GRID_WIDTH: u32 = 4u;"));
        assert!(prelude.contains("const GRID_HEIGHT: u32 = 3u;"));
        assert!(prelude.contains("const CELL_COUNT: u32 = 12u;"));
        assert_eq!(prelude.lines().count(), PRELUDE_LINES);
    }

    #[test]
    fn test_default_kernel_reflects() {
        let layout = reflect_default();
        assert_eq!(layout.entry_point, "fdtd_kernel");
        assert_eq!(layout.workgroup_size, [16, 16, 1]);
        assert_eq!(layout.bindings.len(), 13);

        for fixed in FixedSlot::ALL {
            assert!(layout.declares(fixed.slot()), "{} not declared", fixed.name());
        }
    }

    #[test]
    fn test_coefficient_registry() {
        let layout = reflect_default();
        let coeffs = &layout.coefficients;
        assert_eq!(coeffs.len(), 4);
        assert_eq!(coeffs.slot("mu_one"), Some(9));
        assert_eq!(coeffs.slot("lambda_one"), Some(10));
        assert_eq!(coeffs.slot("lambda_two"), Some(11));
        assert_eq!(coeffs.slot("mu_two"), Some(12));
        assert_eq!(coeffs.name(11), Some("lambda_two"));
        assert!(coeffs.slot("stiffness").is_none());
        assert!(!coeffs.contains_slot(3));
    }

    #[test]
    fn test_binding_kinds() {
        let layout = reflect_default();
        let kind = |slot: u32| {
            layout
                .bindings
                .iter()
                .find(|b| b.slot == slot)
                .map(|b| b.kind)
                .unwrap()
        };
        assert_eq!(kind(0), BindingKind::Storage { read_only: true });
        assert_eq!(kind(1), BindingKind::Storage { read_only: false });
        assert_eq!(kind(3), BindingKind::Uniform);
        assert_eq!(kind(6), BindingKind::Storage { read_only: false });
        assert_eq!(kind(12), BindingKind::Uniform);
    }

    #[test]
    fn test_dispatch_size() {
        let layout = reflect_default();
        assert_eq!(layout.dispatch_size(16, 16), (1, 1));
        assert_eq!(layout.dispatch_size(17, 33), (2, 3));
        assert_eq!(layout.dispatch_size(4, 4), (1, 1));
    }

    #[test]
    fn test_syntax_error_has_diagnostics() {
        let source = assemble_source(4, 4, "@compute @workgroup_size(1) fn main( { }");
        let err = reflect(&source, "main").unwrap_err();
        match err {
            EngineError::KernelBuild { diagnostics } => {
                assert!(!diagnostics.is_empty());
                assert!(diagnostics.contains("prelude"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_entry_point_fallback() {
        let kernel = r#"
@group(0) @binding(1) var<storage, read_write> generations: array<f32>;
@compute @workgroup_size(8, 8)
fn update(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < CELL_COUNT) {
        generations[gid.x] = 0.0;
    }
}
"#;
        let layout = reflect(&assemble_source(4, 4, kernel), "fdtd_kernel").unwrap();
        assert_eq!(layout.entry_point, "update");
        assert_eq!(layout.workgroup_size, [8, 8, 1]);
        assert!(layout.coefficients.is_empty());
        assert!(!layout.declares(0));
    }

    #[test]
    fn test_read_only_generations_rejected() {
        let kernel = r#"
@group(0) @binding(1) var<storage, read> generations: array<f32>;
@group(0) @binding(6) var<storage, read_write> output: array<f32>;
@compute @workgroup_size(1)
fn fdtd_kernel() {
    output[0] = generations[0];
}
"#;
        let err = reflect(&assemble_source(2, 2, kernel), "fdtd_kernel").unwrap_err();
        assert!(matches!(err, EngineError::KernelBuild { ref diagnostics }
            if diagnostics.contains("generations")));
    }

    #[test]
    fn test_non_scalar_coefficient_rejected() {
        let kernel = r#"
@group(0) @binding(6) var<storage, read_write> output: array<f32>;
@group(0) @binding(9) var<uniform> gains: vec4<f32>;
@compute @workgroup_size(1)
fn fdtd_kernel() {
    output[0] = gains.x;
}
"#;
        let err = reflect(&assemble_source(2, 2, kernel), "fdtd_kernel").unwrap_err();
        assert!(matches!(err, EngineError::KernelBuild { ref diagnostics }
            if diagnostics.contains("coefficient")));
    }

    #[test]
    fn test_fixed_slot_table() {
        assert_eq!(FixedSlot::from_slot(0), Some(FixedSlot::RegionIds));
        assert_eq!(FixedSlot::from_slot(8), Some(FixedSlot::OutputMask));
        assert_eq!(FixedSlot::from_slot(9), None);
        assert_eq!(FixedSlot::Excitation.slot(), 5);
        assert_eq!(FixedSlot::InputPosition.requirement(), SlotRequirement::Uniform);
    }
}
