// Our Real scalar type. All planar coordinates, diameters and feed rates
// are carried as `Real` so the precision can be changed in one place.
pub type Real = f64;

/// A small epsilon for geometric comparisons.
pub const EPSILON: Real = 1e-9;

// Pi
/// Archimedes' constant (π)
pub const PI: Real = core::f64::consts::PI;

/// The full circle constant (τ)
pub const TAU: Real = core::f64::consts::TAU;

// ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
// Unit conversion
// ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
pub const INCH_MM: Real = 25.4;

/// Segments used to approximate a full circle when materializing disks,
/// stroke caps and joins. Arc interpolation uses the per-object
/// `steps_per_circle` instead.
pub const DEFAULT_CIRCLE_STEPS: usize = 128;
