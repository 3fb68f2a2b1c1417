//! 2D post-processing for PCB manufacturing.
//!
//! Fabrication sources are parsed into exact planar geometry, transformed,
//! and turned into machine tool paths:
//!
//! - **gerber**: RS-274X parser producing the net dark copper region as a
//!   boolean composition of strokes, flashes, regions and aperture-macro
//!   instantiations.
//! - **excellon**: NC drill parser producing a tool table and located,
//!   tool-tagged drill points.
//! - **geometry**: planar kernel over [`geo`]: buffering, offsetting,
//!   boolean algebra, affine transforms, arc interpolation.
//! - **cncjob**: G-code generation from drill lists or arbitrary planar
//!   geometry, and parsing of G-code back into annotated segments.
//! - **serialize**: JSON records with WKT geometry envelopes.
//!
//! The core is single-threaded and synchronous; parsers own and mutate only
//! their own object. Logging goes through the [`log`] facade and no logger
//! is ever installed here.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod cncjob;
pub mod errors;
pub mod excellon;
pub mod float_types;
pub mod geometry;
pub mod gerber;
pub mod serialize;

#[cfg(test)]
mod tests;
