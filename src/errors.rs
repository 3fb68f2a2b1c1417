use thiserror::Error;

/// All the failure kinds the core distinguishes.
///
/// Parsers themselves never abort on bad input: malformed or unsupported
/// lines are logged at warn level and skipped, per the policy of the
/// original Gerber/Excellon tool chain. `CamError` is returned from the
/// fallible surfaces only: file I/O, job generation with an unusable
/// configuration, and deserialization.
#[derive(Error, Debug)]
pub enum CamError {
    /// Input that cannot be interpreted (bad line, malformed record).
    #[error("malformed input: {0}")]
    InputMalformed(String),

    /// A stroke or flash references an aperture that was never defined.
    #[error("unknown aperture: {0}")]
    UnknownAperture(String),

    /// A drill references a tool that was never defined.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Grammar-recognized feature with no implementation (e.g. G74 arcs).
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// An internal invariant did not hold (e.g. region with <3 points).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Geometry that had to be repaired or could not be built.
    #[error("degenerate geometry: {0}")]
    GeometryDegenerate(String),

    #[error("I/O failure")]
    Io(#[from] std::io::Error),

    /// Caller asked for something unsatisfiable (e.g. empty tool selection).
    #[error("{0}")]
    Usage(String),
}
