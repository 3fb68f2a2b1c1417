//! Excellon NC drill parser.
//!
//! The header (`M48` … `M95`/`%`) declares units, zero suppression and the
//! tool table; the body selects tools and emits drill hits. Coordinates
//! come in two flavors: with an explicit decimal point (taken literally)
//! and without one (decoded per the zero-suppression mode). Stop and mode
//! codes are tolerated and unused.

use crate::errors::CamError;
use crate::float_types::{Real, DEFAULT_CIRCLE_STEPS};
use crate::geometry::{scaled, shapes, translated, Axis, CamObject, Units};
use geo::{coord, Geometry, GeometryCollection, Point};
use hashbrown::HashMap;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

// M48 - beginning of the part program header.
static HBEGIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^M48$").unwrap());

// M95 or % - end of the part program header.
static HEND_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:M95|%)$").unwrap());

// INCH,LZ / METRIC,TZ etc - units and zero suppression.
static UNITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(INCH|METRIC)(?:,([TL])Z)?$").unwrap());

// T1C0.04F200S65 - tool definition inside the header.
static TOOLDEF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^T(\d+)").unwrap());
static TOOLDIA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"C(\d*\.?\d*)").unwrap());

// T1 - tool selection in the body.
static TOOLSEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^T(\d+)").unwrap());

// Coordinate words.
static XWORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"X([-+]?[0-9.]+)").unwrap());
static YWORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Y([-+]?[0-9.]+)").unwrap());

// FMAT, G9x, G0x, M7x, and the various stop/pause codes. All tolerated.
static FMAT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^FMAT,([12])$").unwrap());
static ABSINC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^G9([01])$").unwrap());
static MODES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^G0([012345])").unwrap());
static MEAS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^M7([12])$").unwrap());
static STOP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:G04|M09|M06|M00|M30)").unwrap());

/// Zero suppression mode of coordinate numbers without a decimal point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroSuppression {
    /// Leading zeros kept, trailing omitted (the default).
    L,
    /// Trailing zeros kept, leading omitted.
    T,
}

/// One tool of the drill rack. Feed, speed and the other header fields are
/// tolerated in the input but not retained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tool {
    pub diameter: Real,
}

/// One drill hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Drill {
    pub point: Point<Real>,
    /// Key into the tool table.
    pub tool: String,
}

/// A parsed Excellon drill file.
#[derive(Debug, Clone)]
pub struct Excellon {
    pub units: Units,
    pub zeros: ZeroSuppression,
    /// Tool table, keyed by canonical (zero-stripped) tool number.
    pub tools: HashMap<String, Tool>,
    pub drills: Vec<Drill>,
    /// One disk per drill, the tool diameter wide.
    pub solid_geometry: GeometryCollection<Real>,
}

impl Excellon {
    pub fn new() -> Self {
        Excellon {
            units: Units::In,
            zeros: ZeroSuppression::L,
            tools: HashMap::new(),
            drills: Vec::new(),
            solid_geometry: GeometryCollection::default(),
        }
    }

    /// Read and parse an Excellon file.
    pub fn parse_file(&mut self, path: impl AsRef<Path>) -> Result<(), CamError> {
        let source = std::fs::read_to_string(path)?;
        self.parse_lines(source.lines());
        Ok(())
    }

    /// Parse Excellon source given line by line.
    pub fn parse_lines<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        let mut current_tool = String::new();
        let mut in_header = false;
        let mut current_x: Option<Real> = None;
        let mut current_y: Option<Real> = None;

        for (idx, raw_line) in lines.into_iter().enumerate() {
            let line_num = idx + 1;
            let eline = raw_line.trim_matches([' ', '\r', '\n']);
            if eline.is_empty() {
                continue;
            }

            if HBEGIN_RE.is_match(eline) {
                in_header = true;
                continue;
            }
            // NOTE: % ends the header; in the body it would mean rewind.
            if HEND_RE.is_match(eline) {
                in_header = false;
                continue;
            }

            // Comments.
            if let Some(rest) = eline.strip_prefix(';') {
                log::debug!("excellon comment: {rest}");
                continue;
            }

            if in_header {
                // Tool definition, e.g. T1C0.04.
                if let Some(caps) = TOOLDEF_RE.captures(eline) {
                    let name = match caps[1].parse::<u64>() {
                        Ok(n) => n.to_string(),
                        Err(_) => {
                            log::warn!("bad tool number ({line_num}): {eline}");
                            continue;
                        }
                    };
                    let rest = &eline[caps.get(0).unwrap().end()..];
                    match TOOLDIA_RE
                        .captures(rest)
                        .and_then(|c| c[1].parse::<Real>().ok())
                    {
                        Some(diameter) => {
                            self.tools.insert(name, Tool { diameter });
                        }
                        None => log::warn!("tool {name} defined without a diameter ({line_num})"),
                    }
                    continue;
                }

                // Units and zero suppression, e.g. INCH,LZ.
                if let Some(caps) = UNITS_RE.captures(eline) {
                    self.units = if &caps[1] == "INCH" { Units::In } else { Units::Mm };
                    match caps.get(2).map(|m| m.as_str()) {
                        Some("T") => self.zeros = ZeroSuppression::T,
                        Some("L") => self.zeros = ZeroSuppression::L,
                        _ => {}
                    }
                    continue;
                }

                if FMAT_RE.is_match(eline) {
                    continue;
                }
            } else {
                // Tool selection.
                if let Some(caps) = TOOLSEL_RE.captures(eline) {
                    current_tool = match caps[1].parse::<u64>() {
                        Ok(n) => n.to_string(),
                        Err(_) => {
                            log::warn!("bad tool selection ({line_num}): {eline}");
                            continue;
                        }
                    };
                    continue;
                }

                // Coordinates. With a decimal point the value is literal;
                // without one it is decoded per the zero-suppression mode.
                if eline.contains('X') || eline.contains('Y') {
                    let with_period = eline.contains('.');
                    let decode = |token: &str| -> Option<Real> {
                        if with_period {
                            token.parse().ok()
                        } else {
                            self.parse_number(token)
                        }
                    };
                    if let Some(x) = XWORD_RE.captures(eline).and_then(|c| decode(&c[1])) {
                        current_x = Some(x);
                    }
                    if let Some(y) = YWORD_RE.captures(eline).and_then(|c| decode(&c[1])) {
                        current_y = Some(y);
                    }
                    let (Some(x), Some(y)) = (current_x, current_y) else {
                        log::warn!("missing coordinates ({line_num}): {eline}");
                        continue;
                    };
                    self.drills.push(Drill {
                        point: Point::new(x, y),
                        tool: current_tool.clone(),
                    });
                    continue;
                }
            }

            // Mode and stop codes carry no information we use.
            if ABSINC_RE.is_match(eline)
                || MODES_RE.is_match(eline)
                || MEAS_RE.is_match(eline)
                || STOP_RE.is_match(eline)
            {
                continue;
            }

            log::warn!("line ignored ({line_num}): {eline}");
        }
    }

    /// Decode a coordinate written without a decimal point.
    ///
    /// With leading-zero style (`L`) the first two digits are the integer
    /// part: the literal is divided by `10^(digits - 2)`, which is the same
    /// as padding with trailing zeros to 6 digits and dividing by 10^4.
    /// With trailing-zero style (`T`) the literal is divided by 10^4.
    pub fn parse_number(&self, token: &str) -> Option<Real> {
        let (sign, digits) = match token.strip_prefix('-') {
            Some(rest) => (-1.0, rest),
            None => (1.0, token.strip_prefix('+').unwrap_or(token)),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: Real = digits.parse().ok()?;
        match self.zeros {
            ZeroSuppression::L => {
                let exponent = digits.len() as i32 - 2;
                Some(sign * value / (10f64).powi(exponent))
            }
            ZeroSuppression::T => Some(sign * value / 10_000.0),
        }
    }

    /// Materialize one disk per drill into `solid_geometry`.
    pub fn create_geometry(&mut self) {
        let mut shapes_out = Vec::with_capacity(self.drills.len());
        for drill in &self.drills {
            let Some(tool) = self.tools.get(&drill.tool) else {
                log::warn!("drill references unknown tool {:?}", drill.tool);
                continue;
            };
            shapes_out.push(Geometry::Polygon(shapes::disk(
                drill.point.0,
                tool.diameter / 2.0,
                DEFAULT_CIRCLE_STEPS,
            )));
        }
        self.solid_geometry = GeometryCollection(shapes_out);
    }
}

impl Default for Excellon {
    fn default() -> Self {
        Self::new()
    }
}

impl CamObject for Excellon {
    fn units(&self) -> Units {
        self.units
    }

    fn set_units(&mut self, units: Units) {
        self.units = units;
    }

    fn solid_geometry(&self) -> &GeometryCollection<Real> {
        &self.solid_geometry
    }

    fn set_solid_geometry(&mut self, geometry: GeometryCollection<Real>) {
        self.solid_geometry = geometry;
    }

    /// Scaling edits the drill points and re-derives the disks, so the
    /// transform survives later `create_geometry` calls.
    fn scale(&mut self, factor: Real) {
        for drill in &mut self.drills {
            drill.point = scaled(&drill.point, factor, factor, coord! { x: 0.0, y: 0.0 });
        }
        self.create_geometry();
    }

    fn offset(&mut self, dx: Real, dy: Real) {
        for drill in &mut self.drills {
            drill.point = translated(&drill.point, dx, dy);
        }
        self.create_geometry();
    }

    fn mirror(&mut self, axis: Axis, point: (Real, Real)) {
        let (sx, sy) = match axis {
            Axis::X => (1.0, -1.0),
            Axis::Y => (-1.0, 1.0),
        };
        for drill in &mut self.drills {
            drill.point = scaled(&drill.point, sx, sy, coord! { x: point.0, y: point.1 });
        }
        self.create_geometry();
    }

    /// Tool diameters are lengths too: converting units rescales them along
    /// with the drill positions.
    fn convert_units(&mut self, units: Units) -> Real {
        if units == self.units {
            return 1.0;
        }
        let factor = self.units.factor_to(units);
        self.units = units;
        self.scale(factor);
        for tool in self.tools.values_mut() {
            tool.diameter *= factor;
        }
        self.create_geometry();
        factor
    }
}
