//! Extended Gerber (RS-274X) parser.
//!
//! A single pass over the source lines drives a state machine: strokes,
//! flashes and regions accumulate into a polygon buffer which is folded
//! into `solid_geometry` whenever the layer polarity changes (and once at
//! end of input), by union for dark layers and difference for clear ones.
//! Deprecated forms (`G54` tool change, coordinate lines without an
//! operation code, `G70/G71`, `G90/G91`) fall through the same machine.
//! No input aborts the parse: unusable lines are logged and skipped.

pub mod aperture;
pub mod macros;

pub use aperture::Aperture;
pub use macros::ApertureMacro;

use crate::errors::CamError;
use crate::float_types::{Real, DEFAULT_CIRCLE_STEPS};
use crate::geometry::{
    arc, collection_from_multipolygon, normalize_polygon, to_multipolygon, union_all,
    ArcDirection, CamObject, CapStyle, Units,
};
use crate::geometry::shapes;
use aperture::create_flash_geometry;
use geo::{coord, orient::Direction, BooleanOps, Coord, GeometryCollection, LineString,
    MultiPolygon, Orient, Polygon};
use hashbrown::HashMap;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

// %FSLAX24Y24*% - coordinate format. The X and Y formats must agree.
static FMT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%FS([LT])([AI])X(\d)(\d)Y\d\d\*%$").unwrap());

// %MOIN*% / %MOMM*% - units.
static MODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^%MO(IN|MM)\*%$").unwrap());

// G04 (or G4) comment.
static COMM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^G0?4(.*)$").unwrap());

// %ADD<id><type>[,<modifiers>]*% - aperture definition.
static AD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^%ADD(\d\d+)([a-zA-Z0-9]*)(?:,(.*))?\*%$").unwrap());

// %AM<name>* - start of an aperture macro (ends at a line closing with %).
static AM_START_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^%AM([^*]+)\*(.*)$").unwrap());

// G74 (single) / G75 (multi) quadrant mode.
static QUAD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^G7([45])\*$").unwrap());

// G36 / G37 - region mode on/off.
static REGION_ON_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^G36\*$").unwrap());
static REGION_OFF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^G37\*$").unwrap());

// M02 - end of file.
static EOF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^M02\*").unwrap());

// %IPPOS*% / %IPNEG*% - image polarity. Parsed, ignored.
static IPOL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^%IP(POS|NEG)\*%$").unwrap());

// %LPD*% / %LPC*% - level polarity.
static LPOL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^%LP([DC])\*%$").unwrap());

// G70/G71 - deprecated units.
static UNITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^G7([01])\*$").unwrap());

// G90/G91 - deprecated absolute/incremental. Parsed, ignored.
static ABSREL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^G9([01])\*$").unwrap());

/// Whether subsequent geometry adds to or clears the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Dark,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuadrantMode {
    Single,
    Multi,
}

/// Decode a Gerber coordinate token under the declared format: the literal
/// integer divided by `10^frac_digits`.
pub fn parse_gerber_number(token: &str, frac_digits: u8) -> Result<Real, CamError> {
    let value: i64 = token
        .parse()
        .map_err(|_| CamError::InputMalformed(format!("bad coordinate token {token:?}")))?;
    Ok(decode_coordinate(value, frac_digits))
}

fn decode_coordinate(value: i64, frac_digits: u8) -> Real {
    value as Real / (10f64).powi(frac_digits as i32)
}

/// Word-level scan of a coordinate/operation line such as
/// `G01X-300Y200D01*`. Returns `None` when the line is not made of
/// `G/X/Y/I/J/D` words, leaving it to the other patterns.
#[derive(Debug, Default)]
struct CoordLine {
    g: Option<i64>,
    x: Option<i64>,
    y: Option<i64>,
    i: Option<i64>,
    j: Option<i64>,
    op: Option<i64>,
    aperture: Option<String>,
}

fn scan_coordinate_line(line: &str) -> Option<CoordLine> {
    let body = line.strip_suffix('*')?;
    if body.is_empty() {
        return None;
    }

    let mut words = CoordLine::default();
    let mut chars = body.chars().peekable();
    while let Some(letter) = chars.next() {
        let mut digits = String::new();
        while let Some(&d) = chars.peek() {
            if d == '-' || d == '+' || d.is_ascii_digit() {
                digits.push(d);
                chars.next();
            } else {
                break;
            }
        }
        let value: i64 = digits.parse().ok()?;
        match letter {
            'G' => match value {
                1..=3 => words.g = Some(value),
                // Deprecated G54 prefix on a tool change.
                54 => {}
                _ => return None,
            },
            'X' => words.x = Some(value),
            'Y' => words.y = Some(value),
            'I' => words.i = Some(value),
            'J' => words.j = Some(value),
            'D' => {
                if (1..=3).contains(&value) {
                    words.op = Some(value);
                } else if value >= 10 && digits.len() >= 2 {
                    words.aperture = Some(value.to_string());
                } else {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(words)
}

/// A parsed Gerber layer: the aperture tables and the net dark region.
///
/// ```no_run
/// use pcbcam::gerber::Gerber;
///
/// let mut gerber = Gerber::new();
/// gerber.parse_file("top_copper.gbr")?;
/// let copper = &gerber.solid_geometry;
/// # Ok::<(), pcbcam::errors::CamError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Gerber {
    pub units: Units,
    /// Integer digits of the coordinate format.
    pub int_digits: u8,
    /// Fractional digits of the coordinate format.
    pub frac_digits: u8,
    /// Aperture table, keyed by canonical (zero-stripped) id.
    pub apertures: HashMap<String, Aperture>,
    /// Macro dictionary referenced by `Aperture::Macro` entries, by name.
    pub aperture_macros: HashMap<String, ApertureMacro>,
    /// The net dark region after all polarity operations.
    pub solid_geometry: GeometryCollection<Real>,
    /// Segments per full circle when interpolating arcs.
    pub steps_per_circle: usize,
}

impl Gerber {
    pub fn new() -> Self {
        Gerber {
            units: Units::In,
            int_digits: 3,
            frac_digits: 4,
            apertures: HashMap::new(),
            aperture_macros: HashMap::new(),
            solid_geometry: GeometryCollection::default(),
            steps_per_circle: 40,
        }
    }

    /// Read and parse a Gerber file.
    pub fn parse_file(&mut self, path: impl AsRef<Path>) -> Result<(), CamError> {
        let source = std::fs::read_to_string(path)?;
        self.parse_lines(source.lines());
        Ok(())
    }

    /// Parse Gerber source given line by line. This is the main parser.
    pub fn parse_lines<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        // Coordinates of the current path.
        let mut path: Vec<Coord<Real>> = Vec::new();

        // Shapes are collected here until a polarity change, then combined
        // into solid_geometry in one boolean operation. Far cheaper than a
        // union per shape.
        let mut poly_buffer: Vec<MultiPolygon<Real>> = Vec::new();

        let mut last_path_aperture: Option<String> = None;
        let mut current_aperture: Option<String> = None;

        // 1, 2 or 3, from G01/G02/G03.
        let mut current_interpolation: Option<i64> = None;

        // 1, 2 or 3, from D01/D02/D03. Kept across lines to support
        // deprecated sources that omit the operation code.
        let mut current_operation: Option<i64> = None;

        let mut current_x: Real = 0.0;
        let mut current_y: Real = 0.0;

        // Absolute (G90) vs incremental (G91). Incremental is not
        // implemented; the flag is parsed and ignored.
        let mut _absolute = true;

        let mut quadrant_mode: Option<QuadrantMode> = None;
        let mut current_macro: Option<String> = None;
        let mut current_polarity = Polarity::Dark;
        let mut making_region = false;

        for (idx, raw_line) in lines.into_iter().enumerate() {
            let line_num = idx + 1;
            let gline = raw_line.trim_matches([' ', '\r', '\n']);

            // Aperture macros come first: their bodies can contain
            // statements any other pattern would misread.
            if let Some(name) = &current_macro {
                let am = self.aperture_macros.get_mut(name).expect("open macro");
                if let Some(body) = gline.strip_suffix('%') {
                    am.append(body);
                    current_macro = None;
                } else {
                    am.append(gline);
                }
                continue;
            }
            if let Some(caps) = AM_START_RE.captures(gline) {
                let name = caps[1].to_string();
                let mut am = ApertureMacro::new(name.clone());
                let rest = &caps[2];
                if let Some(body) = rest.strip_suffix('%') {
                    // Whole macro on one line.
                    am.append(body);
                } else {
                    am.append(rest);
                    current_macro = Some(name.clone());
                }
                self.aperture_macros.insert(name, am);
                continue;
            }

            // Coordinate and operation words.
            if let Some(words) = scan_coordinate_line(gline) {
                // Standalone interpolation mode change, e.g. `G01*`.
                if words.x.is_none()
                    && words.y.is_none()
                    && words.i.is_none()
                    && words.j.is_none()
                    && words.op.is_none()
                    && words.aperture.is_none()
                {
                    if let Some(g) = words.g {
                        current_interpolation = Some(g);
                    }
                    continue;
                }

                // Tool change, e.g. `D12*` or `G54D12*`.
                if let Some(ap) = words.aperture {
                    if words.x.is_none()
                        && words.y.is_none()
                        && words.i.is_none()
                        && words.j.is_none()
                        && words.op.is_none()
                    {
                        current_aperture = Some(ap);
                    } else {
                        log::warn!("line ignored ({line_num}): {gline}");
                    }
                    continue;
                }

                let is_arc = words.i.is_some()
                    || words.j.is_some()
                    || matches!(words.g, Some(2) | Some(3));

                if is_arc {
                    // G02/G03 - circular interpolation.
                    let x = words
                        .x
                        .map(|v| decode_coordinate(v, self.frac_digits))
                        .unwrap_or(current_x);
                    let y = words
                        .y
                        .map(|v| decode_coordinate(v, self.frac_digits))
                        .unwrap_or(current_y);
                    let i = words
                        .i
                        .map(|v| decode_coordinate(v, self.frac_digits))
                        .unwrap_or(0.0);
                    let j = words
                        .j
                        .map(|v| decode_coordinate(v, self.frac_digits))
                        .unwrap_or(0.0);

                    let Some(quadrant) = quadrant_mode else {
                        log::warn!(
                            "arc without preceding quadrant specification G74 or G75 ({line_num}): {gline}"
                        );
                        continue;
                    };

                    if words.g.is_none() && !matches!(current_interpolation, Some(2) | Some(3)) {
                        log::warn!(
                            "arc without circular interpolation mode ({line_num}): {gline}"
                        );
                        continue;
                    }
                    if let Some(g) = words.g {
                        current_interpolation = Some(g);
                    }
                    if let Some(op) = words.op {
                        current_operation = Some(op);
                    }

                    if current_operation == Some(2) {
                        // Pen up: nothing drawn by the arc itself.
                        log::warn!("arc with D02 ({line_num})");
                        if path.len() > 1 {
                            if let Some(stroke) = self.buffered_path(
                                &path,
                                last_path_aperture.as_deref(),
                                line_num,
                            ) {
                                poly_buffer.push(stroke);
                            }
                        }
                        current_x = x;
                        current_y = y;
                        path = vec![coord! { x: current_x, y: current_y }];
                        continue;
                    }
                    if current_operation == Some(3) {
                        log::warn!("flash within an arc ({line_num})");
                        continue;
                    }

                    match quadrant {
                        QuadrantMode::Multi => {
                            let center = coord! { x: current_x + i, y: current_y + j };
                            let radius = (i * i + j * j).sqrt();
                            let start = (-j).atan2(-i);
                            let stop = (y - center.y).atan2(x - center.x);
                            let direction = if current_interpolation == Some(2) {
                                ArcDirection::Cw
                            } else {
                                ArcDirection::Ccw
                            };
                            let points =
                                arc(center, radius, start, stop, direction, self.steps_per_circle);
                            if let Some(&last) = points.last() {
                                current_x = last.x;
                                current_y = last.y;
                            }
                            path.extend(points);
                            last_path_aperture = current_aperture.clone();
                        }
                        QuadrantMode::Single => {
                            log::warn!(
                                "single quadrant arcs are not implemented ({line_num}): {gline}"
                            );
                        }
                    }
                    continue;
                }

                // Linear interpolation, flashes, or a lone operation code.
                if let Some(v) = words.x {
                    current_x = decode_coordinate(v, self.frac_digits);
                }
                if let Some(v) = words.y {
                    current_y = decode_coordinate(v, self.frac_digits);
                }
                if let Some(op) = words.op {
                    current_operation = Some(op);
                }

                let has_coords = words.x.is_some() || words.y.is_some();

                match current_operation {
                    // Pen down: extend the path.
                    Some(1) if has_coords => {
                        path.push(coord! { x: current_x, y: current_y });
                        last_path_aperture = current_aperture.clone();
                    }
                    // Pen up: flush whatever was accumulated.
                    Some(2) if has_coords => {
                        if path.len() > 1 {
                            if making_region {
                                let region =
                                    Polygon::new(LineString::new(path.clone()), vec![]);
                                poly_buffer.push(MultiPolygon(vec![region]));
                            } else if let Some(stroke) = self.buffered_path(
                                &path,
                                last_path_aperture.as_deref(),
                                line_num,
                            ) {
                                poly_buffer.push(stroke);
                            }
                        }
                        path = vec![coord! { x: current_x, y: current_y }];
                    }
                    // Flash.
                    Some(3) => {
                        let location = if has_coords {
                            coord! { x: current_x, y: current_y }
                        } else {
                            *path
                                .last()
                                .unwrap_or(&coord! { x: current_x, y: current_y })
                        };
                        match current_aperture
                            .as_ref()
                            .and_then(|id| self.apertures.get(id))
                        {
                            Some(ap) => {
                                if let Some(flash) =
                                    create_flash_geometry(location, ap, &self.aperture_macros)
                                {
                                    poly_buffer.push(flash);
                                }
                            }
                            None => log::warn!(
                                "flash with unknown aperture {:?} ({line_num})",
                                current_aperture
                            ),
                        }
                    }
                    _ => {}
                }
                continue;
            }

            // G74/G75 - quadrant mode.
            if let Some(caps) = QUAD_RE.captures(gline) {
                quadrant_mode = Some(if &caps[1] == "4" {
                    QuadrantMode::Single
                } else {
                    QuadrantMode::Multi
                });
                continue;
            }

            // G36 - region mode on. Closes any open stroke first.
            if REGION_ON_RE.is_match(gline) {
                if path.len() > 1 {
                    if let Some(stroke) =
                        self.buffered_path(&path, last_path_aperture.as_deref(), line_num)
                    {
                        poly_buffer.push(stroke);
                    }
                    path = vec![*path.last().expect("non-empty path")];
                }
                making_region = true;
                continue;
            }

            // G37 - region mode off: close the region polygon.
            if REGION_OFF_RE.is_match(gline) {
                making_region = false;
                // A D02 may already have closed the contour; fewer than 3
                // points is not an error, there is just nothing to close.
                if path.len() < 3 {
                    continue;
                }
                let region = Polygon::new(LineString::new(path.clone()), vec![]);
                poly_buffer.push(normalize_polygon(region));
                path = vec![coord! { x: current_x, y: current_y }];
                continue;
            }

            // %ADD - aperture definition.
            if let Some(caps) = AD_RE.captures(gline) {
                self.aperture_parse(&caps[1], &caps[2], caps.get(3).map(|m| m.as_str()));
                continue;
            }

            // %LPD*% / %LPC*% - level polarity change flushes the buffer.
            if let Some(caps) = LPOL_RE.captures(gline) {
                let new_polarity = if &caps[1] == "D" {
                    Polarity::Dark
                } else {
                    Polarity::Clear
                };
                if path.len() > 1 && current_polarity != new_polarity {
                    if let Some(stroke) =
                        self.buffered_path(&path, last_path_aperture.as_deref(), line_num)
                    {
                        poly_buffer.push(stroke);
                    }
                    path = vec![*path.last().expect("non-empty path")];
                }
                self.apply_poly_buffer(&mut poly_buffer, current_polarity);
                current_polarity = new_polarity;
                continue;
            }

            // %FS - coordinate format.
            if let Some(caps) = FMT_RE.captures(gline) {
                self.int_digits = caps[3].parse().unwrap_or(self.int_digits);
                self.frac_digits = caps[4].parse().unwrap_or(self.frac_digits);
                continue;
            }

            // %MO - units.
            if let Some(caps) = MODE_RE.captures(gline) {
                self.units = if &caps[1] == "IN" { Units::In } else { Units::Mm };
                continue;
            }

            // G70/G71 - deprecated units.
            if let Some(caps) = UNITS_RE.captures(gline) {
                self.units = if &caps[1] == "0" { Units::In } else { Units::Mm };
                continue;
            }

            // G90/G91 - deprecated absolute/incremental.
            if let Some(caps) = ABSREL_RE.captures(gline) {
                _absolute = &caps[1] == "0";
                continue;
            }

            // %IP - image polarity. Parsed, ignored.
            if IPOL_RE.is_match(gline) {
                continue;
            }

            // Comments.
            if COMM_RE.is_match(gline) {
                continue;
            }

            // End of file.
            if EOF_RE.is_match(gline) {
                continue;
            }

            log::warn!("line ignored ({line_num}): {gline}");
        }

        // End of input: close an open stroke and flush the buffer.
        if path.len() > 1 {
            if let Some(stroke) = self.buffered_path(&path, last_path_aperture.as_deref(), 0) {
                poly_buffer.push(stroke);
            }
        }
        self.apply_poly_buffer(&mut poly_buffer, current_polarity);
    }

    /// Register one `%AD` aperture definition.
    fn aperture_parse(&mut self, id: &str, type_str: &str, params: Option<&str>) {
        // Some sources define an aperture with a leading zero and reference
        // it without one: canonicalize through an integer parse.
        let apid = match id.parse::<u64>() {
            Ok(n) => n.to_string(),
            Err(_) => {
                log::warn!("bad aperture id {id:?}");
                return;
            }
        };

        let params: Vec<&str> = params.map(|p| p.split('X').collect()).unwrap_or_default();
        let number = |i: usize| -> Option<Real> { params.get(i)?.trim().parse().ok() };

        let aperture = match type_str {
            // Example: %ADD11C,0.1*%
            "C" => match number(0) {
                Some(size) => Aperture::Circle { size },
                None => {
                    log::warn!("circle aperture {apid} without a size");
                    return;
                }
            },
            // Example: %ADD15R,0.05X0.12*%
            "R" | "O" => match (number(0), number(1)) {
                (Some(width), Some(height)) => {
                    if type_str == "R" {
                        Aperture::Rectangle { width, height }
                    } else {
                        Aperture::Obround { width, height }
                    }
                }
                _ => {
                    log::warn!("aperture {apid} with missing dimensions");
                    return;
                }
            },
            "P" => match (number(0), number(1)) {
                (Some(diam), Some(n)) => Aperture::Polygon {
                    diam,
                    n_vertices: n as usize,
                    rotation: number(2),
                },
                _ => {
                    log::warn!("polygon aperture {apid} with missing parameters");
                    return;
                }
            },
            name if self.aperture_macros.contains_key(name) => Aperture::Macro {
                name: name.to_string(),
                modifiers: params.iter().map(|p| p.to_string()).collect(),
            },
            other => {
                log::warn!("aperture not implemented: {other:?}");
                return;
            }
        };

        self.apertures.insert(apid, aperture);
    }

    /// Thicken a pen path by its aperture. `None` (with a warning) when the
    /// aperture is unknown or cannot stroke.
    fn buffered_path(
        &self,
        path: &[Coord<Real>],
        aperture_id: Option<&str>,
        line_num: usize,
    ) -> Option<MultiPolygon<Real>> {
        let Some(id) = aperture_id else {
            log::warn!("no aperture defined for current path ({line_num})");
            return None;
        };
        let Some(ap) = self.apertures.get(id) else {
            log::warn!("stroke with unknown aperture {id:?} ({line_num})");
            return None;
        };
        let Some(width) = ap.stroke_width() else {
            log::warn!(
                "stroke with non-circular aperture {id:?} has no width ({line_num})"
            );
            return None;
        };
        Some(shapes::stroke(
            &LineString::new(path.to_vec()),
            width / 2.0,
            CapStyle::Round,
            DEFAULT_CIRCLE_STEPS,
        ))
    }

    /// Fold the polygon buffer into `solid_geometry` under `polarity`.
    fn apply_poly_buffer(&mut self, buffer: &mut Vec<MultiPolygon<Real>>, polarity: Polarity) {
        if buffer.is_empty() {
            return;
        }
        let merged = union_all(buffer.drain(..));
        let current = to_multipolygon(&self.solid_geometry);
        let combined = match polarity {
            Polarity::Dark => current.union(&merged),
            Polarity::Clear => current.difference(&merged),
        };
        self.solid_geometry = collection_from_multipolygon(combined.orient(Direction::Default));
    }

    /// The image is composed incrementally while parsing; there are no
    /// tables left to re-derive from.
    pub fn create_geometry(&mut self) {}
}

impl Default for Gerber {
    fn default() -> Self {
        Self::new()
    }
}

impl CamObject for Gerber {
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
}
