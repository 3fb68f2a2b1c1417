//! CNC job: G-code generation and parsing.
//!
//! The forward path turns a drill list or arbitrary planar geometry into
//! G-code text. The reverse path tokenizes G-code back into motion
//! segments, tagged travel/cut (Z above or below zero) and fast/slow
//! (G00 versus interpolated motion), re-deriving arcs from `I`/`J` words.

use crate::errors::CamError;
use crate::excellon::Excellon;
use crate::float_types::Real;
use crate::geometry::{
    arc, scaled, translated, ArcDirection, CamObject, Units,
};
use geo::{coord, Coord, Geometry, GeometryCollection, LineString, MultiPolygon, Point, Polygon};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

// G20 - inches, G21 - millimeters.
static GCODE_UNITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^G2([01])").unwrap());

/// The letters that start a G-code word.
const WORD_LETTERS: &str = "NMGXYZIJFP";

/// What kind of job this is. Purely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Generic,
    Drill,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobKind::Generic => "generic",
            JobKind::Drill => "drill",
        })
    }
}

impl std::str::FromStr for JobKind {
    type Err = CamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic" => Ok(JobKind::Generic),
            "drill" => Ok(JobKind::Drill),
            other => Err(CamError::InputMalformed(format!("unknown job kind {other:?}"))),
        }
    }
}

/// Travel (tool above the work) or cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Travel,
    Cut,
}

/// Rapid (G00) or feed-limited motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Fast,
    Slow,
}

/// Classification of one parsed motion segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentKind {
    pub motion: Motion,
    pub speed: Speed,
}

impl SegmentKind {
    /// Two-letter code, e.g. `CF` for a fast cut, `TS` for slow travel.
    pub fn code(&self) -> String {
        let motion = match self.motion {
            Motion::Travel => 'T',
            Motion::Cut => 'C',
        };
        let speed = match self.speed {
            Speed::Fast => 'F',
            Speed::Slow => 'S',
        };
        format!("{motion}{speed}")
    }

    pub fn from_code(code: &str) -> Option<SegmentKind> {
        let mut chars = code.chars();
        let motion = match chars.next()? {
            'T' => Motion::Travel,
            'C' => Motion::Cut,
            _ => return None,
        };
        let speed = match chars.next()? {
            'F' => Speed::Fast,
            'S' => Speed::Slow,
            _ => return None,
        };
        Some(SegmentKind { motion, speed })
    }
}

/// One annotated tool path segment recovered from G-code.
#[derive(Debug, Clone, PartialEq)]
pub struct CutSegment {
    pub geom: LineString<Real>,
    pub kind: SegmentKind,
}

/// Work to be done by a CNC machine: the G-code program plus everything
/// needed to display and transform it.
#[derive(Debug, Clone)]
pub struct CncJob {
    pub kind: JobKind,
    pub units: Units,
    /// Cutting depth; negative, below the work surface.
    pub z_cut: Real,
    /// Travel height; positive, above the work surface.
    pub z_move: Real,
    pub feedrate: Real,
    pub tooldia: Real,
    /// Segments per full circle when expanding parsed arcs.
    pub steps_per_circle: usize,
    pub gcode: String,
    /// Bounds of the source geometry, recorded before emission.
    pub input_geometry_bounds: Option<[Real; 4]>,
    pub gcode_parsed: Vec<CutSegment>,
    pub solid_geometry: GeometryCollection<Real>,
}

impl CncJob {
    pub fn new() -> Self {
        CncJob {
            kind: JobKind::Generic,
            units: Units::In,
            z_cut: -0.002,
            z_move: 0.1,
            feedrate: 3.0,
            tooldia: 0.0,
            steps_per_circle: 20,
            gcode: String::new(),
            input_geometry_bounds: None,
            gcode_parsed: Vec::new(),
            solid_geometry: GeometryCollection::default(),
        }
    }

    fn prologue(&self) -> String {
        let mut gcode = String::new();
        gcode.push_str(self.units.gcode_word());
        gcode.push('\n');
        gcode.push_str("G90\n"); // absolute
        gcode.push_str("G94\n"); // feed per minute
        gcode.push_str(&format!("F{:.2}\n", self.feedrate));
        gcode.push_str(&format!("G00 Z{:.4}\n", self.z_move)); // travel height
        gcode.push_str("M03\n"); // spindle on
        gcode.push_str("G04 P1\n"); // dwell
        gcode
    }

    fn epilogue(&self) -> String {
        let mut gcode = String::new();
        gcode.push_str(&format!("G00 Z{:.4}\n", self.z_move)); // stop cutting
        gcode.push_str("G00 X0Y0\n");
        gcode.push_str("M05\n"); // spindle off
        gcode
    }

    /// Drill program from an Excellon object, for the tools named in the
    /// comma-separated `tools` list (or every tool for `"all"`). Drill
    /// order is preserved. Fails when the selection matches no tool.
    pub fn generate_from_excellon_by_tool(
        &mut self,
        exobj: &Excellon,
        tools: &str,
    ) -> Result<(), CamError> {
        log::debug!("creating CNC job from excellon, tools: {tools}");

        let selected: Vec<String> = if tools == "all" {
            exobj.tools.keys().cloned().collect()
        } else {
            tools
                .split(',')
                .map(|t| {
                    let t = t.trim();
                    // Tool tables are keyed by zero-stripped numbers.
                    t.parse::<u64>().map(|n| n.to_string()).unwrap_or_else(|_| t.to_string())
                })
                .filter(|t| exobj.tools.contains_key(t))
                .collect()
        };
        if selected.is_empty() {
            return Err(CamError::Usage(format!(
                "no usable tools in selection {tools:?}"
            )));
        }

        let points: Vec<Point<Real>> = exobj
            .drills
            .iter()
            .filter(|d| selected.contains(&d.tool))
            .map(|d| d.point)
            .collect();
        log::debug!("found {} drills", points.len());

        self.kind = JobKind::Drill;
        let mut gcode = self.prologue();
        for point in points {
            gcode.push_str(&format!("G00 X{:.4}Y{:.4}\n", point.x(), point.y()));
            gcode.push_str(&format!("G01 Z{:.4}\n", self.z_cut));
            gcode.push_str(&format!("G01 Z{:.4}\n", self.z_move));
        }
        gcode.push_str("G00 X0Y0\n");
        gcode.push_str("M05\n"); // spindle off
        self.gcode = gcode;
        Ok(())
    }

    /// Routing program along every shape of a geometry object. Shapes are
    /// optionally simplified to within `tolerance` first.
    pub fn generate_from_geometry<T: CamObject>(
        &mut self,
        source: &T,
        tooldia: Option<Real>,
        tolerance: Real,
    ) {
        if let Some(dia) = tooldia {
            self.tooldia = dia;
        }
        self.input_geometry_bounds = Some(source.bounds());

        let mut gcode = self.prologue();
        for geo in source.solid_geometry().iter() {
            match geo {
                Geometry::Polygon(poly) => gcode.push_str(&self.polygon2gcode(poly, tolerance)),
                Geometry::MultiPolygon(mp) => {
                    for poly in &mp.0 {
                        gcode.push_str(&self.polygon2gcode(poly, tolerance));
                    }
                }
                Geometry::LineString(line) => {
                    gcode.push_str(&self.linear2gcode(line, tolerance))
                }
                Geometry::Point(point) => gcode.push_str(&self.point2gcode(point)),
                other => log::warn!("G-code generation not implemented for {other:?}"),
            }
        }
        gcode.push_str(&self.epilogue());
        self.gcode = gcode;
    }

    /// Cut along the exterior and every interior ring of a polygon.
    fn polygon2gcode(&self, polygon: &Polygon<Real>, tolerance: Real) -> String {
        let target = if tolerance > 0.0 {
            use geo::Simplify;
            polygon.simplify(&tolerance)
        } else {
            polygon.clone()
        };

        let mut gcode = self.ring2gcode(&target.exterior().0);
        for interior in target.interiors() {
            gcode.push_str(&self.ring2gcode(&interior.0));
        }
        gcode
    }

    /// Cut along a linear feature.
    fn linear2gcode(&self, linear: &LineString<Real>, tolerance: Real) -> String {
        let target = if tolerance > 0.0 {
            use geo::Simplify;
            linear.simplify(&tolerance)
        } else {
            linear.clone()
        };
        self.ring2gcode(&target.0)
    }

    /// Rapid to the point, plunge, retract. No lateral cut.
    fn point2gcode(&self, point: &Point<Real>) -> String {
        let mut gcode = String::new();
        gcode.push_str(&format!("G00 X{:.4}Y{:.4}\n", point.x(), point.y()));
        gcode.push_str(&format!("G01 Z{:.4}\n", self.z_cut));
        gcode.push_str(&format!("G00 Z{:.4}\n", self.z_move));
        gcode
    }

    fn ring2gcode(&self, path: &[Coord<Real>]) -> String {
        let mut gcode = String::new();
        let Some(first) = path.first() else {
            return gcode;
        };
        gcode.push_str(&format!("G00 X{:.4}Y{:.4}\n", first.x, first.y)); // rapid to start
        gcode.push_str(&format!("G01 Z{:.4}\n", self.z_cut)); // start cutting
        for pt in &path[1..] {
            gcode.push_str(&format!("G01 X{:.4}Y{:.4}\n", pt.x, pt.y));
        }
        gcode.push_str(&format!("G00 Z{:.4}\n", self.z_move)); // stop cutting
        gcode
    }

    /// The exported program: the G-code plus an optional verbatim
    /// postamble.
    pub fn export_gcode(&self, postamble: Option<&str>) -> String {
        match postamble {
            Some(extra) => format!("{}\n{}", self.gcode, extra),
            None => self.gcode.clone(),
        }
    }

    /// Split the G-code text into per-line word lists. Bracketed comments
    /// are stripped (one pair per line); `G20`/`G21` update the units.
    fn pre_parse(&mut self, gtext: &str) -> Vec<Vec<(char, Real)>> {
        let mut commands = Vec::new();

        for raw_line in gtext.split('\n') {
            let mut line = raw_line.trim().to_string();

            // Remove a bracketed comment.
            if let (Some(open), Some(close)) = (line.find('('), line.find(')')) {
                if close > open {
                    line = format!("{}{}", &line[..open], &line[close + 1..]);
                }
            }

            if let Some(caps) = GCODE_UNITS_RE.captures(&line) {
                self.units = if &caps[1] == "0" { Units::In } else { Units::Mm };
            }

            // Split at every word letter.
            let starts: Vec<usize> = line
                .char_indices()
                .filter(|(_, c)| WORD_LETTERS.contains(*c))
                .map(|(i, _)| i)
                .collect();
            if starts.is_empty() {
                continue;
            }

            let mut words = Vec::new();
            for (n, &start) in starts.iter().enumerate() {
                let end = starts.get(n + 1).copied().unwrap_or(line.len());
                let part = line[start..end].trim();
                let letter = part.chars().next().expect("non-empty word");
                match part[1..].trim().parse::<Real>() {
                    Ok(value) => words.push((letter, value)),
                    Err(_) => log::warn!("unreadable G-code word {part:?}"),
                }
            }
            commands.push(words);
        }
        commands
    }

    /// Parse `self.gcode` back into annotated motion segments.
    pub fn gcode_parse(&mut self) -> &[CutSegment] {
        let gtext = self.gcode.clone();
        let commands = self.pre_parse(&gtext);

        let word = |cmd: &[(char, Real)], letter: char| -> Option<Real> {
            cmd.iter().find(|(l, _)| *l == letter).map(|(_, v)| *v)
        };

        let mut geometry: Vec<CutSegment> = Vec::new();

        // Last known machine state.
        let mut current = (0.0_f64, 0.0_f64, 0.0_f64, 0_i64); // x, y, z, g
        let mut path: Vec<Coord<Real>> = vec![coord! { x: 0.0, y: 0.0 }];
        let mut kind = SegmentKind { motion: Motion::Cut, speed: Speed::Fast };

        for cmd in &commands {
            // A height change closes the current path.
            if let Some(z) = word(cmd, 'Z') {
                if (word(cmd, 'X').is_some() || word(cmd, 'Y').is_some()) && z != current.2 {
                    log::warn!("non-orthogonal motion: {cmd:?}");
                }
                current.2 = z;
                if path.len() > 1 {
                    geometry.push(CutSegment {
                        geom: LineString::new(path.clone()),
                        kind,
                    });
                    path = vec![*path.last().expect("non-empty path")];
                }
            }

            if let Some(g) = word(cmd, 'G') {
                current.3 = g as i64;
            }

            if word(cmd, 'X').is_some() || word(cmd, 'Y').is_some() {
                let x = word(cmd, 'X').unwrap_or(current.0);
                let y = word(cmd, 'Y').unwrap_or(current.1);

                kind = SegmentKind {
                    motion: if current.2 > 0.0 { Motion::Travel } else { Motion::Cut },
                    speed: if current.3 > 0 { Speed::Slow } else { Speed::Fast },
                };

                match current.3 {
                    0 | 1 => path.push(coord! { x: x, y: y }),
                    2 | 3 => {
                        let i = word(cmd, 'I').unwrap_or_else(|| {
                            log::warn!("arc without I word: {cmd:?}");
                            0.0
                        });
                        let j = word(cmd, 'J').unwrap_or_else(|| {
                            log::warn!("arc without J word: {cmd:?}");
                            0.0
                        });
                        let center = coord! { x: i + current.0, y: j + current.1 };
                        let radius = (i * i + j * j).sqrt();
                        let start = (-j).atan2(-i);
                        let stop = (y - center.y).atan2(x - center.x);
                        let direction = if current.3 == 2 {
                            ArcDirection::Cw
                        } else {
                            ArcDirection::Ccw
                        };
                        path.extend(arc(
                            center,
                            radius,
                            start,
                            stop,
                            direction,
                            self.steps_per_circle,
                        ));
                    }
                    other => log::warn!("motion with unsupported G{other}"),
                }
            }

            // Commit the command's coordinates as machine state.
            if let Some(x) = word(cmd, 'X') {
                current.0 = x;
            }
            if let Some(y) = word(cmd, 'Y') {
                current.1 = y;
            }
        }

        // The program may end without a final height change.
        if path.len() > 1 {
            geometry.push(CutSegment {
                geom: LineString::new(path),
                kind,
            });
        }

        self.gcode_parsed = geometry;
        &self.gcode_parsed
    }

    /// Collect the parsed tool paths into `solid_geometry`.
    pub fn create_geometry(&mut self) {
        self.solid_geometry = GeometryCollection(
            self.gcode_parsed
                .iter()
                .map(|seg| Geometry::LineString(seg.geom.clone()))
                .collect(),
        );
    }

    /// Tool paths swept by the tool diameter, for display.
    pub fn swept_area(&self) -> MultiPolygon<Real> {
        crate::geometry::buffer_collection(
            &self.solid_geometry,
            self.tooldia / 2.0,
            crate::float_types::DEFAULT_CIRCLE_STEPS,
        )
    }
}

impl Default for CncJob {
    fn default() -> Self {
        Self::new()
    }
}

impl CamObject for CncJob {
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

    /// Scales the parsed tool paths. The G-code text, tool diameter and
    /// Z levels are untouched.
    fn scale(&mut self, factor: Real) {
        for segment in &mut self.gcode_parsed {
            segment.geom = scaled(&segment.geom, factor, factor, coord! { x: 0.0, y: 0.0 });
        }
        self.create_geometry();
    }

    fn offset(&mut self, dx: Real, dy: Real) {
        for segment in &mut self.gcode_parsed {
            segment.geom = translated(&segment.geom, dx, dy);
        }
        self.create_geometry();
    }

    /// Z levels, feed rate and tool diameter are lengths in job units, so
    /// unit conversion rescales them along with the paths.
    fn convert_units(&mut self, units: Units) -> Real {
        log::debug!("CncJob::convert_units({units})");
        if units == self.units {
            return 1.0;
        }
        let factor = self.units.factor_to(units);
        self.units = units;
        self.scale(factor);
        self.z_cut *= factor;
        self.z_move *= factor;
        self.feedrate *= factor;
        self.tooldia *= factor;
        factor
    }
}
