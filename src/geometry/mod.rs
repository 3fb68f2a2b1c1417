//! Planar geometry kernel and the shared object surface.
//!
//! Geometry is stored as a [`geo::GeometryCollection`]; operations dispatch
//! on the [`geo::Geometry`] variants. Areal buffering goes through
//! [`geo_buf`]; zero-width features (points, line strings) are materialized
//! into areas by the constructors in [`shapes`].

use crate::errors::CamError;
use crate::float_types::{Real, DEFAULT_CIRCLE_STEPS, EPSILON, INCH_MM, TAU};
use geo::{
    AffineOps, AffineTransform, BooleanOps, BoundingRect, Contains, Coord, CoordsIter,
    Geometry, GeometryCollection, MultiPolygon, Point, Polygon, coord,
};
use geo::{orient::Direction, Area, Orient};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod shapes;

/// Length units of an object. The only conversion factor in the system is
/// 25.4 mm per inch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "MM")]
    Mm,
}

impl Units {
    /// Scale factor taking lengths in `self` to lengths in `other`.
    pub fn factor_to(self, other: Units) -> Real {
        match (self, other) {
            (Units::In, Units::Mm) => INCH_MM,
            (Units::Mm, Units::In) => 1.0 / INCH_MM,
            _ => 1.0,
        }
    }

    /// The G-code word selecting these units.
    pub fn gcode_word(self) -> &'static str {
        match self {
            Units::In => "G20",
            Units::Mm => "G21",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Units::In => "IN",
            Units::Mm => "MM",
        })
    }
}

impl FromStr for Units {
    type Err = CamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(Units::In),
            "MM" => Ok(Units::Mm),
            other => Err(CamError::InputMalformed(format!("unknown units {other:?}"))),
        }
    }
}

/// Sweep direction of a circular arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcDirection {
    Cw,
    Ccw,
}

/// End-cap style for stroked line strings, matching the classic
/// round/flat/square buffer cap options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapStyle {
    Round,
    Flat,
    Square,
}

/// Mirror axis for [`CamObject::mirror`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Polyline approximation of a circular arc.
///
/// Angles are in radians. For `ccw` arcs with `stop <= start` a full turn
/// is added to `stop`; for `cw` arcs with `stop >= start` a full turn is
/// subtracted, so the sweep always advances in the requested direction.
/// The number of segments is proportional to the swept angle, with a
/// minimum of 2; `steps_per_circle` segments correspond to a full circle.
pub fn arc(
    center: Coord<Real>,
    radius: Real,
    start: Real,
    stop: Real,
    direction: ArcDirection,
    steps_per_circle: usize,
) -> Vec<Coord<Real>> {
    let mut stop = stop;
    if direction == ArcDirection::Ccw && stop <= start {
        stop += TAU;
    }
    if direction == ArcDirection::Cw && stop >= start {
        stop -= TAU;
    }

    let angle = (stop - start).abs();
    let steps = ((angle / TAU * steps_per_circle as Real).ceil() as usize).max(2);
    let sign = match direction {
        ArcDirection::Cw => -1.0,
        ArcDirection::Ccw => 1.0,
    };
    let delta = sign * angle / steps as Real;

    (0..=steps)
        .map(|i| {
            let theta = start + delta * i as Real;
            coord! {
                x: center.x + radius * theta.cos(),
                y: center.y + radius * theta.sin(),
            }
        })
        .collect()
}

/// Extract the areal part of a collection as one `MultiPolygon`.
pub fn to_multipolygon(collection: &GeometryCollection<Real>) -> MultiPolygon<Real> {
    let polygons = collection
        .iter()
        .flat_map(|geom| match geom {
            Geometry::Polygon(poly) => vec![poly.clone()],
            Geometry::MultiPolygon(mp) => mp.0.clone(),
            _ => vec![],
        })
        .collect();

    MultiPolygon(polygons)
}

/// Wrap a `MultiPolygon` back into a single-element collection.
pub fn collection_from_multipolygon(mp: MultiPolygon<Real>) -> GeometryCollection<Real> {
    GeometryCollection(vec![Geometry::MultiPolygon(mp)])
}

/// Cascaded union of a sequence of multi-polygons.
pub fn union_all(parts: impl IntoIterator<Item = MultiPolygon<Real>>) -> MultiPolygon<Real> {
    let mut acc = MultiPolygon::new(Vec::new());
    for part in parts {
        if part.0.is_empty() {
            continue;
        }
        if acc.0.is_empty() {
            acc = part;
        } else {
            acc = acc.union(&part);
        }
    }
    acc
}

/// Rebuild a polygon through a no-op boolean union.
///
/// Self-intersecting outlines are common in real Gerber regions; a union
/// with nothing resolves them into valid (multi)polygons the same way a
/// zero-distance buffer does.
pub fn normalize_polygon(poly: Polygon<Real>) -> MultiPolygon<Real> {
    MultiPolygon(vec![poly])
        .union(&MultiPolygon::new(Vec::new()))
        .orient(Direction::Default)
}

/// Axis-aligned bounds `[xmin, ymin, xmax, ymax]` of a collection.
pub fn collection_bounds(collection: &GeometryCollection<Real>) -> Option<[Real; 4]> {
    collection
        .bounding_rect()
        .map(|rect| [rect.min().x, rect.min().y, rect.max().x, rect.max().y])
}

/// Axis-aligned bounding rectangle of a collection, as a polygon.
pub fn envelope(collection: &GeometryCollection<Real>) -> Option<Polygon<Real>> {
    collection.bounding_rect().map(|rect| rect.to_polygon())
}

/// Buffer an areal geometry by `distance` (negative erodes), round joins.
pub fn buffer_multipolygon(mp: &MultiPolygon<Real>, distance: Real) -> MultiPolygon<Real> {
    if mp.0.is_empty() {
        return MultiPolygon::new(Vec::new());
    }
    if distance.abs() <= EPSILON {
        return mp.clone();
    }
    geo_buf::buffer_multi_polygon_rounded(mp, distance)
}

/// Buffer every member of a collection by `distance` and union the result.
///
/// Points become disks, line strings become round-capped strokes, areal
/// members are offset. This is the whole-object `buffer` used for
/// isolation routing and bounding margins.
pub fn buffer_collection(
    collection: &GeometryCollection<Real>,
    distance: Real,
    steps: usize,
) -> MultiPolygon<Real> {
    let mut parts: Vec<MultiPolygon<Real>> = Vec::new();
    for geom in collection.iter() {
        match geom {
            Geometry::Polygon(poly) => {
                parts.push(buffer_multipolygon(&MultiPolygon(vec![poly.clone()]), distance));
            }
            Geometry::MultiPolygon(mp) => parts.push(buffer_multipolygon(mp, distance)),
            Geometry::Point(p) => {
                if distance > EPSILON {
                    parts.push(MultiPolygon(vec![shapes::disk(p.0, distance, steps)]));
                }
            }
            Geometry::LineString(ls) => {
                if distance > EPSILON {
                    parts.push(shapes::stroke(ls, distance, CapStyle::Round, steps));
                }
            }
            other => {
                log::warn!("buffer not implemented for {other:?}");
            }
        }
    }
    union_all(parts)
}

/// Nested inward tool passes that clear the interior of a polygon.
///
/// The first pass is the polygon eroded by half the tool diameter; each
/// following pass erodes the previous one by `tooldia * (1 - overlap)`
/// until nothing remains. Returns the passes outermost first.
pub fn clear_polygon(
    polygon: &Polygon<Real>,
    tooldia: Real,
    overlap: Real,
) -> Vec<MultiPolygon<Real>> {
    let mut cuts = vec![buffer_multipolygon(
        &MultiPolygon(vec![polygon.clone()]),
        -tooldia / 2.0,
    )];
    loop {
        let next = buffer_multipolygon(cuts.last().unwrap(), -tooldia * (1.0 - overlap));
        if next.unsigned_area() > 0.0 {
            cuts.push(next);
        } else {
            break;
        }
    }
    cuts
}

/// First polygon whose interior contains the point, in iteration order.
pub fn find_polygon<'a>(
    poly_set: impl IntoIterator<Item = &'a Polygon<Real>>,
    point: Coord<Real>,
) -> Option<&'a Polygon<Real>> {
    let p = Point(point);
    poly_set.into_iter().find(|poly| poly.contains(&p))
}

/// Rotate a geometry about `origin` by `degrees`, counter-clockwise.
pub fn rotated<G: AffineOps<Real>>(geom: &G, degrees: Real, origin: Coord<Real>) -> G {
    geom.affine_transform(&AffineTransform::rotate(degrees, origin))
}

/// Translate a geometry by `(dx, dy)`.
pub fn translated<G: AffineOps<Real>>(geom: &G, dx: Real, dy: Real) -> G {
    geom.affine_transform(&AffineTransform::translate(dx, dy))
}

/// Scale a geometry about `origin`.
pub fn scaled<G: AffineOps<Real>>(geom: &G, sx: Real, sy: Real, origin: Coord<Real>) -> G {
    geom.affine_transform(&AffineTransform::scale(sx, sy, origin))
}

/// Where to leave the bridge gaps when cutting a board out of its panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoutStyle {
    /// Gaps centered on the top and bottom edges.
    TopBottom,
    /// Gaps centered on the left and right edges.
    LeftRight,
    /// One gap in the middle of every edge.
    Four,
}

/// Shared surface of the core objects: a units tag plus derived planar
/// geometry, with affine transforms and unit conversion.
///
/// Geometry is re-derived from parse tables by each object's
/// `create_geometry`; the transforms below edit the derived geometry only,
/// so a later re-derivation discards them. Objects whose tables are cheap
/// to transform (Excellon drills, parsed G-code paths) override the
/// transforms to edit the tables and re-derive instead.
pub trait CamObject {
    fn units(&self) -> Units;
    fn set_units(&mut self, units: Units);
    fn solid_geometry(&self) -> &GeometryCollection<Real>;
    fn set_solid_geometry(&mut self, geometry: GeometryCollection<Real>);

    /// Scale the geometry about the origin.
    fn scale(&mut self, factor: Real) {
        let scaled = scaled(self.solid_geometry(), factor, factor, coord! { x: 0.0, y: 0.0 });
        self.set_solid_geometry(scaled);
    }

    /// Translate the geometry by `(dx, dy)`.
    fn offset(&mut self, dx: Real, dy: Real) {
        let moved = translated(self.solid_geometry(), dx, dy);
        self.set_solid_geometry(moved);
    }

    /// Mirror the geometry across an axis-parallel line through `point`.
    fn mirror(&mut self, axis: Axis, point: (Real, Real)) {
        let (sx, sy) = match axis {
            Axis::X => (1.0, -1.0),
            Axis::Y => (-1.0, 1.0),
        };
        let flipped = scaled(self.solid_geometry(), sx, sy, coord! { x: point.0, y: point.1 });
        self.set_solid_geometry(flipped);
    }

    /// Axis-aligned bounds `[xmin, ymin, xmax, ymax]`.
    fn bounds(&self) -> [Real; 4] {
        match collection_bounds(self.solid_geometry()) {
            Some(b) => b,
            None => {
                log::warn!("solid geometry not computed yet");
                [0.0, 0.0, 0.0, 0.0]
            }
        }
    }

    /// (width, height) of the bounds.
    fn size(&self) -> (Real, Real) {
        let [xmin, ymin, xmax, ymax] = self.bounds();
        (xmax - xmin, ymax - ymin)
    }

    /// Convert the object to `units`, scaling all geometry. Returns the
    /// scale factor that was applied.
    fn convert_units(&mut self, units: Units) -> Real {
        log::debug!("convert_units({units})");
        if units == self.units() {
            return 1.0;
        }
        let factor = self.units().factor_to(units);
        self.set_units(units);
        self.scale(factor);
        factor
    }

    /// Contours at `offset` distance around the geometry.
    fn isolation_geometry(&self, offset: Real) -> MultiPolygon<Real> {
        buffer_collection(self.solid_geometry(), offset, DEFAULT_CIRCLE_STEPS)
    }

    /// Complement of the geometry within `boundary` (default: envelope).
    fn get_empty_area(&self, boundary: Option<Polygon<Real>>) -> MultiPolygon<Real> {
        let boundary = boundary
            .or_else(|| envelope(self.solid_geometry()))
            .unwrap_or_else(|| shapes::rect(0.0, 0.0, 0.0, 0.0));
        MultiPolygon(vec![boundary]).difference(&to_multipolygon(self.solid_geometry()))
    }

    /// Rectangular boundary at `margin` distance from the geometry, with
    /// rounded corners if requested.
    fn get_bounding_box(&self, margin: Real, rounded: bool) -> Polygon<Real> {
        let [xmin, ymin, xmax, ymax] = self.bounds();
        let envelope = shapes::rect(xmin, ymin, xmax, ymax);
        if margin.abs() <= EPSILON {
            return envelope;
        }
        let buffered = buffer_multipolygon(&MultiPolygon(vec![envelope]), margin);
        if rounded {
            buffered.0.into_iter().next().unwrap_or_else(|| {
                shapes::rect(xmin - margin, ymin - margin, xmax + margin, ymax + margin)
            })
        } else {
            match buffered.bounding_rect() {
                Some(r) => r.to_polygon(),
                None => shapes::rect(xmin - margin, ymin - margin, xmax + margin, ymax + margin),
            }
        }
    }

    /// Area around the geometry that carries no copper: the bounding box
    /// minus the geometry itself.
    fn non_copper_region(&self, margin: Real, rounded: bool) -> MultiPolygon<Real> {
        let bounding_box = self.get_bounding_box(margin, rounded);
        MultiPolygon(vec![bounding_box]).difference(&to_multipolygon(self.solid_geometry()))
    }

    /// Perimeter cut paths for separating the board from its stock, leaving
    /// bridge gaps of `gap_size`. `margin` and `gap_size` are expected to
    /// be tool-compensated already (margin + tooldia/2, gap + tooldia).
    fn cutout_gaps(&self, margin: Real, gap_size: Real, style: CutoutStyle) -> Vec<geo::LineString<Real>> {
        let [mut minx, mut miny, mut maxx, mut maxy] = self.bounds();
        minx -= margin;
        maxx += margin;
        miny -= margin;
        maxy += margin;
        let midx = 0.5 * (minx + maxx);
        let midy = 0.5 * (miny + maxy);
        let hgap = 0.5 * gap_size;

        let pts = [
            coord! { x: midx - hgap, y: maxy },
            coord! { x: minx, y: maxy },
            coord! { x: minx, y: midy + hgap },
            coord! { x: minx, y: midy - hgap },
            coord! { x: minx, y: miny },
            coord! { x: midx - hgap, y: miny },
            coord! { x: midx + hgap, y: miny },
            coord! { x: maxx, y: miny },
            coord! { x: maxx, y: midy - hgap },
            coord! { x: maxx, y: midy + hgap },
            coord! { x: maxx, y: maxy },
            coord! { x: midx + hgap, y: maxy },
        ];

        let segments: Vec<Vec<Coord<Real>>> = match style {
            CutoutStyle::TopBottom => vec![
                vec![pts[0], pts[1], pts[4], pts[5]],
                vec![pts[6], pts[7], pts[10], pts[11]],
            ],
            CutoutStyle::LeftRight => vec![
                vec![pts[9], pts[10], pts[1], pts[2]],
                vec![pts[3], pts[4], pts[7], pts[8]],
            ],
            CutoutStyle::Four => vec![
                vec![pts[0], pts[1], pts[2]],
                vec![pts[3], pts[4], pts[5]],
                vec![pts[6], pts[7], pts[8]],
                vec![pts[9], pts[10], pts[11]],
            ],
        };

        segments.into_iter().map(geo::LineString::new).collect()
    }
}

/// Post-processed geometry: the result of isolation, painting, cutouts or
/// any other derivation, ready to be handed to the CNC-job generator.
#[derive(Debug, Clone)]
pub struct GeometryObject {
    pub units: Units,
    pub solid_geometry: GeometryCollection<Real>,
}

impl GeometryObject {
    pub fn new() -> Self {
        GeometryObject {
            units: Units::In,
            solid_geometry: GeometryCollection::default(),
        }
    }

    pub fn from_geometry(units: Units, solid_geometry: GeometryCollection<Real>) -> Self {
        GeometryObject { units, solid_geometry }
    }

    /// Append one shape to the geometry.
    pub fn push(&mut self, geometry: Geometry<Real>) {
        self.solid_geometry.0.push(geometry);
    }

    /// Total number of vertices, a rough complexity measure.
    pub fn vertex_count(&self) -> usize {
        self.solid_geometry.iter().map(|g| g.coords_iter().count()).sum()
    }
}

impl Default for GeometryObject {
    fn default() -> Self {
        Self::new()
    }
}

impl CamObject for GeometryObject {
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
