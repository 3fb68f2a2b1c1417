//! Primitive planar shapes.
//!
//! Everything an aperture, a drill or a macro primitive can stamp is built
//! here as an explicit polygon, so the rest of the crate only ever deals in
//! areal geometry.

use crate::float_types::{Real, EPSILON, TAU};
use crate::geometry::{union_all, CapStyle};
use geo::{coord, Coord, LineString, MultiPolygon, Polygon};

/// A disk approximated by a regular polygon with `steps` edges.
pub fn disk(center: Coord<Real>, radius: Real, steps: usize) -> Polygon<Real> {
    let steps = steps.max(3);
    let mut coords: Vec<Coord<Real>> = (0..steps)
        .map(|i| {
            let theta = TAU * (i as Real) / (steps as Real);
            coord! {
                x: center.x + radius * theta.cos(),
                y: center.y + radius * theta.sin(),
            }
        })
        .collect();
    coords.push(coords[0]);
    Polygon::new(LineString::new(coords), vec![])
}

/// Axis-aligned rectangle from corner coordinates.
pub fn rect(minx: Real, miny: Real, maxx: Real, maxy: Real) -> Polygon<Real> {
    Polygon::new(
        LineString::new(vec![
            coord! { x: minx, y: miny },
            coord! { x: maxx, y: miny },
            coord! { x: maxx, y: maxy },
            coord! { x: minx, y: maxy },
            coord! { x: minx, y: miny },
        ]),
        vec![],
    )
}

/// Regular `n`-gon with vertices on a circle of `radius` around `center`,
/// the first vertex at angle zero.
pub fn regular_polygon(center: Coord<Real>, radius: Real, n: usize) -> Polygon<Real> {
    let n = n.max(3);
    let mut coords: Vec<Coord<Real>> = (0..n)
        .map(|i| {
            let theta = TAU * (i as Real) / (n as Real);
            coord! {
                x: center.x + radius * theta.cos(),
                y: center.y + radius * theta.sin(),
            }
        })
        .collect();
    coords.push(coords[0]);
    Polygon::new(LineString::new(coords), vec![])
}

/// Annulus between `outer_radius` and `inner_radius`. Collapses to a full
/// disk when the inner radius vanishes.
pub fn ring(
    center: Coord<Real>,
    outer_radius: Real,
    inner_radius: Real,
    steps: usize,
) -> MultiPolygon<Real> {
    use geo::BooleanOps;

    if inner_radius <= EPSILON {
        return MultiPolygon(vec![disk(center, outer_radius, steps)]);
    }
    let outer = MultiPolygon(vec![disk(center, outer_radius, steps)]);
    let inner = MultiPolygon(vec![disk(center, inner_radius, steps)]);
    outer.difference(&inner)
}

/// Thicken a line string into an area of half-width `radius`.
///
/// Segments become quads, joins are filled with disks, and the ends are
/// capped per `cap`: round adds end disks, flat stops at the endpoints,
/// square extends each end by `radius` first.
pub fn stroke(
    line: &LineString<Real>,
    radius: Real,
    cap: CapStyle,
    steps: usize,
) -> MultiPolygon<Real> {
    // Collapse zero-length segments.
    let mut pts: Vec<Coord<Real>> = Vec::with_capacity(line.0.len());
    for &c in &line.0 {
        if pts
            .last()
            .map(|p: &Coord<Real>| (p.x - c.x).abs() <= EPSILON && (p.y - c.y).abs() <= EPSILON)
            .unwrap_or(false)
        {
            continue;
        }
        pts.push(c);
    }

    if pts.len() < 2 || radius <= EPSILON {
        return MultiPolygon::new(Vec::new());
    }

    let mut quad_pts = pts.clone();
    if cap == CapStyle::Square {
        let n = quad_pts.len();
        let first_dir = unit_dir(quad_pts[1], quad_pts[0]);
        let last_dir = unit_dir(quad_pts[n - 2], quad_pts[n - 1]);
        quad_pts[0] = offset_coord(quad_pts[0], first_dir, radius);
        quad_pts[n - 1] = offset_coord(quad_pts[n - 1], last_dir, radius);
    }

    let mut pieces: Vec<MultiPolygon<Real>> = Vec::new();
    for w in quad_pts.windows(2) {
        pieces.push(MultiPolygon(vec![segment_quad(w[0], w[1], radius)]));
    }

    // Joins.
    for &p in &pts[1..pts.len() - 1] {
        pieces.push(MultiPolygon(vec![disk(p, radius, steps)]));
    }

    if cap == CapStyle::Round {
        pieces.push(MultiPolygon(vec![disk(pts[0], radius, steps)]));
        pieces.push(MultiPolygon(vec![disk(*pts.last().unwrap(), radius, steps)]));
    }

    union_all(pieces)
}

fn unit_dir(from: Coord<Real>, to: Coord<Real>) -> Coord<Real> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len <= EPSILON {
        coord! { x: 0.0, y: 0.0 }
    } else {
        coord! { x: dx / len, y: dy / len }
    }
}

fn offset_coord(c: Coord<Real>, dir: Coord<Real>, by: Real) -> Coord<Real> {
    coord! { x: c.x + dir.x * by, y: c.y + dir.y * by }
}

fn segment_quad(a: Coord<Real>, b: Coord<Real>, radius: Real) -> Polygon<Real> {
    let dir = unit_dir(a, b);
    let normal = coord! { x: -dir.y * radius, y: dir.x * radius };
    Polygon::new(
        LineString::new(vec![
            coord! { x: a.x + normal.x, y: a.y + normal.y },
            coord! { x: b.x + normal.x, y: b.y + normal.y },
            coord! { x: b.x - normal.x, y: b.y - normal.y },
            coord! { x: a.x - normal.x, y: a.y - normal.y },
            coord! { x: a.x + normal.x, y: a.y + normal.y },
        ]),
        vec![],
    )
}
