use crate::cncjob::{CncJob, JobKind, Motion, Speed};
use crate::excellon::{Excellon, ZeroSuppression};
use crate::float_types::{Real, DEFAULT_CIRCLE_STEPS, TAU};
use crate::geometry::{
    arc, clear_polygon, find_polygon, shapes, ArcDirection, CamObject, CutoutStyle,
    GeometryObject, Units,
};
use crate::gerber::{macros::evaluate, parse_gerber_number, Aperture, Gerber};
use geo::{coord, Area, Centroid, Contains, Geometry, Point, Polygon, Simplify};
use hashbrown::HashMap;

// --------------------------------------------------------
//   Helpers
// --------------------------------------------------------

/// Quick helper to compare floating-point results with an acceptable tolerance.
fn approx_eq(a: Real, b: Real, eps: Real) -> bool {
    (a - b).abs() < eps
}

/// Exact area of the inscribed n-gon that stands in for a disk of `radius`.
fn ngon_area(radius: Real, n: usize) -> Real {
    (n as Real) / 2.0 * radius * radius * (TAU / n as Real).sin()
}

fn unit_square() -> Polygon<Real> {
    shapes::rect(0.0, 0.0, 1.0, 1.0)
}

fn total_area(gerber: &Gerber) -> Real {
    crate::geometry::to_multipolygon(&gerber.solid_geometry).unsigned_area()
}

// --------------------------------------------------------
//   Number and arc utilities
// --------------------------------------------------------

#[test]
fn test_gerber_number_decode() {
    // Format (2,4).
    assert!(approx_eq(parse_gerber_number("12345", 4).unwrap(), 1.2345, 1e-12));
    // Format (3,3).
    assert!(approx_eq(parse_gerber_number("123456", 3).unwrap(), 123.456, 1e-12));
    assert!(approx_eq(parse_gerber_number("-12345", 4).unwrap(), -1.2345, 1e-12));
    assert!(parse_gerber_number("12x45", 4).is_err());
}

#[test]
fn test_arc_endpoints_and_count() {
    let points = arc(
        coord! { x: 0.0, y: 0.0 },
        1.0,
        0.0,
        core::f64::consts::PI,
        ArcDirection::Ccw,
        20,
    );
    // Half a circle at 20 steps per circle: 10 segments, 11 points.
    assert_eq!(points.len(), 11);
    assert!(approx_eq(points[0].x, 1.0, 1e-9));
    assert!(approx_eq(points[0].y, 0.0, 1e-9));
    assert!(approx_eq(points[10].x, -1.0, 1e-9));
    assert!(approx_eq(points[10].y, 0.0, 1e-9));
}

#[test]
fn test_arc_monotonicity() {
    let center = coord! { x: 0.0, y: 0.0 };
    let ccw = arc(center, 2.0, 0.3, 0.2, ArcDirection::Ccw, 40);
    for w in ccw.windows(2) {
        let a0 = w[0].y.atan2(w[0].x);
        let a1 = w[1].y.atan2(w[1].x);
        let mut delta = a1 - a0;
        if delta < -core::f64::consts::PI {
            delta += TAU;
        }
        assert!(delta >= -1e-9, "ccw arc went backwards");
    }

    let cw = arc(center, 2.0, 0.2, 0.3, ArcDirection::Cw, 40);
    for w in cw.windows(2) {
        let a0 = w[0].y.atan2(w[0].x);
        let a1 = w[1].y.atan2(w[1].x);
        let mut delta = a1 - a0;
        if delta > core::f64::consts::PI {
            delta -= TAU;
        }
        assert!(delta <= 1e-9, "cw arc went forwards");
    }
}

#[test]
fn test_arc_full_circle_when_degenerate_sweep() {
    // ccw with stop == start sweeps a full turn.
    let points = arc(coord! { x: 0.0, y: 0.0 }, 1.0, 0.0, 0.0, ArcDirection::Ccw, 16);
    assert_eq!(points.len(), 17);
    assert!(approx_eq(points[0].x, points[16].x, 1e-9));
    assert!(approx_eq(points[0].y, points[16].y, 1e-9));
}

// --------------------------------------------------------
//   Geometry kernel
// --------------------------------------------------------

#[test]
fn test_simplify_within_tolerance() {
    // A square with redundant collinear vertices.
    let square = Polygon::new(
        geo::LineString::new(vec![
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 0.5, y: 0.0 },
            coord! { x: 1.0, y: 0.0 },
            coord! { x: 1.0, y: 1.0 },
            coord! { x: 0.0, y: 1.0 },
            coord! { x: 0.0, y: 0.0 },
        ]),
        vec![],
    );
    let simplified = square.simplify(&0.01);
    assert!(simplified.exterior().0.len() < square.exterior().0.len());
    assert!(approx_eq(simplified.unsigned_area(), 1.0, 1e-9));
}

#[test]
fn test_clear_polygon_nested_passes() {
    let square = shapes::rect(0.0, 0.0, 4.0, 4.0);
    let passes = clear_polygon(&square, 1.0, 0.15);

    // -0.5 then -0.85: the third pass would vanish.
    assert_eq!(passes.len(), 2);
    let a0 = passes[0].unsigned_area();
    let a1 = passes[1].unsigned_area();
    assert!(a0 > a1 && a1 > 0.0);
    assert!(approx_eq(a0, 9.0, 1e-4));
}

#[test]
fn test_find_polygon_strict_interior() {
    let left = shapes::rect(0.0, 0.0, 1.0, 1.0);
    let right = shapes::rect(2.0, 0.0, 3.0, 1.0);
    let set = vec![left, right];

    let hit = find_polygon(&set, coord! { x: 2.5, y: 0.5 });
    assert!(hit.is_some());
    assert!(hit.unwrap().contains(&Point::new(2.5, 0.5)));

    // Boundary points are not inside.
    assert!(find_polygon(&set, coord! { x: 1.0, y: 0.5 }).is_none());
    assert!(find_polygon(&set, coord! { x: 1.5, y: 0.5 }).is_none());
}

#[test]
fn test_bounding_box_and_non_copper() {
    let mut geo_obj = GeometryObject::new();
    geo_obj.push(Geometry::Polygon(unit_square()));

    let bbox = geo_obj.get_bounding_box(0.1, false);
    assert!(approx_eq(bbox.unsigned_area(), 1.44, 1e-6));

    let non_copper = geo_obj.non_copper_region(0.1, false);
    assert!(approx_eq(non_copper.unsigned_area(), 0.44, 1e-6));
}

#[test]
fn test_cutout_gaps() {
    let mut geo_obj = GeometryObject::new();
    geo_obj.push(Geometry::Polygon(shapes::rect(0.0, 0.0, 2.0, 2.0)));

    let tb = geo_obj.cutout_gaps(0.1, 0.3, CutoutStyle::TopBottom);
    assert_eq!(tb.len(), 2);
    assert!(tb.iter().all(|ls| ls.0.len() == 4));

    let four = geo_obj.cutout_gaps(0.1, 0.3, CutoutStyle::Four);
    assert_eq!(four.len(), 4);
    assert!(four.iter().all(|ls| ls.0.len() == 3));

    // Every cut stays on the margin rectangle's perimeter.
    for ls in &four {
        for c in &ls.0 {
            let on_x = approx_eq(c.x, -0.1, 1e-9) || approx_eq(c.x, 2.1, 1e-9);
            let on_y = approx_eq(c.y, -0.1, 1e-9) || approx_eq(c.y, 2.1, 1e-9);
            assert!(on_x || on_y);
        }
    }
}

#[test]
fn test_stroke_area_round_caps() {
    // Unit-length segment, width 0.1: a rectangle plus two half disks.
    let line = geo::LineString::new(vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 0.0 }]);
    let swath = shapes::stroke(&line, 0.05, crate::geometry::CapStyle::Round, DEFAULT_CIRCLE_STEPS);
    let expected = 1.0 * 0.1 + ngon_area(0.05, DEFAULT_CIRCLE_STEPS);
    assert!(approx_eq(swath.unsigned_area(), expected, 1e-6));
}

#[test]
fn test_stroke_area_square_caps() {
    // Square caps extend the rectangle by the half-width at both ends.
    let line = geo::LineString::new(vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 0.0 }]);
    let swath =
        shapes::stroke(&line, 0.05, crate::geometry::CapStyle::Square, DEFAULT_CIRCLE_STEPS);
    assert!(approx_eq(swath.unsigned_area(), 1.1 * 0.1, 1e-9));
}

// --------------------------------------------------------
//   Aperture macros
// --------------------------------------------------------

#[test]
fn test_macro_expression_evaluation() {
    let empty = HashMap::new();
    assert!(approx_eq(evaluate("1+2x3", &empty).unwrap(), 7.0, 1e-12));
    assert!(approx_eq(evaluate("2X(3+1)", &empty).unwrap(), 8.0, 1e-12));
    assert!(approx_eq(evaluate("-4/2", &empty).unwrap(), -2.0, 1e-12));

    let mut vars = HashMap::new();
    vars.insert("1".to_string(), 0.5);
    vars.insert("2".to_string(), 4.0);
    assert!(approx_eq(evaluate("$1x$2", &vars).unwrap(), 2.0, 1e-12));
    assert!(approx_eq(evaluate("$1+$2/2", &vars).unwrap(), 2.5, 1e-12));
    // Unknown variables read as zero.
    assert!(approx_eq(evaluate("$9+1", &vars).unwrap(), 1.0, 1e-12));

    assert!(evaluate("1+", &empty).is_err());
    assert!(evaluate("", &empty).is_err());
}

#[test]
fn test_macro_polarity_composition() {
    // A dark disk with a clear disk punched out of its middle.
    let mut am = crate::gerber::ApertureMacro::new("AN");
    am.append("1,1,1.0,0,0*1,0,0.5,0,0*");

    let geometry = am.build_geometry(&[]).unwrap();
    let expected = ngon_area(0.5, DEFAULT_CIRCLE_STEPS) - ngon_area(0.25, DEFAULT_CIRCLE_STEPS);
    assert!(approx_eq(geometry.unsigned_area(), expected, 1e-6));
}

#[test]
fn test_macro_variables_and_assignment() {
    // $3 is derived from the bound modifiers inside the body.
    let mut am = crate::gerber::ApertureMacro::new("DONUT");
    am.append("$3=$1/2*1,1,$1,0,0*1,0,$3,0,0*");

    let geometry = am.build_geometry(&["1.0".to_string()]).unwrap();
    let expected = ngon_area(0.5, DEFAULT_CIRCLE_STEPS) - ngon_area(0.25, DEFAULT_CIRCLE_STEPS);
    assert!(approx_eq(geometry.unsigned_area(), expected, 1e-6));
}

#[test]
fn test_macro_clear_before_dark_is_noop() {
    let mut am = crate::gerber::ApertureMacro::new("X");
    am.append("1,0,1.0,0,0*1,1,0.5,0,0*");

    let geometry = am.build_geometry(&[]).unwrap();
    assert!(approx_eq(
        geometry.unsigned_area(),
        ngon_area(0.25, DEFAULT_CIRCLE_STEPS),
        1e-6
    ));
}

#[test]
fn test_macro_center_line_and_outline() {
    let mut am = crate::gerber::ApertureMacro::new("SQ");
    // 21: centered 2x1 rectangle, no rotation.
    am.append("21,1,2,1,0,0,0*");
    let geometry = am.build_geometry(&[]).unwrap();
    assert!(approx_eq(geometry.unsigned_area(), 2.0, 1e-9));

    let mut outline = crate::gerber::ApertureMacro::new("TRI");
    // 4: a right triangle, 3 vertices plus the closing repeat.
    outline.append("4,1,3,0,0,1,0,0,1,0,0,0*");
    let geometry = outline.build_geometry(&[]).unwrap();
    assert!(approx_eq(geometry.unsigned_area(), 0.5, 1e-9));
}

#[test]
fn test_macro_thermal_smaller_than_annulus() {
    let mut am = crate::gerber::ApertureMacro::new("TH");
    am.append("7,0,0,1.0,0.5,0.1,0*");
    let geometry = am.build_geometry(&[]).unwrap();

    let annulus = ngon_area(0.5, DEFAULT_CIRCLE_STEPS) - ngon_area(0.25, DEFAULT_CIRCLE_STEPS);
    let area = geometry.unsigned_area();
    assert!(area > 0.0 && area < annulus);
    // Four separate pads.
    assert_eq!(geometry.0.len(), 4);
}

#[test]
fn test_macro_moire_has_rings_and_crosshair() {
    let mut am = crate::gerber::ApertureMacro::new("MO");
    am.append("6,0,0,1.0,0.1,0.1,3,0.02,0.6,0*");
    let geometry = am.build_geometry(&[]).unwrap();
    let area = geometry.unsigned_area();
    assert!(area > 0.0);
    // Strictly less than the full outer disk.
    assert!(area < ngon_area(0.5, DEFAULT_CIRCLE_STEPS));
}

// --------------------------------------------------------
//   Gerber parser
// --------------------------------------------------------

#[test]
fn test_aperture_definition_round_trip() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec!["%ADD10C,0.5*%", "%ADD11R,0.1X0.2*%", "M02*"]);

    assert_eq!(gerber.apertures.len(), 2);
    assert_eq!(gerber.apertures["10"], Aperture::Circle { size: 0.5 });
    assert_eq!(
        gerber.apertures["11"],
        Aperture::Rectangle { width: 0.1, height: 0.2 }
    );
}

#[test]
fn test_aperture_leading_zero_canonicalization() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec!["%ADD010C,0.5*%", "M02*"]);
    assert!(gerber.apertures.contains_key("10"));
}

#[test]
fn test_format_and_mode() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec!["%FSLAX25Y25*%", "%MOMM*%", "M02*"]);
    assert_eq!(gerber.int_digits, 2);
    assert_eq!(gerber.frac_digits, 5);
    assert_eq!(gerber.units, Units::Mm);
}

#[test]
fn test_flash_disk() {
    // End-to-end scenario: a single C,0.1 flash at (0.5, 0.5).
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%MOIN*%",
        "%ADD10C,0.1*%",
        "D10*",
        "X5000Y5000D03*",
        "M02*",
    ]);

    let mp = crate::geometry::to_multipolygon(&gerber.solid_geometry);
    assert!(approx_eq(
        mp.unsigned_area(),
        ngon_area(0.05, DEFAULT_CIRCLE_STEPS),
        1e-6
    ));
    let centroid = mp.centroid().unwrap();
    assert!(approx_eq(centroid.x(), 0.5, 1e-6));
    assert!(approx_eq(centroid.y(), 0.5, 1e-6));
}

#[test]
fn test_region_unit_square() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%MOIN*%",
        "%ADD10C,0.01*%",
        "D10*",
        "G36*",
        "X0Y0D02*",
        "X10000Y0D01*",
        "X10000Y10000D01*",
        "X0Y10000D01*",
        "X0Y0D01*",
        "G37*",
        "M02*",
    ]);

    assert!(approx_eq(total_area(&gerber), 1.0, 1e-6));
}

#[test]
fn test_polarity_clear_punches_hole() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%MOIN*%",
        "%ADD10C,0.5*%",
        "G36*",
        "X0Y0D02*",
        "X10000Y0D01*",
        "X10000Y10000D01*",
        "X0Y10000D01*",
        "X0Y0D01*",
        "G37*",
        "%LPC*%",
        "D10*",
        "X5000Y5000D03*",
        "M02*",
    ]);

    let expected = 1.0 - ngon_area(0.25, DEFAULT_CIRCLE_STEPS);
    assert!(approx_eq(total_area(&gerber), expected, 1e-6));
}

#[test]
fn test_stroke_with_aperture_width() {
    // A single D01 stroke of length 1 drawn with a 0.1 circle.
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%MOIN*%",
        "%ADD10C,0.1*%",
        "D10*",
        "X0Y0D02*",
        "X10000Y0D01*",
        "M02*",
    ]);

    let expected = 1.0 * 0.1 + ngon_area(0.05, DEFAULT_CIRCLE_STEPS);
    assert!(approx_eq(total_area(&gerber), expected, 1e-6));
}

#[test]
fn test_multi_quadrant_arc_stroke() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%MOIN*%",
        "%ADD10C,0.1*%",
        "D10*",
        "G75*",
        "X0Y0D02*",
        "G02X10000Y0I5000J0D01*",
        "M02*",
    ]);

    // Half circle of radius 0.5 stroked 0.1 wide.
    let area = total_area(&gerber);
    let arc_length = core::f64::consts::PI * 0.5;
    assert!(area > arc_length * 0.1 * 0.9);
    assert!(area < arc_length * 0.1 * 1.2);

    let [xmin, ymin, xmax, ymax] = gerber.bounds();
    assert!(approx_eq(xmin, -0.05, 1e-2));
    assert!(approx_eq(xmax, 1.05, 1e-2));
    assert!(ymax > 0.5 && ymax < 0.56);
    assert!(ymin > -0.06);
}

#[test]
fn test_arc_without_quadrant_mode_is_skipped() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%ADD10C,0.1*%",
        "D10*",
        "X0Y0D02*",
        "G02X10000Y0I5000J0D01*",
        "M02*",
    ]);
    assert!(approx_eq(total_area(&gerber), 0.0, 1e-12));
}

#[test]
fn test_unknown_aperture_flash_is_skipped() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "D10*",
        "X5000Y5000D03*",
        "M02*",
    ]);
    assert!(approx_eq(total_area(&gerber), 0.0, 1e-12));
}

#[test]
fn test_self_intersecting_region_is_repaired() {
    // A bowtie: the region closes across itself.
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "G36*",
        "X0Y0D02*",
        "X10000Y10000D01*",
        "X10000Y0D01*",
        "X0Y10000D01*",
        "X0Y0D01*",
        "G37*",
        "M02*",
    ]);
    // Two triangles of area 1/4 each.
    assert!(approx_eq(total_area(&gerber), 0.5, 1e-6));
}

#[test]
fn test_obround_flash() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%ADD12O,0.4X0.2*%",
        "D12*",
        "X0Y0D03*",
        "M02*",
    ]);

    // A 0.2x0.2 core plus two half disks of radius 0.1.
    let expected = 0.2 * 0.2 + ngon_area(0.1, DEFAULT_CIRCLE_STEPS);
    assert!(approx_eq(total_area(&gerber), expected, 1e-4));
    let [_, ymin, _, ymax] = gerber.bounds();
    assert!(approx_eq(ymax - ymin, 0.2, 1e-6));
}

#[test]
fn test_polygon_flash_uses_diam_as_radius() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%ADD13P,0.5X6*%",
        "D13*",
        "X0Y0D03*",
        "M02*",
    ]);

    // Compatibility quirk: the hexagon is circumscribed by radius 0.5.
    assert!(approx_eq(total_area(&gerber), ngon_area(0.5, 6), 1e-6));
    let [xmin, _, xmax, _] = gerber.bounds();
    assert!(approx_eq(xmax - xmin, 1.0, 1e-6));
}

#[test]
fn test_macro_flash_translated_to_location() {
    // End-to-end scenario: a macro circle with bound modifiers.
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%MOIN*%",
        "%AMCIRC*1,1,$1,$2,$3*%",
        "%ADD10CIRC,0.2X0.5X0.5*%",
        "D10*",
        "X10000Y10000D03*",
        "M02*",
    ]);

    let mp = crate::geometry::to_multipolygon(&gerber.solid_geometry);
    assert!(approx_eq(
        mp.unsigned_area(),
        ngon_area(0.1, DEFAULT_CIRCLE_STEPS),
        1e-6
    ));
    let centroid = mp.centroid().unwrap();
    assert!(approx_eq(centroid.x(), 1.5, 1e-6));
    assert!(approx_eq(centroid.y(), 1.5, 1e-6));
}

#[test]
fn test_multiline_macro_definition() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%AMDONUT*",
        "1,1,$1,0,0*",
        "1,0,$2,0,0*%",
        "%ADD14DONUT,1.0X0.5*%",
        "D14*",
        "X0Y0D03*",
        "M02*",
    ]);

    let expected = ngon_area(0.5, DEFAULT_CIRCLE_STEPS) - ngon_area(0.25, DEFAULT_CIRCLE_STEPS);
    assert!(approx_eq(total_area(&gerber), expected, 1e-6));
}

#[test]
fn test_gerber_affine_transforms() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%ADD10C,0.1*%",
        "D10*",
        "X10000Y10000D03*",
        "M02*",
    ]);

    gerber.offset(1.0, 2.0);
    let [xmin, ymin, xmax, ymax] = gerber.bounds();
    assert!(approx_eq(0.5 * (xmin + xmax), 2.0, 1e-6));
    assert!(approx_eq(0.5 * (ymin + ymax), 3.0, 1e-6));

    gerber.scale(2.0);
    let [xmin, _, xmax, _] = gerber.bounds();
    assert!(approx_eq(0.5 * (xmin + xmax), 4.0, 1e-6));
}

// --------------------------------------------------------
//   Excellon parser
// --------------------------------------------------------

#[test]
fn test_excellon_two_drills() {
    let mut excellon = Excellon::new();
    excellon.parse_lines(vec![
        "M48",
        "INCH,LZ",
        "T1C0.04",
        "%",
        "T1",
        "X010000Y010000",
        "X020000Y010000",
        "M30",
    ]);

    assert_eq!(excellon.units, Units::In);
    assert_eq!(excellon.zeros, ZeroSuppression::L);
    assert_eq!(excellon.tools.len(), 1);
    assert!(approx_eq(excellon.tools["1"].diameter, 0.04, 1e-12));

    assert_eq!(excellon.drills.len(), 2);
    assert!(approx_eq(excellon.drills[0].point.x(), 1.0, 1e-9));
    assert!(approx_eq(excellon.drills[0].point.y(), 1.0, 1e-9));
    assert!(approx_eq(excellon.drills[1].point.x(), 2.0, 1e-9));
    assert_eq!(excellon.drills[0].tool, "1");

    excellon.create_geometry();
    let mp = crate::geometry::to_multipolygon(&excellon.solid_geometry);
    assert!(approx_eq(
        mp.unsigned_area(),
        2.0 * ngon_area(0.02, DEFAULT_CIRCLE_STEPS),
        1e-9
    ));
}

#[test]
fn test_excellon_number_decode() {
    let mut excellon = Excellon::new();

    // Leading-zero style: the first two digits are the integer part.
    excellon.zeros = ZeroSuppression::L;
    assert!(approx_eq(excellon.parse_number("010000").unwrap(), 1.0, 1e-12));
    assert!(approx_eq(excellon.parse_number("01").unwrap(), 1.0, 1e-12));
    assert!(approx_eq(excellon.parse_number("015").unwrap(), 1.5, 1e-12));

    // Trailing-zero style: four implicit fraction digits.
    excellon.zeros = ZeroSuppression::T;
    assert!(approx_eq(excellon.parse_number("015").unwrap(), 0.0015, 1e-12));
    assert!(approx_eq(excellon.parse_number("1500").unwrap(), 0.15, 1e-12));
    assert!(approx_eq(excellon.parse_number("-1500").unwrap(), -0.15, 1e-12));

    assert!(excellon.parse_number("1.5").is_none());
    assert!(excellon.parse_number("").is_none());
}

#[test]
fn test_excellon_coordinates_with_period() {
    let mut excellon = Excellon::new();
    excellon.parse_lines(vec![
        "M48",
        "METRIC,TZ",
        "T2C1.0",
        "%",
        "T2",
        "X12.7Y25.4",
        "Y50.8",
        "M30",
    ]);

    assert_eq!(excellon.units, Units::Mm);
    assert_eq!(excellon.drills.len(), 2);
    assert!(approx_eq(excellon.drills[0].point.x(), 12.7, 1e-9));
    assert!(approx_eq(excellon.drills[0].point.y(), 25.4, 1e-9));
    // Omitted axes inherit the previous value.
    assert!(approx_eq(excellon.drills[1].point.x(), 12.7, 1e-9));
    assert!(approx_eq(excellon.drills[1].point.y(), 50.8, 1e-9));
}

#[test]
fn test_excellon_tool_leading_zero_canonicalization() {
    let mut excellon = Excellon::new();
    excellon.parse_lines(vec![
        "M48",
        "INCH,LZ",
        "T01C0.02",
        "%",
        "T1",
        "X010000Y010000",
        "M30",
    ]);
    assert!(excellon.tools.contains_key("1"));
    assert_eq!(excellon.drills[0].tool, "1");
}

#[test]
fn test_excellon_transforms_rederive_geometry() {
    let mut excellon = Excellon::new();
    excellon.parse_lines(vec![
        "M48", "INCH,LZ", "T1C0.04", "%", "T1", "X010000Y010000", "M30",
    ]);
    excellon.create_geometry();

    excellon.offset(1.0, -0.5);
    assert!(approx_eq(excellon.drills[0].point.x(), 2.0, 1e-9));
    assert!(approx_eq(excellon.drills[0].point.y(), 0.5, 1e-9));

    excellon.mirror(crate::geometry::Axis::Y, (0.0, 0.0));
    assert!(approx_eq(excellon.drills[0].point.x(), -2.0, 1e-9));

    let [xmin, _, xmax, _] = excellon.bounds();
    assert!(approx_eq(0.5 * (xmin + xmax), -2.0, 1e-9));
}

#[test]
fn test_excellon_unit_conversion_round_trip() {
    let mut excellon = Excellon::new();
    excellon.parse_lines(vec![
        "M48", "INCH,LZ", "T1C0.04", "%", "T1", "X010000Y010000", "M30",
    ]);
    excellon.create_geometry();

    let factor = excellon.convert_units(Units::Mm);
    assert!(approx_eq(factor, 25.4, 1e-12));
    assert!(approx_eq(excellon.tools["1"].diameter, 0.04 * 25.4, 1e-9));
    assert!(approx_eq(excellon.drills[0].point.x(), 25.4, 1e-9));

    excellon.convert_units(Units::In);
    assert!((excellon.tools["1"].diameter - 0.04).abs() / 0.04 < 1e-9);
    assert!((excellon.drills[0].point.x() - 1.0).abs() < 1e-9);
}

// --------------------------------------------------------
//   CNC job
// --------------------------------------------------------

fn triangle_object() -> GeometryObject {
    let triangle = Polygon::new(
        geo::LineString::new(vec![
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 1.0, y: 0.0 },
            coord! { x: 0.0, y: 1.0 },
        ]),
        vec![],
    );
    let mut geo_obj = GeometryObject::new();
    geo_obj.push(Geometry::Polygon(triangle));
    geo_obj
}

#[test]
fn test_generate_from_geometry_prologue_and_body() {
    let mut job = CncJob::new();
    job.z_cut = -0.1;
    job.z_move = 0.1;
    job.feedrate = 5.0;
    job.generate_from_geometry(&triangle_object(), None, 0.0);

    let prologue = "G20\nG90\nG94\nF5.00\nG00 Z0.1000\nM03\nG04 P1\n";
    assert!(job.gcode.starts_with(prologue));

    let body = &job.gcode[prologue.len()..];
    let expected_body = "G00 X0.0000Y0.0000\n\
                         G01 Z-0.1000\n\
                         G01 X1.0000Y0.0000\n\
                         G01 X0.0000Y1.0000\n\
                         G01 X0.0000Y0.0000\n\
                         G00 Z0.1000\n";
    assert!(body.starts_with(expected_body));
    assert!(job.gcode.ends_with("G00 Z0.1000\nG00 X0Y0\nM05\n"));
    assert!(job.input_geometry_bounds.is_some());
}

#[test]
fn test_gcode_round_trip_unit_square() {
    let mut geo_obj = GeometryObject::new();
    geo_obj.push(Geometry::Polygon(unit_square()));

    let mut job = CncJob::new();
    job.z_cut = -0.1;
    job.z_move = 0.1;
    job.generate_from_geometry(&geo_obj, None, 0.0);
    job.gcode_parse();

    let cuts: Vec<_> = job
        .gcode_parsed
        .iter()
        .filter(|seg| seg.kind.motion == Motion::Cut && seg.kind.speed == Speed::Slow)
        .collect();
    assert_eq!(cuts.len(), 1);

    // Four edges closing the square.
    let ring = &cuts[0].geom.0;
    assert_eq!(ring.len(), 5);
    assert!(approx_eq(ring[0].x, ring[4].x, 1e-9));
    assert!(approx_eq(ring[0].y, ring[4].y, 1e-9));
    let max_x = ring.iter().map(|c| c.x).fold(Real::MIN, Real::max);
    assert!(approx_eq(max_x, 1.0, 1e-9));
}

#[test]
fn test_drill_job_from_excellon_by_tool() {
    let mut excellon = Excellon::new();
    excellon.parse_lines(vec![
        "M48",
        "INCH,LZ",
        "T1C0.04",
        "T2C0.1",
        "%",
        "T1",
        "X010000Y010000",
        "T2",
        "X020000Y010000",
        "M30",
    ]);

    let mut job = CncJob::new();
    job.z_cut = -0.1;
    job.z_move = 0.1;
    job.feedrate = 3.0;
    job.generate_from_excellon_by_tool(&excellon, "1").unwrap();

    assert_eq!(job.kind, JobKind::Drill);
    assert!(job.gcode.contains("G00 X1.0000Y1.0000\n"));
    assert!(!job.gcode.contains("G00 X2.0000Y1.0000\n"));
    assert!(job.gcode.contains("G01 Z-0.1000\nG01 Z0.1000\n"));
    assert!(job.gcode.ends_with("G00 X0Y0\nM05\n"));

    // "all" picks up both drills, in drill order.
    let mut all_job = CncJob::new();
    all_job.generate_from_excellon_by_tool(&excellon, "all").unwrap();
    let first = all_job.gcode.find("X1.0000Y1.0000").unwrap();
    let second = all_job.gcode.find("X2.0000Y1.0000").unwrap();
    assert!(first < second);
}

#[test]
fn test_drill_job_empty_selection_fails() {
    let excellon = Excellon::new();
    let mut job = CncJob::new();
    let result = job.generate_from_excellon_by_tool(&excellon, "7");
    assert!(matches!(result, Err(crate::errors::CamError::Usage(_))));
    assert!(job.gcode.is_empty());
}

#[test]
fn test_gcode_parse_arc() {
    // End-to-end scenario: an externally supplied CCW half circle.
    let mut job = CncJob::new();
    job.gcode = "G00 X1Y0\nG01 Z-0.1\nG03 X-1Y0I-1J0\n".to_string();
    job.gcode_parse();

    let cut = job
        .gcode_parsed
        .iter()
        .find(|seg| seg.kind.motion == Motion::Cut && seg.kind.speed == Speed::Slow)
        .expect("arc segment");

    // The path holds the start point plus steps_per_circle/2 + 1 arc
    // samples.
    let n = job.steps_per_circle / 2 + 1;
    assert_eq!(cut.geom.0.len(), 1 + n);
    let first_arc = cut.geom.0[1];
    let last = cut.geom.0[n];
    assert!(approx_eq(first_arc.x, 1.0, 1e-9));
    assert!(approx_eq(first_arc.y, 0.0, 1e-9));
    assert!(approx_eq(last.x, -1.0, 1e-9));
    assert!(approx_eq(last.y, 0.0, 1e-9));
}

#[test]
fn test_gcode_parse_units_and_comments() {
    let mut job = CncJob::new();
    job.units = Units::In;
    job.gcode = "G21 (metric now)\nG00 X1Y1\nG00 X2Y2\n".to_string();
    job.gcode_parse();
    assert_eq!(job.units, Units::Mm);
}

#[test]
fn test_cncjob_transforms_and_geometry() {
    let mut geo_obj = GeometryObject::new();
    geo_obj.push(Geometry::Polygon(unit_square()));

    let mut job = CncJob::new();
    job.z_cut = -0.1;
    job.z_move = 0.1;
    job.generate_from_geometry(&geo_obj, Some(0.05), 0.0);
    job.gcode_parse();
    job.create_geometry();

    let before = job.bounds();
    job.offset(1.0, 0.0);
    let after = job.bounds();
    assert!(approx_eq(after[0], before[0] + 1.0, 1e-9));

    let factor = job.convert_units(Units::Mm);
    assert!(approx_eq(factor, 25.4, 1e-12));
    assert!(approx_eq(job.z_cut, -0.1 * 25.4, 1e-9));
    assert!(approx_eq(job.tooldia, 0.05 * 25.4, 1e-9));
}

#[test]
fn test_export_gcode_postamble() {
    let mut job = CncJob::new();
    job.gcode = "G20\nM05\n".to_string();
    assert_eq!(job.export_gcode(None), "G20\nM05\n");
    assert_eq!(job.export_gcode(Some("M30")), "G20\nM05\n\nM30");
}

// --------------------------------------------------------
//   Serialization
// --------------------------------------------------------

#[test]
fn test_gerber_serialization_round_trip() {
    let mut gerber = Gerber::new();
    gerber.parse_lines(vec![
        "%FSLAX24Y24*%",
        "%MOIN*%",
        "%AMCIRC*1,1,$1,$2,$3*%",
        "%ADD10CIRC,0.2X0.5X0.5*%",
        "%ADD11R,0.1X0.2*%",
        "D11*",
        "X0Y0D03*",
        "M02*",
    ]);

    let value = gerber.to_value();
    let mut restored = Gerber::new();
    restored.from_value(&value).unwrap();

    assert_eq!(restored.units, gerber.units);
    assert_eq!(restored.frac_digits, 4);
    assert_eq!(restored.apertures, gerber.apertures);
    assert_eq!(restored.aperture_macros, gerber.aperture_macros);
    assert!(approx_eq(total_area(&restored), total_area(&gerber), 1e-9));
}

#[test]
fn test_excellon_serialization_round_trip() {
    let mut excellon = Excellon::new();
    excellon.parse_lines(vec![
        "M48", "INCH,LZ", "T1C0.04", "%", "T1", "X010000Y010000", "M30",
    ]);
    excellon.create_geometry();

    let value = excellon.to_value();
    let mut restored = Excellon::new();
    restored.from_value(&value).unwrap();

    assert_eq!(restored.units, excellon.units);
    assert_eq!(restored.zeros, excellon.zeros);
    assert_eq!(restored.tools["1"], excellon.tools["1"]);
    assert_eq!(restored.drills, excellon.drills);
}

#[test]
fn test_geometry_object_serialization_round_trip() {
    let mut geo_obj = GeometryObject::new();
    geo_obj.push(Geometry::Polygon(unit_square()));
    geo_obj.push(Geometry::Point(Point::new(2.0, 3.0)));

    let value = geo_obj.to_value();
    let mut restored = GeometryObject::new();
    restored.from_value(&value).unwrap();

    assert_eq!(restored.units, geo_obj.units);
    assert_eq!(restored.solid_geometry.0.len(), 2);
    assert!(matches!(restored.solid_geometry.0[1], Geometry::Point(p) if p == Point::new(2.0, 3.0)));
}

#[test]
fn test_cncjob_serialization_round_trip() {
    let mut geo_obj = GeometryObject::new();
    geo_obj.push(Geometry::Polygon(unit_square()));

    let mut job = CncJob::new();
    job.generate_from_geometry(&geo_obj, Some(0.02), 0.0);
    job.gcode_parse();
    job.create_geometry();

    let value = job.to_value();
    let mut restored = CncJob::new();
    restored.from_value(&value).unwrap();

    assert_eq!(restored.gcode, job.gcode);
    assert_eq!(restored.kind, job.kind);
    assert!(approx_eq(restored.tooldia, job.tooldia, 1e-12));
    assert_eq!(restored.gcode_parsed.len(), job.gcode_parsed.len());
    for (a, b) in restored.gcode_parsed.iter().zip(job.gcode_parsed.iter()) {
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.geom, b.geom);
    }
    assert_eq!(restored.input_geometry_bounds, job.input_geometry_bounds);
}

#[test]
fn test_geometry_envelope_shape() {
    let value = crate::serialize::geometry_to_value(&Geometry::Point(Point::new(1.0, 2.0)));
    assert_eq!(value["class"], "Shply");
    assert!(value["inst"].as_str().unwrap().starts_with("POINT"));

    let restored = crate::serialize::geometry_from_value(&value).unwrap();
    assert!(matches!(restored, Geometry::Point(p) if p == Point::new(1.0, 2.0)));

    assert!(crate::serialize::geometry_from_value(&serde_json::json!({
        "class": "Nope",
        "inst": "POINT(0 0)",
    }))
    .is_err());
}

// --------------------------------------------------------
//   Object surface
// --------------------------------------------------------

#[test]
fn test_isolation_geometry_grows_area() {
    let mut geo_obj = GeometryObject::new();
    geo_obj.push(Geometry::Polygon(unit_square()));

    let iso = geo_obj.isolation_geometry(0.05);
    assert!(iso.unsigned_area() > 1.0);

    let shrunk = geo_obj.isolation_geometry(-0.05);
    assert!(approx_eq(shrunk.unsigned_area(), 0.81, 1e-4));
}

#[test]
fn test_get_empty_area_complements() {
    let mut geo_obj = GeometryObject::new();
    geo_obj.push(Geometry::Polygon(unit_square()));

    let boundary = shapes::rect(-1.0, -1.0, 2.0, 2.0);
    let empty = geo_obj.get_empty_area(Some(boundary));
    assert!(approx_eq(empty.unsigned_area(), 9.0 - 1.0, 1e-9));
}

#[test]
fn test_units_parsing_and_factor() {
    assert_eq!("IN".parse::<Units>().unwrap(), Units::In);
    assert_eq!("mm".parse::<Units>().unwrap(), Units::Mm);
    assert!("furlong".parse::<Units>().is_err());

    assert!(approx_eq(Units::In.factor_to(Units::Mm), 25.4, 1e-12));
    assert!(approx_eq(Units::Mm.factor_to(Units::In), 1.0 / 25.4, 1e-12));
    assert!(approx_eq(Units::In.factor_to(Units::In), 1.0, 1e-12));
    assert_eq!(Units::In.gcode_word(), "G20");
    assert_eq!(Units::Mm.gcode_word(), "G21");
}
