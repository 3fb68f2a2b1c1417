//! Aperture table entries and flash geometry.

use crate::float_types::{Real, DEFAULT_CIRCLE_STEPS, TAU};
use crate::geometry::{rotated, shapes, translated};
use crate::gerber::macros::ApertureMacro;
use geo::{coord, ConvexHull, Coord, LineString, MultiPolygon, Polygon};
use hashbrown::HashMap;

/// One entry of the aperture table.
///
/// The standard apertures carry their dimensions; a macro aperture carries
/// the macro name (resolved against the owning object's macro dictionary)
/// and the raw modifier strings from the definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Aperture {
    Circle {
        size: Real,
    },
    Rectangle {
        width: Real,
        height: Real,
    },
    Obround {
        width: Real,
        height: Real,
    },
    Polygon {
        diam: Real,
        n_vertices: usize,
        rotation: Option<Real>,
    },
    Macro {
        name: String,
        modifiers: Vec<String>,
    },
}

impl Aperture {
    /// The single-letter type tag used by `%AD` and by serialization.
    pub fn type_code(&self) -> &'static str {
        match self {
            Aperture::Circle { .. } => "C",
            Aperture::Rectangle { .. } => "R",
            Aperture::Obround { .. } => "O",
            Aperture::Polygon { .. } => "P",
            Aperture::Macro { .. } => "AM",
        }
    }

    /// Width of a stroke drawn with this aperture. Only circles stroke.
    pub fn stroke_width(&self) -> Option<Real> {
        match self {
            Aperture::Circle { size } => Some(*size),
            _ => None,
        }
    }
}

/// Area stamped by flashing `aperture` at `location`.
///
/// Macro apertures are instantiated at the origin and translated here;
/// everything else is built in place.
pub fn create_flash_geometry(
    location: Coord<Real>,
    aperture: &Aperture,
    macros: &HashMap<String, ApertureMacro>,
) -> Option<MultiPolygon<Real>> {
    match aperture {
        Aperture::Circle { size } => Some(MultiPolygon(vec![shapes::disk(
            location,
            size / 2.0,
            DEFAULT_CIRCLE_STEPS,
        )])),

        Aperture::Rectangle { width, height } => Some(MultiPolygon(vec![shapes::rect(
            location.x - width / 2.0,
            location.y - height / 2.0,
            location.x + width / 2.0,
            location.y + height / 2.0,
        )])),

        Aperture::Obround { width, height } => {
            let (c1, c2, radius) = if width > height {
                (
                    coord! { x: location.x + 0.5 * (width - height), y: location.y },
                    coord! { x: location.x - 0.5 * (width - height), y: location.y },
                    height * 0.5,
                )
            } else {
                (
                    coord! { x: location.x, y: location.y + 0.5 * (height - width) },
                    coord! { x: location.x, y: location.y - 0.5 * (height - width) },
                    width * 0.5,
                )
            };
            let ends = MultiPolygon(vec![
                shapes::disk(c1, radius, DEFAULT_CIRCLE_STEPS),
                shapes::disk(c2, radius, DEFAULT_CIRCLE_STEPS),
            ]);
            Some(MultiPolygon(vec![ends.convex_hull()]))
        }

        Aperture::Polygon { diam, n_vertices, rotation } => {
            // Compatibility quirk: `diam` is used as the circumscribed-circle
            // radius, not as a diameter.
            let n = (*n_vertices).max(3);
            let mut coords: Vec<Coord<Real>> = (0..n)
                .map(|i| {
                    let theta = TAU * (i as Real) / (n as Real);
                    coord! {
                        x: location.x + diam * theta.cos(),
                        y: location.y + diam * theta.sin(),
                    }
                })
                .collect();
            coords.push(coords[0]);
            let mut poly = Polygon::new(LineString::new(coords), vec![]);
            if let Some(rot) = rotation {
                poly = rotated(&poly, *rot, location);
            }
            Some(MultiPolygon(vec![poly]))
        }

        Aperture::Macro { name, modifiers } => {
            let Some(am) = macros.get(name) else {
                log::warn!("flash references undefined aperture macro {name:?}");
                return None;
            };
            let Some(flash) = am.build_geometry(modifiers) else {
                log::warn!("aperture macro {name:?} produced no geometry");
                return None;
            };
            Some(translated(&flash, location.x, location.y))
        }
    }
}
