//! JSON-compatible serialization of the core objects.
//!
//! Every object flattens to a map of its serializable attributes.
//! Geometry travels as WKT inside a tagged envelope
//! `{"class": "Shply", "inst": "<wkt>"}`; aperture macros as
//! `{"class": "ApertureMacro", "inst": {"name", "raw"}}`. Deserialization
//! is the exact inverse and fails with `InputMalformed` on any shape
//! mismatch.

use crate::cncjob::{CncJob, CutSegment, SegmentKind};
use crate::errors::CamError;
use crate::excellon::{Drill, Excellon, Tool, ZeroSuppression};
use crate::float_types::Real;
use crate::geometry::{GeometryObject, Units};
use crate::gerber::{Aperture, ApertureMacro, Gerber};
use geo::{Geometry, GeometryCollection, Point};
use serde_json::{json, Map, Value};
use wkt::{ToWkt, TryFromWkt};

/// Wrap one geometry in its WKT envelope.
pub fn geometry_to_value(geometry: &Geometry<Real>) -> Value {
    json!({
        "class": "Shply",
        "inst": geometry.wkt_string(),
    })
}

/// Unwrap a WKT envelope.
pub fn geometry_from_value(value: &Value) -> Result<Geometry<Real>, CamError> {
    let class = value
        .get("class")
        .and_then(Value::as_str)
        .ok_or_else(|| CamError::InputMalformed("geometry envelope without class".into()))?;
    if class != "Shply" {
        return Err(CamError::InputMalformed(format!(
            "unexpected envelope class {class:?}"
        )));
    }
    let inst = value
        .get("inst")
        .and_then(Value::as_str)
        .ok_or_else(|| CamError::InputMalformed("geometry envelope without inst".into()))?;
    Geometry::try_from_wkt_str(inst)
        .map_err(|_| CamError::InputMalformed(format!("unparsable WKT {inst:?}")))
}

pub fn collection_to_value(collection: &GeometryCollection<Real>) -> Value {
    Value::Array(collection.iter().map(geometry_to_value).collect())
}

pub fn collection_from_value(value: &Value) -> Result<GeometryCollection<Real>, CamError> {
    let list = value
        .as_array()
        .ok_or_else(|| CamError::InputMalformed("solid_geometry must be a list".into()))?;
    let geoms = list
        .iter()
        .map(geometry_from_value)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(GeometryCollection(geoms))
}

pub fn macro_to_value(am: &ApertureMacro) -> Value {
    json!({
        "class": "ApertureMacro",
        "inst": { "name": am.name, "raw": am.raw },
    })
}

pub fn macro_from_value(value: &Value) -> Result<ApertureMacro, CamError> {
    let class = value.get("class").and_then(Value::as_str);
    if class != Some("ApertureMacro") {
        return Err(CamError::InputMalformed(format!(
            "unexpected envelope class {class:?}"
        )));
    }
    let inst = value
        .get("inst")
        .ok_or_else(|| CamError::InputMalformed("macro envelope without inst".into()))?;
    Ok(ApertureMacro {
        name: get_str(inst, "name")?.to_string(),
        raw: get_str(inst, "raw")?.to_string(),
    })
}

fn aperture_to_value(aperture: &Aperture) -> Value {
    match aperture {
        Aperture::Circle { size } => json!({ "type": "C", "size": size }),
        Aperture::Rectangle { width, height } => {
            json!({ "type": "R", "width": width, "height": height })
        }
        Aperture::Obround { width, height } => {
            json!({ "type": "O", "width": width, "height": height })
        }
        Aperture::Polygon { diam, n_vertices, rotation } => {
            let mut map = Map::new();
            map.insert("type".into(), json!("P"));
            map.insert("diam".into(), json!(diam));
            map.insert("nVertices".into(), json!(n_vertices));
            if let Some(rot) = rotation {
                map.insert("rotation".into(), json!(rot));
            }
            Value::Object(map)
        }
        // Macros are referenced by name within the owning object.
        Aperture::Macro { name, modifiers } => {
            json!({ "type": "AM", "macro": name, "modifiers": modifiers })
        }
    }
}

fn aperture_from_value(value: &Value) -> Result<Aperture, CamError> {
    match get_str(value, "type")? {
        "C" => Ok(Aperture::Circle { size: get_f64(value, "size")? }),
        "R" => Ok(Aperture::Rectangle {
            width: get_f64(value, "width")?,
            height: get_f64(value, "height")?,
        }),
        "O" => Ok(Aperture::Obround {
            width: get_f64(value, "width")?,
            height: get_f64(value, "height")?,
        }),
        "P" => Ok(Aperture::Polygon {
            diam: get_f64(value, "diam")?,
            n_vertices: get_f64(value, "nVertices")? as usize,
            rotation: value.get("rotation").and_then(Value::as_f64),
        }),
        "AM" => {
            let modifiers = value
                .get("modifiers")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Ok(Aperture::Macro {
                name: get_str(value, "macro")?.to_string(),
                modifiers,
            })
        }
        other => Err(CamError::InputMalformed(format!(
            "unknown aperture type {other:?}"
        ))),
    }
}

fn get_str<'a>(value: &'a Value, key: &str) -> Result<&'a str, CamError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CamError::InputMalformed(format!("missing string field {key:?}")))
}

fn get_f64(value: &Value, key: &str) -> Result<Real, CamError> {
    value
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| CamError::InputMalformed(format!("missing numeric field {key:?}")))
}

fn get_units(value: &Value) -> Result<Units, CamError> {
    let units = value
        .get("units")
        .ok_or_else(|| CamError::InputMalformed("missing units".into()))?;
    serde_json::from_value(units.clone())
        .map_err(|_| CamError::InputMalformed(format!("bad units {units}")))
}

impl Gerber {
    pub fn to_value(&self) -> Value {
        let apertures: Map<String, Value> = self
            .apertures
            .iter()
            .map(|(id, ap)| (id.clone(), aperture_to_value(ap)))
            .collect();
        let macros: Map<String, Value> = self
            .aperture_macros
            .iter()
            .map(|(name, am)| (name.clone(), macro_to_value(am)))
            .collect();
        json!({
            "units": self.units,
            "int_digits": self.int_digits,
            "frac_digits": self.frac_digits,
            "apertures": apertures,
            "aperture_macros": macros,
            "solid_geometry": collection_to_value(&self.solid_geometry),
        })
    }

    pub fn from_value(&mut self, value: &Value) -> Result<(), CamError> {
        self.units = get_units(value)?;
        self.int_digits = get_f64(value, "int_digits")? as u8;
        self.frac_digits = get_f64(value, "frac_digits")? as u8;

        self.apertures.clear();
        let apertures = value
            .get("apertures")
            .and_then(Value::as_object)
            .ok_or_else(|| CamError::InputMalformed("missing apertures".into()))?;
        for (id, ap) in apertures {
            self.apertures.insert(id.clone(), aperture_from_value(ap)?);
        }

        self.aperture_macros.clear();
        let macros = value
            .get("aperture_macros")
            .and_then(Value::as_object)
            .ok_or_else(|| CamError::InputMalformed("missing aperture_macros".into()))?;
        for (name, am) in macros {
            self.aperture_macros.insert(name.clone(), macro_from_value(am)?);
        }

        self.solid_geometry = collection_from_value(
            value
                .get("solid_geometry")
                .ok_or_else(|| CamError::InputMalformed("missing solid_geometry".into()))?,
        )?;
        Ok(())
    }
}

impl Excellon {
    pub fn to_value(&self) -> Value {
        let tools: Map<String, Value> = self
            .tools
            .iter()
            .map(|(name, tool)| (name.clone(), json!({ "C": tool.diameter })))
            .collect();
        let drills: Vec<Value> = self
            .drills
            .iter()
            .map(|d| {
                json!({
                    "point": geometry_to_value(&Geometry::Point(d.point)),
                    "tool": d.tool,
                })
            })
            .collect();
        let zeros = match self.zeros {
            ZeroSuppression::L => "L",
            ZeroSuppression::T => "T",
        };
        json!({
            "units": self.units,
            "zeros": zeros,
            "tools": tools,
            "drills": drills,
            "solid_geometry": collection_to_value(&self.solid_geometry),
        })
    }

    pub fn from_value(&mut self, value: &Value) -> Result<(), CamError> {
        self.units = get_units(value)?;
        self.zeros = match get_str(value, "zeros")? {
            "L" => ZeroSuppression::L,
            "T" => ZeroSuppression::T,
            other => {
                return Err(CamError::InputMalformed(format!(
                    "bad zero suppression {other:?}"
                )))
            }
        };

        self.tools.clear();
        let tools = value
            .get("tools")
            .and_then(Value::as_object)
            .ok_or_else(|| CamError::InputMalformed("missing tools".into()))?;
        for (name, spec) in tools {
            self.tools.insert(name.clone(), Tool { diameter: get_f64(spec, "C")? });
        }

        self.drills.clear();
        let drills = value
            .get("drills")
            .and_then(Value::as_array)
            .ok_or_else(|| CamError::InputMalformed("missing drills".into()))?;
        for entry in drills {
            let point = match geometry_from_value(
                entry
                    .get("point")
                    .ok_or_else(|| CamError::InputMalformed("drill without point".into()))?,
            )? {
                Geometry::Point(p) => p,
                other => {
                    return Err(CamError::InputMalformed(format!(
                        "drill point is not a point: {other:?}"
                    )))
                }
            };
            self.drills.push(Drill {
                point: Point::new(point.x(), point.y()),
                tool: get_str(entry, "tool")?.to_string(),
            });
        }

        self.solid_geometry = collection_from_value(
            value
                .get("solid_geometry")
                .ok_or_else(|| CamError::InputMalformed("missing solid_geometry".into()))?,
        )?;
        Ok(())
    }
}

impl GeometryObject {
    pub fn to_value(&self) -> Value {
        json!({
            "units": self.units,
            "solid_geometry": collection_to_value(&self.solid_geometry),
        })
    }

    pub fn from_value(&mut self, value: &Value) -> Result<(), CamError> {
        self.units = get_units(value)?;
        self.solid_geometry = collection_from_value(
            value
                .get("solid_geometry")
                .ok_or_else(|| CamError::InputMalformed("missing solid_geometry".into()))?,
        )?;
        Ok(())
    }
}

impl CncJob {
    pub fn to_value(&self) -> Value {
        let parsed: Vec<Value> = self
            .gcode_parsed
            .iter()
            .map(|segment| {
                json!({
                    "geom": geometry_to_value(&Geometry::LineString(segment.geom.clone())),
                    "kind": segment.kind.code(),
                })
            })
            .collect();
        json!({
            "units": self.units,
            "kind": self.kind.to_string(),
            "z_cut": self.z_cut,
            "z_move": self.z_move,
            "feedrate": self.feedrate,
            "tooldia": self.tooldia,
            "steps_per_circle": self.steps_per_circle,
            "gcode": self.gcode,
            "input_geometry_bounds": self.input_geometry_bounds,
            "gcode_parsed": parsed,
            "solid_geometry": collection_to_value(&self.solid_geometry),
        })
    }

    pub fn from_value(&mut self, value: &Value) -> Result<(), CamError> {
        self.units = get_units(value)?;
        self.kind = get_str(value, "kind")?
            .parse()
            .map_err(|_| CamError::InputMalformed("bad job kind".into()))?;
        self.z_cut = get_f64(value, "z_cut")?;
        self.z_move = get_f64(value, "z_move")?;
        self.feedrate = get_f64(value, "feedrate")?;
        self.tooldia = get_f64(value, "tooldia")?;
        self.steps_per_circle = get_f64(value, "steps_per_circle")? as usize;
        self.gcode = get_str(value, "gcode")?.to_string();

        self.input_geometry_bounds = match value.get("input_geometry_bounds") {
            Some(Value::Null) | None => None,
            Some(bounds) => {
                let list = bounds.as_array().ok_or_else(|| {
                    CamError::InputMalformed("bad input_geometry_bounds".into())
                })?;
                let nums = list
                    .iter()
                    .map(|v| v.as_f64())
                    .collect::<Option<Vec<_>>>()
                    .filter(|v| v.len() == 4)
                    .ok_or_else(|| {
                        CamError::InputMalformed("bad input_geometry_bounds".into())
                    })?;
                Some([nums[0], nums[1], nums[2], nums[3]])
            }
        };

        self.gcode_parsed.clear();
        let parsed = value
            .get("gcode_parsed")
            .and_then(Value::as_array)
            .ok_or_else(|| CamError::InputMalformed("missing gcode_parsed".into()))?;
        for entry in parsed {
            let geom = match geometry_from_value(
                entry
                    .get("geom")
                    .ok_or_else(|| CamError::InputMalformed("segment without geom".into()))?,
            )? {
                Geometry::LineString(ls) => ls,
                other => {
                    return Err(CamError::InputMalformed(format!(
                        "segment geometry is not a line string: {other:?}"
                    )))
                }
            };
            let kind = SegmentKind::from_code(get_str(entry, "kind")?).ok_or_else(|| {
                CamError::InputMalformed("bad segment kind".into())
            })?;
            self.gcode_parsed.push(CutSegment { geom, kind });
        }

        self.solid_geometry = collection_from_value(
            value
                .get("solid_geometry")
                .ok_or_else(|| CamError::InputMalformed("missing solid_geometry".into()))?,
        )?;
        Ok(())
    }
}
