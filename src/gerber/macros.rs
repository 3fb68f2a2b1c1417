//! Aperture-macro engine.
//!
//! A macro body is a `*`-separated list of parts: comments (`0 …`),
//! variable assignments (`$n=<expr>`) and primitives (`<code>,<expr>,…`).
//! Expressions are evaluated by a small interpreter; host evaluation is
//! never used. On instantiation the definition-time modifiers are bound to
//! `$1…$N`, the body is re-parsed under those bindings, and the primitive
//! shapes are composed left to right under their exposure polarity.

use crate::errors::CamError;
use crate::float_types::{Real, DEFAULT_CIRCLE_STEPS, EPSILON};
use crate::geometry::{rotated, shapes, union_all, CapStyle};
use geo::{coord, BooleanOps, Coord, LineString, MultiPolygon};
use hashbrown::HashMap;
use regex::Regex;
use std::sync::LazyLock;

static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$([0-9a-zA-Z]+)=(.*)$").unwrap());

/// A named aperture macro. Only the name and the raw body are retained;
/// primitives are re-derived at every instantiation because the modifiers
/// feed the body's expressions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApertureMacro {
    pub name: String,
    pub raw: String,
}

impl ApertureMacro {
    pub fn new(name: impl Into<String>) -> Self {
        ApertureMacro {
            name: name.into(),
            raw: String::new(),
        }
    }

    /// Append a chunk of the textual definition.
    pub fn append(&mut self, data: &str) {
        self.raw.push_str(data);
    }

    /// Evaluate the body under `locvars`, producing one numeric row per
    /// primitive. Assignments extend `locvars` as they are encountered.
    fn parse_primitives(&self, locvars: &mut HashMap<String, Real>) -> Vec<Vec<Real>> {
        let cleaned = self.raw.replace(['\n', '\r'], "");
        let cleaned = cleaned.trim_matches([' ', '*']);

        let mut primitives = Vec::new();
        for part in cleaned.split('*') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            // Comment.
            if part.starts_with('0') {
                continue;
            }

            // Variable assignment.
            if let Some(caps) = VAR_RE.captures(part) {
                match evaluate(&caps[2], locvars) {
                    Ok(value) => {
                        locvars.insert(caps[1].to_string(), value);
                    }
                    Err(err) => {
                        log::warn!("bad assignment in aperture macro {:?}: {err}", self.name)
                    }
                }
                continue;
            }

            // Primitive: code, then one expression per modifier.
            if part.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                let mut values = Vec::new();
                let mut ok = true;
                for field in part.split(',') {
                    match evaluate(field, locvars) {
                        Ok(value) => values.push(value),
                        Err(err) => {
                            log::warn!(
                                "bad primitive field in aperture macro {:?}: {err}",
                                self.name
                            );
                            ok = false;
                            break;
                        }
                    }
                }
                if ok && !values.is_empty() {
                    primitives.push(values);
                }
                continue;
            }

            log::warn!("unknown syntax of aperture macro part: {part}");
        }
        primitives
    }

    /// Run the macro for the given modifiers and compose the resulting
    /// region. Returns `None` when no dark primitive contributed.
    pub fn build_geometry(&self, modifiers: &[String]) -> Option<MultiPolygon<Real>> {
        let mut locvars: HashMap<String, Real> = HashMap::new();
        for (i, modifier) in modifiers.iter().enumerate() {
            let value = match modifier.trim().parse::<Real>() {
                Ok(v) => v,
                Err(_) => {
                    log::warn!(
                        "non-numeric modifier {modifier:?} for aperture macro {:?}",
                        self.name
                    );
                    0.0
                }
            };
            locvars.insert((i + 1).to_string(), value);
        }

        let mut geometry: Option<MultiPolygon<Real>> = None;
        for primitive in self.parse_primitives(&mut locvars) {
            let code = primitive[0] as i64;
            let made = match code {
                1 => make_circle(&primitive[1..]),
                2 | 20 => make_vector_line(&primitive[1..]),
                21 => make_center_line(&primitive[1..]),
                22 => make_lower_left_line(&primitive[1..]),
                4 => make_outline(&primitive[1..]),
                5 => make_polygon(&primitive[1..]),
                6 => make_moire(&primitive[1..]),
                7 => make_thermal(&primitive[1..]),
                other => {
                    log::warn!("aperture macro primitive {other} not implemented");
                    None
                }
            };
            let Some((exposure, shape)) = made else {
                continue;
            };

            geometry = match (geometry, exposure) {
                (None, 1) => Some(shape),
                (Some(acc), 1) => Some(acc.union(&shape)),
                (Some(acc), 0) => Some(acc.difference(&shape)),
                (acc, 0) => acc,
                (acc, other) => {
                    log::warn!("macro primitive with exposure {other} ignored");
                    acc
                }
            };
        }
        geometry
    }
}

// ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
// Expression language
// ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Real),
    Var(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, CamError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = text.parse::<Real>().map_err(|_| {
                    CamError::InputMalformed(format!("bad number {text:?} in {input:?}"))
                })?;
                tokens.push(Token::Number(value));
            }
            '$' => {
                chars.next();
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(CamError::InputMalformed(format!(
                        "dangling '$' in {input:?}"
                    )));
                }
                tokens.push(Token::Var(name));
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            // `x`/`X` are the multiplication signs of the macro language.
            'x' | 'X' | '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            other => {
                return Err(CamError::InputMalformed(format!(
                    "unexpected {other:?} in {input:?}"
                )));
            }
        }
    }
    Ok(tokens)
}

struct ExprParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    vars: &'a HashMap<String, Real>,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // expr := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<Real, CamError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.next();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<Real, CamError> {
        let mut value = self.factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    value *= self.factor()?;
                }
                Some(Token::Slash) => {
                    self.next();
                    value /= self.factor()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // factor := ('+' | '-') factor | number | var | '(' expr ')'
    fn factor(&mut self) -> Result<Real, CamError> {
        match self.next() {
            Some(Token::Plus) => self.factor(),
            Some(Token::Minus) => Ok(-self.factor()?),
            Some(Token::Number(value)) => Ok(value),
            // Unknown variables evaluate to zero.
            Some(Token::Var(name)) => Ok(self.vars.get(&name).copied().unwrap_or(0.0)),
            Some(Token::LParen) => {
                let value = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(CamError::InputMalformed("unbalanced parentheses".into())),
                }
            }
            other => Err(CamError::InputMalformed(format!(
                "unexpected token {other:?}"
            ))),
        }
    }
}

/// Evaluate one macro expression under the given variable bindings.
pub fn evaluate(expr: &str, vars: &HashMap<String, Real>) -> Result<Real, CamError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(CamError::InputMalformed(format!("empty expression {expr:?}")));
    }
    let mut parser = ExprParser { tokens, pos: 0, vars };
    let value = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(CamError::InputMalformed(format!(
            "trailing input in expression {expr:?}"
        )));
    }
    Ok(value)
}

// ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
// Primitive builders
// ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
//
// Each returns (exposure, shape) with the shape at the macro-local origin;
// the caller translates to the flash location. Omitted trailing modifiers
// default to zero.

const ORIGIN: Coord<Real> = Coord { x: 0.0, y: 0.0 };

fn pad(mods: &[Real], n: usize) -> Vec<Real> {
    let mut out = vec![0.0; n];
    for (slot, &value) in out.iter_mut().zip(mods.iter()) {
        *slot = value;
    }
    out
}

/// `1`: exposure, diameter, x, y.
fn make_circle(mods: &[Real]) -> Option<(i64, MultiPolygon<Real>)> {
    let m = pad(mods, 4);
    let (pol, dia, x, y) = (m[0], m[1], m[2], m[3]);
    Some((
        pol as i64,
        MultiPolygon(vec![shapes::disk(coord! { x: x, y: y }, dia / 2.0, DEFAULT_CIRCLE_STEPS)]),
    ))
}

/// `2`/`20`: exposure, width, xs, ys, xe, ye, rotation.
fn make_vector_line(mods: &[Real]) -> Option<(i64, MultiPolygon<Real>)> {
    let m = pad(mods, 7);
    let (pol, width, xs, ys, xe, ye, angle) = (m[0], m[1], m[2], m[3], m[4], m[5], m[6]);
    let line = LineString::new(vec![coord! { x: xs, y: ys }, coord! { x: xe, y: ye }]);
    let swath = shapes::stroke(&line, width / 2.0, CapStyle::Flat, DEFAULT_CIRCLE_STEPS);
    Some((pol as i64, rotated(&swath, angle, ORIGIN)))
}

/// `21`: exposure, width, height, x-center, y-center, rotation.
fn make_center_line(mods: &[Real]) -> Option<(i64, MultiPolygon<Real>)> {
    let m = pad(mods, 6);
    let (pol, width, height, x, y, angle) = (m[0], m[1], m[2], m[3], m[4], m[5]);
    let swath = MultiPolygon(vec![shapes::rect(
        x - width / 2.0,
        y - height / 2.0,
        x + width / 2.0,
        y + height / 2.0,
    )]);
    Some((pol as i64, rotated(&swath, angle, ORIGIN)))
}

/// `22`: exposure, width, height, x-lower-left, y-lower-left, rotation.
fn make_lower_left_line(mods: &[Real]) -> Option<(i64, MultiPolygon<Real>)> {
    let m = pad(mods, 6);
    let (pol, width, height, x, y, angle) = (m[0], m[1], m[2], m[3], m[4], m[5]);
    let swath = MultiPolygon(vec![shapes::rect(x, y, x + width, y + height)]);
    Some((pol as i64, rotated(&swath, angle, ORIGIN)))
}

/// `4`: exposure, n, (x0,y0) … (xn,yn), rotation. The last vertex repeats
/// the first to close the outline.
fn make_outline(mods: &[Real]) -> Option<(i64, MultiPolygon<Real>)> {
    if mods.len() < 2 {
        log::warn!("outline primitive with missing point count");
        return None;
    }
    let pol = mods[0] as i64;
    let n = mods[1] as usize;
    if mods.len() < 2 * n + 5 {
        log::warn!("outline primitive with too few coordinates");
        return None;
    }

    let points: Vec<Coord<Real>> = (0..=n)
        .map(|i| coord! { x: mods[2 * i + 2], y: mods[2 * i + 3] })
        .collect();
    let angle = mods[2 * n + 4];

    let poly = geo::Polygon::new(LineString::new(points), vec![]);
    Some((pol, rotated(&MultiPolygon(vec![poly]), angle, ORIGIN)))
}

/// `5`: exposure, n in [3, 12], x-center, y-center, diameter, rotation.
fn make_polygon(mods: &[Real]) -> Option<(i64, MultiPolygon<Real>)> {
    let m = pad(mods, 6);
    let (pol, nverts, x, y, dia, angle) = (m[0], m[1], m[2], m[3], m[4], m[5]);
    let poly = shapes::regular_polygon(coord! { x: x, y: y }, dia / 2.0, nverts as usize);
    Some((pol as i64, rotated(&MultiPolygon(vec![poly]), angle, ORIGIN)))
}

/// `6`: x, y, outer diameter, ring thickness, gap, max rings, crosshair
/// thickness, crosshair length, rotation. Always dark.
fn make_moire(mods: &[Real]) -> Option<(i64, MultiPolygon<Real>)> {
    let m = pad(mods, 9);
    let (x, y, dia, thickness, gap, nrings, cross_th, cross_len, angle) =
        (m[0], m[1], m[2], m[3], m[4], m[5] as i64, m[6], m[7], m[8]);
    let center = coord! { x: x, y: y };

    let mut r = dia / 2.0 - thickness / 2.0;
    let mut parts = vec![shapes::ring(
        center,
        r + thickness / 2.0,
        r - thickness / 2.0,
        DEFAULT_CIRCLE_STEPS,
    )];
    let mut has_interior = r - thickness / 2.0 > EPSILON;
    let mut i = 1;

    // Once a ring collapses into a disk there is nothing left inside it.
    while has_interior && i < nrings {
        r -= thickness + gap;
        if r <= 0.0 {
            break;
        }
        parts.push(shapes::ring(
            center,
            r + thickness / 2.0,
            r - thickness / 2.0,
            DEFAULT_CIRCLE_STEPS,
        ));
        has_interior = r - thickness / 2.0 > EPSILON;
        i += 1;
    }

    let hor = LineString::new(vec![
        coord! { x: x - cross_len, y: y },
        coord! { x: x + cross_len, y: y },
    ]);
    let ver = LineString::new(vec![
        coord! { x: x, y: y - cross_len },
        coord! { x: x, y: y + cross_len },
    ]);
    parts.push(shapes::stroke(&hor, cross_th / 2.0, CapStyle::Flat, DEFAULT_CIRCLE_STEPS));
    parts.push(shapes::stroke(&ver, cross_th / 2.0, CapStyle::Flat, DEFAULT_CIRCLE_STEPS));

    let result = union_all(parts);
    Some((1, rotated(&result, angle, ORIGIN)))
}

/// `7`: x, y, outer diameter, inner diameter, gap thickness, rotation.
/// Always dark.
fn make_thermal(mods: &[Real]) -> Option<(i64, MultiPolygon<Real>)> {
    let m = pad(mods, 6);
    let (x, y, dout, din, t, angle) = (m[0], m[1], m[2], m[3], m[4], m[5]);
    let center = coord! { x: x, y: y };

    let annulus = shapes::ring(center, dout / 2.0, din / 2.0, DEFAULT_CIRCLE_STEPS);
    let hline = LineString::new(vec![
        coord! { x: x - dout / 2.0, y: y },
        coord! { x: x + dout / 2.0, y: y },
    ]);
    let vline = LineString::new(vec![
        coord! { x: x, y: y - dout / 2.0 },
        coord! { x: x, y: y + dout / 2.0 },
    ]);
    let bars = shapes::stroke(&hline, t / 2.0, CapStyle::Square, DEFAULT_CIRCLE_STEPS)
        .union(&shapes::stroke(&vline, t / 2.0, CapStyle::Square, DEFAULT_CIRCLE_STEPS));

    let thermal = annulus.difference(&bars);
    Some((1, rotated(&thermal, angle, ORIGIN)))
}
