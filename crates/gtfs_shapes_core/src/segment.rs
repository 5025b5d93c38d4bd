//! Sub-segment extraction of shape polylines.
//!
//! A shape is trimmed to the distance interval a trip actually travels. The
//! trimmed polyline starts and ends exactly at the interval bounds, with the
//! boundary points interpolated linearly between the neighbouring shape
//! points.

use crate::projection::{CoordinateProjector, ProjectionError};

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// One vertex of a shape with its cumulative `shape_dist_traveled`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapePoint {
    pub lat: f64,
    pub lon: f64,
    pub dist: Option<f64>,
}

impl ShapePoint {
    pub fn new(lat: f64, lon: f64, dist: Option<f64>) -> Self {
        Self { lat, lon, dist }
    }

    pub fn position(&self) -> LonLat {
        LonLat::new(self.lon, self.lat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Empty,
    /// Every point, no interpolation.
    Whole,
    /// Inclusive index range, `last` may be `first - 1` when the whole
    /// interval lies between two consecutive points.
    Trimmed { first: usize, last: isize },
}

fn scan(points: &[ShapePoint], from: Option<f64>, to: Option<f64>) -> Span {
    if points.is_empty() {
        return Span::Empty;
    }
    let finite = |bound: Option<f64>| bound.filter(|value| value.is_finite());
    let (Some(from), Some(to)) = (finite(from), finite(to)) else {
        return Span::Whole;
    };
    if to < from {
        return Span::Empty;
    }

    let mut first = None;
    let mut last = points.len() as isize - 1;
    for (i, point) in points.iter().enumerate() {
        let Some(dist) = point.dist else {
            return Span::Whole;
        };
        if first.is_none() && dist >= from {
            first = Some(i);
        }
        if first.is_some() && dist > to {
            last = i as isize - 1;
            break;
        }
    }

    match first {
        // Interval begins past the final point.
        None => Span::Empty,
        // Interval ends before the first point.
        Some(_) if last < 0 => Span::Empty,
        Some(first) => Span::Trimmed { first, last },
    }
}

fn interpolate(a: &ShapePoint, b: &ShapePoint, at: f64) -> LonLat {
    let (Some(d0), Some(d1)) = (a.dist, b.dist) else {
        return a.position();
    };
    let fraction = (at - d0) / (d1 - d0);
    LonLat::new(
        a.lon + (b.lon - a.lon) * fraction,
        a.lat + (b.lat - a.lat) * fraction,
    )
}

/// Geographic polyline covering `[from, to]` of the shape.
///
/// With either bound absent or not finite the full shape is returned. A trimmed polyline
/// always holds at least two positions.
pub fn segment_coords(points: &[ShapePoint], from: Option<f64>, to: Option<f64>) -> Vec<LonLat> {
    let (first, last) = match scan(points, from, to) {
        Span::Empty => return Vec::new(),
        Span::Whole => return points.iter().map(ShapePoint::position).collect(),
        Span::Trimmed { first, last } => (first, last),
    };
    // Both bounds are known once a trimmed span exists.
    let from = from.unwrap_or_default();
    let to = to.unwrap_or_default();
    let final_index = points.len() as isize - 1;

    let mut coords = Vec::new();
    if first > 0 && points[first].dist != Some(from) {
        coords.push(interpolate(&points[first - 1], &points[first], from));
    }
    if last >= first as isize {
        coords.extend(points[first..=last as usize].iter().map(ShapePoint::position));
    }
    if last < final_index {
        let last = last as usize;
        if points[last].dist != Some(to) {
            coords.push(interpolate(&points[last], &points[last + 1], to));
        }
    }

    if coords.len() == 1 {
        coords.push(coords[0]);
    }
    coords
}

/// Trimmed polyline of the shape, each position passed through `projector`.
pub fn extract<P>(
    points: &[ShapePoint],
    from: Option<f64>,
    to: Option<f64>,
    projector: &P,
) -> Result<Vec<[f64; 2]>, ProjectionError>
where
    P: CoordinateProjector + ?Sized,
{
    project_all(&segment_coords(points, from, to), projector)
}

pub fn project_all<P>(coords: &[LonLat], projector: &P) -> Result<Vec<[f64; 2]>, ProjectionError>
where
    P: CoordinateProjector + ?Sized,
{
    coords
        .iter()
        .map(|coord| projector.project(coord.lon, coord.lat))
        .collect()
}
