use std::fmt;

use crate::length::EARTH_RADIUS_METERS;

/// Tokens of the geographic WGS84 definition. `+ellps=WGS84` is implied
/// by the datum and may be given or left out.
const WGS84_TOKENS: [&str; 3] = ["+proj=longlat", "+datum=WGS84", "+no_defs"];
const WGS84_ELLIPSOID: &str = "+ellps=WGS84";

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("unsupported projection '{0}', rebuild with the `proj` feature for arbitrary SRIDs")]
    Unsupported(String),
    #[error("invalid projection '{spec}': {message}")]
    Invalid { spec: String, message: String },
    #[error("failed to project ({lon}, {lat}): {message}")]
    Transform { lon: f64, lat: f64, message: String },
}

/// Maps WGS84 `(lon, lat)` degrees to output coordinates `[x, y]`.
pub trait CoordinateProjector {
    fn project(&self, lon: f64, lat: f64) -> Result<[f64; 2], ProjectionError>;
}

impl<F> CoordinateProjector for F
where
    F: Fn(f64, f64) -> [f64; 2],
{
    fn project(&self, lon: f64, lat: f64) -> Result<[f64; 2], ProjectionError> {
        Ok(self(lon, lat))
    }
}

#[derive(Default)]
pub enum Projector {
    #[default]
    Identity,
    WebMercator,
    #[cfg(feature = "proj")]
    Proj(proj::Proj),
}

impl Projector {
    /// Resolves an SRID (`"3857"`, `"EPSG:3857"`) or a projection definition.
    /// Anything that cannot be resolved is an error.
    pub fn from_spec(spec: &str) -> Result<Self, ProjectionError> {
        let normalized = spec.split_whitespace().collect::<Vec<_>>().join(" ");
        let code = normalized
            .strip_prefix("EPSG:")
            .or_else(|| normalized.strip_prefix("epsg:"))
            .unwrap_or(&normalized);

        match code {
            "" => Err(ProjectionError::Invalid {
                spec: spec.to_string(),
                message: "empty projection".to_string(),
            }),
            "4326" => Ok(Projector::Identity),
            "3857" | "900913" => Ok(Projector::WebMercator),
            _ if is_wgs84_definition(code) => Ok(Projector::Identity),
            _ => Self::from_proj(code, spec),
        }
    }

    #[cfg(feature = "proj")]
    fn from_proj(code: &str, spec: &str) -> Result<Self, ProjectionError> {
        let target = if code.chars().all(|ch| ch.is_ascii_digit()) {
            format!("EPSG:{code}")
        } else {
            spec.trim().to_string()
        };
        proj::Proj::new_known_crs("EPSG:4326", &target, None)
            .map(Projector::Proj)
            .map_err(|err| ProjectionError::Invalid {
                spec: spec.to_string(),
                message: err.to_string(),
            })
    }

    #[cfg(not(feature = "proj"))]
    fn from_proj(_code: &str, spec: &str) -> Result<Self, ProjectionError> {
        Err(ProjectionError::Unsupported(spec.to_string()))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Projector::Identity)
    }
}

impl fmt::Debug for Projector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projector::Identity => f.write_str("Identity"),
            Projector::WebMercator => f.write_str("WebMercator"),
            #[cfg(feature = "proj")]
            Projector::Proj(_) => f.write_str("Proj"),
        }
    }
}

impl CoordinateProjector for Projector {
    fn project(&self, lon: f64, lat: f64) -> Result<[f64; 2], ProjectionError> {
        match self {
            Projector::Identity => Ok([lon, lat]),
            Projector::WebMercator => Ok(web_mercator(lon, lat)),
            #[cfg(feature = "proj")]
            Projector::Proj(transform) => transform
                .convert((lon, lat))
                .map(|(x, y)| [x, y])
                .map_err(|err| ProjectionError::Transform {
                    lon,
                    lat,
                    message: err.to_string(),
                }),
        }
    }
}

fn is_wgs84_definition(definition: &str) -> bool {
    let mut tokens: Vec<&str> = definition
        .split_whitespace()
        .filter(|token| *token != WGS84_ELLIPSOID)
        .collect();
    tokens.sort_unstable();
    tokens.dedup();
    let mut expected = WGS84_TOKENS;
    expected.sort_unstable();
    tokens == expected
}

fn web_mercator(lon: f64, lat: f64) -> [f64; 2] {
    let x = EARTH_RADIUS_METERS * lon.to_radians();
    let sin = lat.to_radians().sin();
    let y = EARTH_RADIUS_METERS / 2.0 * ((1.0 + sin) / (1.0 - sin)).ln();
    [x, y]
}
