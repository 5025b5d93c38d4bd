use crate::segment::{segment_coords, LonLat, ShapePoint};

/// Equatorial radius used for all length computations.
pub const EARTH_RADIUS_METERS: f64 = 6_378_137.0;

pub fn haversine_meters(a: LonLat, b: LonLat) -> f64 {
    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Sum of great-circle distances between consecutive positions.
pub fn path_length_meters(coords: &[LonLat]) -> f64 {
    coords
        .windows(2)
        .map(|pair| haversine_meters(pair[0], pair[1]))
        .sum()
}

/// Real-world length of the part of a shape between `from` and `to`,
/// following the same trimming as the exported geometry.
pub fn segment_length_meters(points: &[ShapePoint], from: Option<f64>, to: Option<f64>) -> f64 {
    path_length_meters(&segment_coords(points, from, to))
}
