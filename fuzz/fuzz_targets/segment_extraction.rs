#![no_main]
use arbitrary::Arbitrary;
use gtfs_shapes_core::length::segment_length_meters;
use gtfs_shapes_core::segment::{segment_coords, ShapePoint};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzData {
    points: Vec<PointData>,
    from: Option<f64>,
    to: Option<f64>,
}

#[derive(Debug, Arbitrary)]
struct PointData {
    lat: f64,
    lon: f64,
    dist: Option<f64>,
}

fuzz_target!(|data: FuzzData| {
    let points: Vec<ShapePoint> = data
        .points
        .iter()
        .map(|point| ShapePoint::new(point.lat, point.lon, point.dist))
        .collect();

    let coords = segment_coords(&points, data.from, data.to);
    assert!(
        coords.len() != 1 || points.len() == 1,
        "only a single-point shape yields a single position"
    );
    if data.from.is_none() || data.to.is_none() {
        assert_eq!(coords.len(), points.len());
    }
    let _ = segment_length_meters(&points, data.from, data.to);
});
