use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use gtfs_shapes_core::{
    export_input, ExportConfig, ExportError, GtfsInput, ModeFilter, NoOpProgressHandler,
    OutputMode,
};
use serde_json::Value;

const FEED: &[(&str, &str)] = &[
    (
        "agency.txt",
        "agency_id,agency_name,agency_url,agency_timezone\n\
         AG,Lakeside Transit,https://lakeside.example,Europe/Zurich\n",
    ),
    (
        "stops.txt",
        "stop_id,stop_name,stop_lat,stop_lon,wheelchair_boarding\n\
         S1,Harbour,0.0,0.0,1\n\
         S2,Market,0.0,0.5,1\n\
         S3,Station,0.0,1.0,2\n",
    ),
    (
        "routes.txt",
        "route_id,agency_id,route_short_name,route_long_name,route_type,line_group\n\
         R10,AG,10,Harbour - Station,3,north\n\
         F1,AG,F,Ferry,4,lake\n",
    ),
    (
        "trips.txt",
        "route_id,service_id,trip_id,shape_id,wheelchair_accessible,__trip_count_no_count\n\
         R10,WEEK,T1,SH1,1,\n\
         R10,WEEK,T2,SH1,1,\n\
         R10,WEEK,T3,SH1,2,1\n\
         F1,WEEK,T4,,,\n",
    ),
    (
        "stop_times.txt",
        "trip_id,arrival_time,departure_time,stop_id,stop_sequence,shape_dist_traveled\n\
         T1,08:00:00,08:00:00,S1,1,0\n\
         T1,08:10:00,08:10:00,S3,2,1000\n\
         T2,09:00:00,09:00:00,S1,1,0\n\
         T2,09:05:00,09:05:00,S2,2,500\n\
         T3,10:00:00,10:00:00,S1,1,0\n\
         T3,10:10:00,10:10:00,S3,2,1000\n\
         T4,11:00:00,11:00:00,S2,1,\n\
         T4,11:20:00,11:20:00,S3,2,\n",
    ),
    (
        "calendar.txt",
        "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
         WEEK,1,1,1,1,1,0,0,20240101,20240107\n",
    ),
    (
        "calendar_dates.txt",
        "service_id,date,exception_type\n\
         WEEK,20240101,2\n\
         WEEK,20240106,1\n",
    ),
    (
        "shapes.txt",
        "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence,shape_dist_traveled\n\
         SH1,0.0,0.0,1,0\n\
         SH1,0.0,0.25,2,250\n\
         SH1,0.0,0.75,3,750\n\
         SH1,0.0,1.0,4,1000\n",
    ),
];

fn temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), nanos));
    fs::create_dir_all(&dir).expect("create dir");
    dir
}

fn write_feed_dir(dir: &Path) {
    for (name, contents) in FEED {
        fs::write(dir.join(name), contents).expect("write feed file");
    }
}

fn write_feed_zip(path: &Path) {
    let file = fs::File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    for (name, contents) in FEED {
        zip.start_file(format!("feed/{name}"), zip::write::FileOptions::default())
            .expect("start zip entry");
        zip.write_all(contents.as_bytes()).expect("write zip entry");
    }
    zip.finish().expect("finish zip");
}

fn read_features(path: &Path) -> Vec<Value> {
    let text = fs::read_to_string(path).expect("read output");
    let collection: Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(collection["type"], "FeatureCollection");
    collection["features"].as_array().expect("features").clone()
}

#[test]
fn shapes_mode_aggregates_trips_by_range() {
    let dir = temp_dir("shapes_mode");
    let feed_dir = dir.join("feed");
    fs::create_dir_all(&feed_dir).unwrap();
    write_feed_dir(&feed_dir);

    let input = GtfsInput::from_path(&feed_dir).unwrap();
    let output = dir.join("out").join("lake");
    let summary = export_input(&input, &ExportConfig::default(), &output, &NoOpProgressHandler)
        .unwrap();

    assert_eq!(summary.mode, OutputMode::Shapes);
    assert_eq!(summary.aggregated_shapes, 2);
    assert_eq!(summary.outputs, vec![dir.join("out").join("lake.geojson")]);

    let features = read_features(&summary.outputs[0]);
    assert_eq!(features.len(), 2);
    // Keys sort by range, so the shorter [0, 500] interval comes first.
    let half = &features[0];
    assert_eq!(half["properties"]["TripIds"], "T2");
    let coords = half["geometry"]["coordinates"].as_array().unwrap();
    assert_eq!(coords.len(), 3);
    assert_eq!(coords[2][0].as_f64(), Some(0.5));

    let full = &features[1];
    assert_eq!(full["properties"]["Id"], "SH1");
    assert_eq!(full["properties"]["TripIds"], "T1,T3");
    assert_eq!(full["properties"]["RouteNames"], "10");
    assert_eq!(full["geometry"]["coordinates"].as_array().unwrap().len(), 4);

    let leftovers: Vec<_> = fs::read_dir(dir.join("out"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
        .collect();
    assert!(leftovers.is_empty());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn routes_mode_writes_overview_and_stations() {
    let dir = temp_dir("routes_mode");
    let feed_zip = dir.join("feed.zip");
    write_feed_zip(&feed_zip);

    let mut config = ExportConfig {
        mode: OutputMode::Routes,
        route_fields: vec!["line_group".to_string()],
        write_stops: true,
        write_route_overview: true,
        ..Default::default()
    };
    config.type_names.insert(3, "Bus");
    config.field_names.insert("Km_tot", "km_total");

    let input = GtfsInput::from_path(&feed_zip).unwrap();
    let output = dir.join("lake.geojson");
    let summary = export_input(&input, &config, &output, &NoOpProgressHandler).unwrap();

    assert_eq!(summary.stations, Some(3));
    assert_eq!(summary.overview_rows, Some(1));

    let features = read_features(&dir.join("lake.geojson"));
    assert_eq!(features.len(), 2);
    assert_eq!(features[0]["properties"]["Frequency"], 5);
    let full = &features[1]["properties"];
    assert_eq!(full["Route_id"], "R10");
    assert_eq!(full["Type"], "Bus");
    assert_eq!(full["line_group"], "north");
    assert_eq!(full["Agency_name"], "Lakeside Transit");
    // Jan 1 removed, Jan 6 added: five service days for each of T1 and T3.
    assert_eq!(full["Frequency"], 10);
    let km_len = full["Km_len"].as_f64().unwrap();
    assert!((km_len - 111.3).abs() < 0.1, "{km_len}");
    assert!((full["km_total"].as_f64().unwrap() - 10.0 * km_len).abs() < 1e-6);
    assert_eq!(full["Wchair_tr"].as_f64(), Some(0.5));

    let stations = read_features(&dir.join("lake.stations.geojson"));
    assert_eq!(stations.len(), 3);
    assert_eq!(stations[0]["geometry"]["type"], "Point");

    let overview = fs::read_to_string(dir.join("lake.csv")).unwrap();
    let mut lines = overview.lines();
    let header = lines.next().unwrap();
    let leading = "Route_id,Short_name,Long_name,Type,Frequency,Km_len,km_total,Km_max";
    assert!(header.starts_with(leading), "{header}");
    assert!(header.ends_with(",line_group"));
    let row: Vec<&str> = lines.next().unwrap().split(',').collect();
    assert_eq!(row[0], "R10");
    // T3 is marked as a duplicate: T1 and T2 over five days.
    assert_eq!(row[4], "10");
    assert_eq!(row.last(), Some(&"north"));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn trips_mode_draws_shapeless_trips_through_stops() {
    let dir = temp_dir("trips_mode");
    write_feed_dir(&dir);

    let config = ExportConfig {
        mode: OutputMode::Trips,
        ..Default::default()
    };
    let input = GtfsInput::from_path(&dir).unwrap();
    let summary = export_input(&input, &config, &dir.join("trips"), &NoOpProgressHandler).unwrap();
    assert_eq!(summary.records, 4);

    let features = read_features(&dir.join("trips.geojson"));
    let ferry = &features[3];
    assert_eq!(ferry["properties"]["Id"], "T4");
    assert_eq!(ferry["properties"]["R_Type"], 4);
    let coords = ferry["geometry"]["coordinates"].as_array().unwrap();
    assert_eq!(coords[0][0].as_f64(), Some(0.5));
    assert_eq!(coords[1][0].as_f64(), Some(1.0));

    let filtered = ExportConfig {
        mode: OutputMode::Trips,
        mode_filter: ModeFilter::new([4]),
        ..Default::default()
    };
    let summary =
        export_input(&input, &filtered, &dir.join("ferries"), &NoOpProgressHandler).unwrap();
    assert_eq!(summary.records, 1);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn single_trip_export() {
    let dir = temp_dir("single_trip");
    write_feed_dir(&dir);
    let input = GtfsInput::from_path(&dir).unwrap();

    let config = ExportConfig {
        trip_id: Some("T2".to_string()),
        projection: "EPSG:3857".to_string(),
        ..Default::default()
    };
    let summary = export_input(&input, &config, &dir.join("one"), &NoOpProgressHandler).unwrap();
    assert_eq!(summary.records, 1);
    let features = read_features(&dir.join("one.geojson"));
    let coords = features[0]["geometry"]["coordinates"].as_array().unwrap();
    assert_eq!(coords.len(), 3);
    let x = coords[2][0].as_f64().unwrap();
    assert!((x - 55_659.745).abs() < 0.01, "{x}");

    let missing = ExportConfig {
        trip_id: Some("T99".to_string()),
        ..Default::default()
    };
    let result = export_input(&input, &missing, &dir.join("missing"), &NoOpProgressHandler);
    assert!(matches!(result, Err(ExportError::UnknownTrip(_))));
    assert!(!dir.join("missing.geojson").exists());

    fs::remove_dir_all(&dir).ok();
}
