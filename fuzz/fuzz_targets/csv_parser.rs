#![no_main]
use gtfs_shapes_core::csv_reader::read_csv_table;
use gtfs_shapes_model::Shape;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = read_csv_table::<Shape>("shapes.txt", data);
});
