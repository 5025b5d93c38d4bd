/// Trait for handling progress events during a feed export
pub trait ProgressHandler: Send + Sync {
    /// Called when starting to load a file
    fn on_start_file_load(&self, file: &str);

    /// Called when finished loading a file
    fn on_finish_file_load(&self, file: &str);

    /// Called when an output layer starts, with the number of records it will hold
    fn on_start_layer(&self, layer: &str, records: usize);

    /// Called when an output layer has been written and committed
    fn on_finish_layer(&self, layer: &str);

    /// Increment the written-record counter of the current layer
    fn increment_records_written(&self);
}

/// A no-op progress handler
pub struct NoOpProgressHandler;

impl ProgressHandler for NoOpProgressHandler {
    fn on_start_file_load(&self, _file: &str) {}
    fn on_finish_file_load(&self, _file: &str) {}
    fn on_start_layer(&self, _layer: &str, _records: usize) {}
    fn on_finish_layer(&self, _layer: &str) {}
    fn increment_records_written(&self) {}
}
