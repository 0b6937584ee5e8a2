pub mod capture_stream;
pub mod device_catalog;
pub mod stream_negotiator;
