pub mod allowed_segment_lookup;
pub mod geoip_lookup;
pub mod in_memory_document_store;
pub mod in_memory_offset_store;
pub mod log_sink;
pub mod shared;
pub mod sqlite_offset_store;
