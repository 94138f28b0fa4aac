//! Cached entry types

/// A fully materialized cached entry, including its value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
    pub file_name: Option<String>,
    pub size: i64,
    pub mod_time: i64,
    pub access_time: i64,
    pub extended_data: Option<Vec<u8>>,
}

/// Entry metadata without the value bytes, returned by `item_info`.
/// Reading info never updates `access_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: String,
    pub file_name: Option<String>,
    pub size: i64,
    pub mod_time: i64,
    pub access_time: i64,
    pub extended_data: Option<Vec<u8>>,
}
