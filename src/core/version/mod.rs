pub mod manifest;

pub use manifest::{
    download_url, VersionCatalog, VersionEntry, DEFAULT_DOWNLOAD_BASE, DEFAULT_MANIFEST_URL,
};
