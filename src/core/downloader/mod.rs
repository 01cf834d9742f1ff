pub mod client;

pub use client::{DownloadProgress, Downloader, ProgressFn};
