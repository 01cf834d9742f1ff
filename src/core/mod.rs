// ─── PaperHost Core ───
// Backend for hosting a single PaperMC server.
//
// Architecture:
//   core/
//     version/    — Remote build catalog (version → build)
//     downloader/ — Streaming artifact download with progress
//     server/     — server.properties + eula.txt generation
//     launch/     — Process supervisor + merged output relay
//     state/      — Settings, paths and the lifecycle controller

pub mod downloader;
pub mod error;
pub mod http;
pub mod launch;
pub mod server;
pub mod state;
pub mod version;

#[cfg(test)]
pub(crate) mod test_support;
