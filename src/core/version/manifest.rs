// ─── Version Manifest ───
// Fetches the Paper version list and resolves a download URL per build.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::error::{HostError, HostResult};

pub const DEFAULT_MANIFEST_URL: &str = "https://gist.githubusercontent.com/osipxd/6119732e30059241c2192c4a8d2218d9/raw/d8b5faadcfdfadfa0ff58dbf7c04cd10de16c678/paper-versions.json";

/// Root every artifact URL hangs off.
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://papermc.io/api/v2/projects/paper";

/// Raw manifest body: `{ "versions": { "<version>": { "build": ... } } }`.
#[derive(Debug, Deserialize)]
struct RawManifest {
    versions: HashMap<String, RawVersion>,
}

#[derive(Debug, Deserialize)]
struct RawVersion {
    build: serde_json::Value,
}

/// A buildable server version and where to get it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version: String,
    pub build_number: String,
    pub download_url: String,
}

/// Ordered set of known versions. Replaced wholesale on every fetch.
#[derive(Debug, Clone, Default)]
pub struct VersionCatalog {
    entries: Vec<VersionEntry>,
}

impl VersionCatalog {
    /// Fetch and parse the manifest. Either the whole catalog is returned
    /// or an error; nothing partial.
    pub async fn fetch(
        client: &reqwest::Client,
        manifest_url: &str,
        download_base: &str,
    ) -> HostResult<Self> {
        info!("Fetching Paper version manifest...");

        let response = client.get(manifest_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HostError::DownloadFailed {
                url: manifest_url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let catalog = Self::parse(&body, download_base)?;

        info!("Loaded {} versions from manifest", catalog.entries.len());
        Ok(catalog)
    }

    /// Artifact URLs are derived from `download_base`, version and build;
    /// nothing in the manifest beyond the build number is used.
    pub fn parse(json: &str, download_base: &str) -> HostResult<Self> {
        let raw: RawManifest = serde_json::from_str(json)?;

        let mut names: Vec<&String> = raw.versions.keys().collect();
        // Plain string order, descending. "1.9" sorts above "1.20".
        names.sort_by(|a, b| b.cmp(a));

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let build = build_number(name, &raw.versions[name].build)?;
            debug!("Catalog entry {} build {}", name, build);
            entries.push(VersionEntry {
                download_url: download_url(download_base, name, &build),
                version: name.clone(),
                build_number: build,
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[VersionEntry] {
        &self.entries
    }

    pub fn versions(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.version.as_str()).collect()
    }

    pub fn find(&self, version: &str) -> Option<&VersionEntry> {
        self.entries.iter().find(|e| e.version == version)
    }
}

pub fn download_url(base: &str, version: &str, build: &str) -> String {
    format!(
        "{}/versions/{version}/builds/{build}/downloads/paper-{version}-{build}.jar",
        base.trim_end_matches('/')
    )
}

fn build_number(version: &str, value: &serde_json::Value) -> HostResult<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(HostError::ManifestShape(format!(
            "build for {version} is not a string or number: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::test_support::{serve, test_client};

    const SAMPLE: &str = r#"{
        "versions": {
            "1.19.2": { "build": "5" },
            "1.20.4": { "build": "10", "extra": true }
        }
    }"#;

    #[test]
    fn orders_versions_descending_by_raw_string() {
        let catalog = VersionCatalog::parse(SAMPLE, DEFAULT_DOWNLOAD_BASE).unwrap();
        assert_eq!(catalog.versions(), vec!["1.20.4", "1.19.2"]);
    }

    #[test]
    fn ordering_is_lexicographic_not_semantic() {
        let json = r#"{"versions":{"1.9":{"build":"1"},"1.20":{"build":"2"},"1.8.8":{"build":"3"}}}"#;
        let catalog = VersionCatalog::parse(json, DEFAULT_DOWNLOAD_BASE).unwrap();
        assert_eq!(catalog.versions(), vec!["1.9", "1.8.8", "1.20"]);
    }

    #[test]
    fn derives_download_url_from_version_and_build() {
        let catalog = VersionCatalog::parse(SAMPLE, DEFAULT_DOWNLOAD_BASE).unwrap();
        let entry = catalog.find("1.20.4").unwrap();
        assert_eq!(entry.build_number, "10");
        assert_eq!(
            entry.download_url,
            "https://papermc.io/api/v2/projects/paper/versions/1.20.4/builds/10/downloads/paper-1.20.4-10.jar"
        );
    }

    #[test]
    fn download_base_is_configurable() {
        let catalog = VersionCatalog::parse(SAMPLE, "http://127.0.0.1:8080/paper/").unwrap();
        assert_eq!(
            catalog.find("1.19.2").unwrap().download_url,
            "http://127.0.0.1:8080/paper/versions/1.19.2/builds/5/downloads/paper-1.19.2-5.jar"
        );
    }

    #[test]
    fn numeric_build_is_accepted() {
        let json = r#"{"versions":{"1.16.5":{"build":794}}}"#;
        let catalog = VersionCatalog::parse(json, DEFAULT_DOWNLOAD_BASE).unwrap();
        assert_eq!(catalog.find("1.16.5").unwrap().build_number, "794");
    }

    #[test]
    fn rejects_other_shapes() {
        let parse = |json: &str| VersionCatalog::parse(json, DEFAULT_DOWNLOAD_BASE);
        assert!(parse(r#"{"1.20.4":{"build":"10"}}"#).is_err());
        assert!(parse(r#"{"versions":{"1.20.4":{}}}"#).is_err());
        assert!(parse(r#"{"versions":{"1.20.4":{"build":[1]}}}"#).is_err());
        assert!(parse("not json").is_err());
    }

    #[tokio::test]
    async fn fetch_reads_remote_manifest() {
        let url = serve(200, SAMPLE).await;
        let catalog = VersionCatalog::fetch(&test_client(), &url, DEFAULT_DOWNLOAD_BASE)
            .await
            .unwrap();
        assert_eq!(catalog.versions(), vec!["1.20.4", "1.19.2"]);
    }

    #[tokio::test]
    async fn fetch_fails_on_non_success_status() {
        let url = serve(503, "unavailable").await;
        let err = VersionCatalog::fetch(&test_client(), &url, DEFAULT_DOWNLOAD_BASE)
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::DownloadFailed { status: 503, .. }));
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
