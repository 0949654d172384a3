//! Media source resolution
//!
//! Turns the string handed to `MediaEngine::open` into something a container
//! factory understands:
//! - plain paths and `file://` URLs become local paths
//! - `format://<fmt>?<arg>` and `device://<fmt>?<arg>` force an input format
//!   (e.g. `device://gdigrab?desktop`) with the unescaped query as the input
//! - everything else with a scheme is passed through as a URL

use indexmap::IndexMap;
use log::debug;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

use super::traits::ContainerError;

/// Schemes treated as network inputs
const NETWORK_SCHEMES: &[&str] = &[
    "http", "https", "rtsp", "rtsps", "rtmp", "rtmps", "rtp", "udp", "tcp", "srt", "mms", "hls",
];

/// How the source reaches the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    File,
    Network,
    /// Capture device or forced demuxer input
    Device,
    Other,
}

/// Container options derived from the source (and extendable by hosts)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Demuxer to use instead of probing (e.g. "gdigrab", "dshow", "v4l2")
    pub forced_input_format: Option<String>,
    /// Protocol prefix prepended by the container (e.g. "async")
    pub protocol_prefix: Option<String>,
    /// Demuxer private options, passed through in insertion order
    pub private_options: IndexMap<String, String>,
}

/// Result of source resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSource {
    /// What the caller passed in
    pub original: String,
    /// What the container should open
    pub url: String,
    pub kind: SourceKind,
}

impl ResolvedSource {
    /// Resolve `input`, filling format hints into `config`
    pub fn resolve(input: &str, config: &mut ContainerConfig) -> Result<Self, ContainerError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ContainerError::Open("empty media source".to_string()));
        }

        let resolved = match Url::parse(trimmed) {
            // Relative paths and Windows drive letters ("C:\...") are local files
            Err(_) => Self::file(trimmed, trimmed.to_string()),
            Ok(url) if url.scheme().len() == 1 => Self::file(trimmed, trimmed.to_string()),
            Ok(url) => Self::from_url(trimmed, &url, config),
        };

        debug!(
            "Resolved source '{}' -> {:?} '{}' (format: {:?})",
            resolved.original, resolved.kind, resolved.url, config.forced_input_format
        );
        Ok(resolved)
    }

    fn file(original: &str, path: String) -> Self {
        Self {
            original: original.to_string(),
            url: path,
            kind: SourceKind::File,
        }
    }

    fn from_url(original: &str, url: &Url, config: &mut ContainerConfig) -> Self {
        let scheme = url.scheme();

        if scheme == "file" {
            let path = url
                .to_file_path()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| decode(url.path()));
            return Self::file(original, path);
        }

        if scheme == "format" || scheme == "device" {
            let host = url.host_str().unwrap_or_default();
            let query = url.query().unwrap_or_default();
            if !host.is_empty() && !query.is_empty() && config.forced_input_format.is_none() {
                config.forced_input_format = Some(host.to_string());
                return Self {
                    original: original.to_string(),
                    url: decode(query).trim_start_matches('?').to_string(),
                    kind: SourceKind::Device,
                };
            }
        }

        let kind = if NETWORK_SCHEMES.contains(&scheme) {
            SourceKind::Network
        } else {
            SourceKind::Other
        };
        Self {
            original: original.to_string(),
            url: original.to_string(),
            kind,
        }
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(input: &str) -> (ResolvedSource, ContainerConfig) {
        let mut config = ContainerConfig::default();
        let source = ResolvedSource::resolve(input, &mut config).unwrap();
        (source, config)
    }

    #[test]
    fn test_plain_path_is_file() {
        let (source, config) = resolve("/media/clip.mp4");
        assert_eq!(source.kind, SourceKind::File);
        assert_eq!(source.url, "/media/clip.mp4");
        assert!(config.forced_input_format.is_none());
    }

    #[test]
    fn test_windows_drive_is_file() {
        let (source, _) = resolve(r"C:\media\clip.mp4");
        assert_eq!(source.kind, SourceKind::File);
        assert_eq!(source.url, r"C:\media\clip.mp4");
    }

    #[test]
    fn test_file_url_is_local_path() {
        let (source, _) = resolve("file:///tmp/my%20clip.mkv");
        assert_eq!(source.kind, SourceKind::File);
        assert!(source.url.ends_with("my clip.mkv"));
    }

    #[test]
    fn test_device_url_forces_format() {
        let (source, config) = resolve("device://gdigrab?desktop");
        assert_eq!(source.kind, SourceKind::Device);
        assert_eq!(source.url, "desktop");
        assert_eq!(config.forced_input_format.as_deref(), Some("gdigrab"));

        let (source, config) = resolve("format://dshow?video=Integrated%20Camera");
        assert_eq!(source.url, "video=Integrated Camera");
        assert_eq!(config.forced_input_format.as_deref(), Some("dshow"));
    }

    #[test]
    fn test_existing_forced_format_wins() {
        let mut config = ContainerConfig {
            forced_input_format: Some("v4l2".into()),
            ..Default::default()
        };
        let source = ResolvedSource::resolve("device://gdigrab?desktop", &mut config).unwrap();
        assert_eq!(source.kind, SourceKind::Other);
        assert_eq!(config.forced_input_format.as_deref(), Some("v4l2"));
    }

    #[test]
    fn test_network_schemes() {
        let (source, _) = resolve("rtsp://camera.local/stream1");
        assert_eq!(source.kind, SourceKind::Network);
        assert_eq!(source.url, "rtsp://camera.local/stream1");

        let (source, _) = resolve("https://example.com/video.m3u8");
        assert_eq!(source.kind, SourceKind::Network);
    }

    #[test]
    fn test_empty_source_rejected() {
        let mut config = ContainerConfig::default();
        assert!(ResolvedSource::resolve("   ", &mut config).is_err());
    }
}
