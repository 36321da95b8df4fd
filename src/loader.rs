//! JSON payload loading from files, strings and HTTP URLs.

use std::path::Path;

use serde_json::Value;

use crate::error::LoadError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a JSON payload from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_payload(path: &Path) -> Result<Value, LoadError> {
    let content = read_text(path)?;
    load_payload_str(&content)
}

/// Read a file as text, distinguishing a missing file from other IO errors.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` or `LoadError::ReadError`.
pub fn read_text(path: &Path) -> Result<String, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_payload_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a JSON payload from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails or the server
/// answers with an error status, or `LoadError::InvalidJson` if the body
/// isn't valid JSON.
#[cfg(feature = "remote")]
pub fn load_payload_url(url: &str) -> Result<Value, LoadError> {
    let network = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    let response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(network)?;

    let body = response.text().map_err(network)?;
    tracing::debug!(url, bytes = body.len(), "fetched payload");
    load_payload_str(&body)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a payload from a file path or URL.
///
/// URL loading requires the `remote` feature; without it a URL is reported
/// as a missing file.
///
/// # Errors
///
/// Returns appropriate errors based on the source type.
pub fn load_payload_auto(source: &str) -> Result<Value, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_payload_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_payload(Path::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_payload_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"year": 2024}}"#).unwrap();

        let payload = load_payload(file.path()).unwrap();
        assert_eq!(payload["year"], 2024);
    }

    #[test]
    fn load_payload_file_not_found() {
        let result = load_payload(Path::new("/nonexistent/payload.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
        assert_eq!(result.unwrap_err().exit_code(), 3);
    }

    #[test]
    fn load_payload_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_payload(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
        assert_eq!(result.unwrap_err().exit_code(), 2);
    }

    #[test]
    fn load_payload_str_roundtrip() {
        assert_eq!(load_payload_str("[1, 2]").unwrap()[1], 2);
        assert!(load_payload_str("{").is_err());
    }

    #[test]
    fn is_url_detects_scheme() {
        assert!(is_url("https://example.com/p.json"));
        assert!(is_url("http://example.com/p.json"));
        assert!(!is_url("/path/to/p.json"));
        assert!(!is_url("p.json"));
    }

    #[test]
    fn load_payload_auto_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"iso": "2024-01-01T00:00:00"}}"#).unwrap();

        let payload = load_payload_auto(file.path().to_str().unwrap()).unwrap();
        assert_eq!(payload["iso"], "2024-01-01T00:00:00");
    }

    #[cfg(feature = "remote")]
    mod remote {
        use super::*;

        #[test]
        fn load_payload_url_valid() {
            let mut server = mockito::Server::new();
            let mock = server
                .mock("GET", "/payload.json")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(r#"{"year": 1999}"#)
                .create();

            let payload = load_payload_url(&format!("{}/payload.json", server.url())).unwrap();
            assert_eq!(payload["year"], 1999);
            mock.assert();
        }

        #[test]
        fn load_payload_url_404() {
            let mut server = mockito::Server::new();
            let _mock = server.mock("GET", "/missing.json").with_status(404).create();

            let result = load_payload_url(&format!("{}/missing.json", server.url()));
            assert!(matches!(result, Err(LoadError::NetworkError { .. })));
        }

        #[test]
        fn load_payload_url_bad_body() {
            let mut server = mockito::Server::new();
            let _mock = server
                .mock("GET", "/bad.json")
                .with_status(200)
                .with_body("<html>")
                .create();

            let result = load_payload_auto(&format!("{}/bad.json", server.url()));
            assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
        }
    }
}
