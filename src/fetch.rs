//! Artifact fetch: turn a location (URL or path) into bytes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::Client;

use crate::error::FetchError;

pub trait ArtifactFetch: Send + Sync {
    fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError>;
}

/// Join a base location and a key with exactly one `/`.
pub fn join_location(base: &str, key: &str) -> String {
    if base.is_empty() {
        return key.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct LocalFetcher;

impl ArtifactFetch for LocalFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        let path = PathBuf::from(location.strip_prefix("file://").unwrap_or(location));
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::NotFound(location.to_string())
            } else {
                FetchError::Io {
                    location: location.to_string(),
                    source: e,
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Blocking HTTP(S) fetcher with a whole-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }
}

impl ArtifactFetch for HttpFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        debug!("GET {location}");
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    location: location.to_string(),
                    timeout: self.timeout,
                }
            } else {
                FetchError::Request {
                    location: location.to_string(),
                    source: e,
                }
            }
        };

        let response = self.client.get(location).send().map_err(map_err)?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound(location.to_string())),
            s if !s.is_success() => {
                return Err(FetchError::Http {
                    location: location.to_string(),
                    status: s.as_u16(),
                })
            }
            _ => {}
        }
        let bytes = response.bytes().map_err(map_err)?;
        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Routes `http(s)://` locations to HTTP and everything else to the
/// filesystem.
#[derive(Debug, Clone)]
pub struct AnyFetcher {
    http: HttpFetcher,
    local: LocalFetcher,
}

impl AnyFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: HttpFetcher::new(timeout)?,
            local: LocalFetcher,
        })
    }
}

impl ArtifactFetch for AnyFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        if is_remote(location) {
            self.http.fetch(location)
        } else {
            self.local.fetch(location)
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Fixture fetcher: fixed bytes per location.
#[derive(Debug, Default, Clone)]
pub struct MemoryFetcher {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(location, bytes);
        self
    }

    pub fn insert(&mut self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.insert(location.into(), bytes.into());
    }
}

impl ArtifactFetch for MemoryFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        self.blobs
            .get(location)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(location.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// Answer a single request on 127.0.0.1 with a canned response.
    fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let _ = stream.write_all(response.as_bytes());
        });
        format!("http://{addr}/models/AAPL.json")
    }

    /// Same settings as `HttpFetcher::new`, minus any proxy from the
    /// environment so requests reach the loopback listener.
    fn loopback_fetcher(secs: u64) -> HttpFetcher {
        let timeout = Duration::from_secs(secs);
        let client = Client::builder()
            .no_proxy()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap();
        HttpFetcher { client, timeout }
    }

    /// Accept a connection and never answer it.
    fn serve_silence() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(10));
        });
        format!("http://{addr}/models/AAPL.json")
    }

    #[test]
    fn join_location_normalizes_slashes() {
        assert_eq!(join_location("https://h/models/", "/a.json"), "https://h/models/a.json");
        assert_eq!(join_location("models", "a.json"), "models/a.json");
        assert_eq!(join_location("", "a.json"), "a.json");
    }

    #[test]
    fn local_fetch_distinguishes_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(&path, b"{}").unwrap();

        let fetcher = LocalFetcher;
        assert_eq!(fetcher.fetch(path.to_str().unwrap()).unwrap(), b"{}");
        let missing = dir.path().join("gone.json");
        assert!(matches!(
            fetcher.fetch(missing.to_str().unwrap()),
            Err(FetchError::NotFound(_))
        ));
    }

    #[test]
    fn memory_fetcher_serves_fixtures() {
        let fetcher = MemoryFetcher::new().with("a", b"1".to_vec());
        assert_eq!(fetcher.fetch("a").unwrap(), b"1");
        assert!(matches!(fetcher.fetch("b"), Err(FetchError::NotFound(_))));
    }

    #[test]
    fn remote_detection() {
        assert!(is_remote("https://example.com/x"));
        assert!(!is_remote("./models/x.json"));
    }

    #[test]
    fn http_fetch_returns_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
        );
        let fetcher = loopback_fetcher(5);
        assert_eq!(fetcher.fetch(&url).unwrap(), b"{}");
    }

    #[test]
    fn http_404_is_not_found() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let fetcher = loopback_fetcher(5);
        match fetcher.fetch(&url) {
            Err(FetchError::NotFound(location)) => assert_eq!(location, url),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn http_server_error_keeps_status() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let fetcher = loopback_fetcher(5);
        assert!(matches!(
            fetcher.fetch(&url),
            Err(FetchError::Http { status: 503, .. })
        ));
    }

    #[test]
    fn silent_server_times_out() {
        let url = serve_silence();
        let fetcher = loopback_fetcher(1);
        let started = std::time::Instant::now();
        match fetcher.fetch(&url) {
            Err(FetchError::Timeout { timeout, .. }) => assert_eq!(timeout, Duration::from_secs(1)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn any_fetcher_routes_http_locations() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\nabc",
        );
        let fetcher = AnyFetcher {
            http: loopback_fetcher(5),
            local: LocalFetcher,
        };
        assert_eq!(fetcher.fetch(&url).unwrap(), b"abc");
    }
}
