use crate::FetchError;
use gemnix_schema::ContentHash;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Downloads artifacts over HTTP(S) and hashes them while streaming, so a
/// gem never has to be held in memory or written to disk.
pub struct HttpHasher {
    agent: ureq::Agent,
}

impl HttpHasher {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }

    pub fn hash_url(&self, url: &str) -> Result<ContentHash, FetchError> {
        tracing::debug!("GET {url}");
        let resp = match self.agent.get(url).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(FetchError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(FetchError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(FetchError::Http(format!("{url}: {e}")));
            }
        };

        let code = resp.status().as_u16();
        if code == 404 {
            return Err(FetchError::NotFound(url.to_owned()));
        }
        if code >= 400 {
            return Err(FetchError::Http(format!("HTTP {code} for {url}")));
        }

        let mut reader = resp.into_body().into_reader();
        let mut hasher = Sha256::new();
        let bytes = std::io::copy(&mut reader, &mut hasher)
            .map_err(|e| FetchError::Http(format!("{url}: {e}")))?;
        tracing::debug!("hashed {bytes} bytes from {url}");
        Ok(ContentHash::from_sha256_digest(&hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tiny_http::{Response, Server, StatusCode};

    struct GemServer {
        url: String,
        _server: Arc<Server>,
        _handle: std::thread::JoinHandle<()>,
    }

    fn start(body: &'static [u8]) -> GemServer {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let port = server.server_addr().to_ip().unwrap().port();
        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            for req in srv.incoming_requests() {
                let resp = if req.url().ends_with(".gem") {
                    Response::from_data(body.to_vec())
                } else {
                    Response::from_string("missing").with_status_code(StatusCode(404))
                };
                let _ = req.respond(resp);
            }
        });
        GemServer {
            url: format!("http://127.0.0.1:{port}"),
            _server: server,
            _handle: handle,
        }
    }

    #[test]
    fn hashes_downloaded_body() {
        let server = start(b"gem archive bytes");
        let hasher = HttpHasher::new(Duration::from_secs(5));
        let hash = hasher
            .hash_url(&format!("{}/gems/rake-13.0.6.gem", server.url))
            .unwrap();
        let expected = ContentHash::from_sha256_digest(&Sha256::digest(b"gem archive bytes"));
        assert_eq!(hash, expected);
        assert_eq!(hash.len(), 52);
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let server = start(b"unused");
        let hasher = HttpHasher::new(Duration::from_secs(5));
        let err = hasher
            .hash_url(&format!("{}/gems/missing", server.url))
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)), "got {err:?}");
    }

    #[test]
    fn unreachable_host_is_http_error() {
        let hasher = HttpHasher::new(Duration::from_secs(2));
        let err = hasher.hash_url("http://127.0.0.1:1/gems/x.gem").unwrap_err();
        assert!(matches!(err, FetchError::Http(_)), "got {err:?}");
    }
}
