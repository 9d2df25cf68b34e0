use std::io::Read;
use std::time::Duration;

/// Remote image fetch error enum.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// Only http and https URLs are fetched.
    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),

    /// The server answered with a non-success status.
    #[error("server returned status {0}")]
    Status(u16),

    /// Connection, timeout or protocol failure.
    #[error("request failed: {0}")]
    Transport(String),

    /// The body is larger than the configured limit.
    #[error("image is larger than {0} bytes")]
    TooLarge(usize),

    /// Reading the body failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Blocking downloader for images referenced by URL.
#[derive(Clone)]
pub struct ImageFetcher {
    agent: ureq::Agent,
    max_bytes: usize,
}

impl ImageFetcher {
    /// A fetcher with a per-request timeout and a body size cap.
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent, max_bytes }
    }

    /// Download the body at `url`.
    pub fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::UnsupportedUrl(url.to_string()));
        }

        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => FetchError::Status(code),
            ureq::Error::Transport(t) => FetchError::Transport(t.to_string()),
        })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes as u64 + 1)
            .read_to_end(&mut bytes)?;
        if bytes.len() > self.max_bytes {
            return Err(FetchError::TooLarge(self.max_bytes));
        }
        tracing::debug!(url, size = bytes.len(), "remote image fetched");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    use super::*;

    /// Answer one request on a local port with `status` and `body`.
    fn serve_once(status: &'static str, body: Vec<u8>) -> std::io::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        std::thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            while reader.read_line(&mut line).is_ok_and(|n| n > 0) && line != "\r\n" {
                line.clear();
            }
            let mut stream = reader.into_inner();
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        });
        Ok(format!("http://{addr}/food.png"))
    }

    #[test]
    fn test_fetches_body_within_limit() -> Result<(), Box<dyn std::error::Error>> {
        let url = serve_once("200 OK", vec![7u8; 512])?;
        let fetcher = ImageFetcher::new(Duration::from_secs(5), 1024);
        assert_eq!(fetcher.fetch(&url)?, vec![7u8; 512]);
        Ok(())
    }

    #[test]
    fn test_body_over_limit_is_too_large() -> Result<(), Box<dyn std::error::Error>> {
        let url = serve_once("200 OK", vec![0u8; 4096])?;
        let fetcher = ImageFetcher::new(Duration::from_secs(5), 1024);
        assert!(matches!(fetcher.fetch(&url), Err(FetchError::TooLarge(1024))));
        Ok(())
    }

    #[test]
    fn test_error_status_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let url = serve_once("404 Not Found", Vec::new())?;
        let fetcher = ImageFetcher::new(Duration::from_secs(5), 1024);
        assert!(matches!(fetcher.fetch(&url), Err(FetchError::Status(404))));
        Ok(())
    }

    #[test]
    fn test_rejects_non_http_urls() {
        let fetcher = ImageFetcher::new(Duration::from_secs(1), 1024);
        assert!(matches!(
            fetcher.fetch("file:///etc/passwd"),
            Err(FetchError::UnsupportedUrl(_))
        ));
        assert!(matches!(fetcher.fetch("  "), Err(FetchError::UnsupportedUrl(_))));
    }
}
