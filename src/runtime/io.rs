//=====================================================
// File: runtime/io.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Restricted I/O performed during the poll phase
// Objective: Read files beneath a sandbox root and fetch from allow-listed
//            hosts, nothing else
//=====================================================

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use ureq::{Agent, AgentBuilder};

/// An I/O operation a script started; executed when the poll phase reaches it.
#[derive(Debug, Clone, PartialEq)]
pub enum IoRequest {
    ReadFile { path: String },
    Fetch { url: String },
}

impl IoRequest {
    pub fn describe(&self) -> String {
        match self {
            IoRequest::ReadFile { path } => format!("fs.readFile('{path}')"),
            IoRequest::Fetch { url } => format!("fetch('{url}')"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IoPayload {
    Text(String),
    Response { url: String, status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum IoFailure {
    #[error("EACCES: access outside the sandbox denied, open '{0}'")]
    Denied(String),
    #[error("ENOENT: no such file or directory, open '{0}'")]
    NotFound(String),
    #[error("fetch to host '{0}' is not allowed")]
    HostNotAllowed(String),
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Network(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Performs the I/O behind a request.
pub trait IoDriver {
    fn perform(&mut self, request: &IoRequest) -> Result<IoPayload, IoFailure>;
}

/// The default driver: sandboxed filesystem reads and allow-listed HTTP GETs.
pub struct SandboxIo {
    fs_root: Option<PathBuf>,
    allow_hosts: Vec<String>,
    agent: Agent,
}

impl SandboxIo {
    pub fn new(fs_root: Option<PathBuf>, allow_hosts: Vec<String>, fetch_timeout: Duration) -> Self {
        let agent = AgentBuilder::new().timeout(fetch_timeout).build();
        Self {
            fs_root,
            allow_hosts: allow_hosts
                .into_iter()
                .map(|host| host.to_ascii_lowercase())
                .collect(),
            agent,
        }
    }

    /// A driver that denies every filesystem read and every fetch.
    pub fn denied() -> Self {
        Self::new(None, Vec::new(), Duration::from_secs(2))
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, IoFailure> {
        let Some(root) = &self.fs_root else {
            tracing::debug!(path, "filesystem read denied: no sandbox root");
            return Err(IoFailure::Denied(path.to_string()));
        };
        let root = root
            .canonicalize()
            .map_err(|_| IoFailure::Denied(path.to_string()))?;
        let candidate = root.join(Path::new(path));
        let resolved = match candidate.canonicalize() {
            Ok(resolved) => resolved,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(IoFailure::NotFound(path.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        if !resolved.starts_with(&root) {
            tracing::debug!(path, "filesystem read denied: escapes sandbox root");
            return Err(IoFailure::Denied(path.to_string()));
        }
        Ok(resolved)
    }

    fn fetch(&self, url: &str) -> Result<IoPayload, IoFailure> {
        let host = host_of(url).ok_or_else(|| IoFailure::InvalidUrl(url.to_string()))?;
        if !self.allow_hosts.iter().any(|allowed| *allowed == host) {
            tracing::debug!(%host, "fetch denied: host not allow-listed");
            return Err(IoFailure::HostNotAllowed(host));
        }
        let (status, response) = match self.agent.get(url).call() {
            Ok(response) => (response.status(), response),
            Err(ureq::Error::Status(code, response)) => (code, response),
            Err(err) => return Err(IoFailure::Network(err.to_string())),
        };
        let body = response
            .into_string()
            .map_err(|err| IoFailure::Network(err.to_string()))?;
        Ok(IoPayload::Response {
            url: url.to_string(),
            status,
            body,
        })
    }
}

impl IoDriver for SandboxIo {
    fn perform(&mut self, request: &IoRequest) -> Result<IoPayload, IoFailure> {
        match request {
            IoRequest::ReadFile { path } => {
                let resolved = self.resolve(path)?;
                Ok(IoPayload::Text(std::fs::read_to_string(resolved)?))
            }
            IoRequest::Fetch { url } => self.fetch(url),
        }
    }
}

/// Lower-cased host of an http(s) URL, without userinfo or port.
fn host_of(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit('@').next()?;
    let host = authority.split(':').next()?;
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction_strips_port_and_path() {
        assert_eq!(host_of("https://Example.com:8443/a?b").as_deref(), Some("example.com"));
        assert_eq!(host_of("http://user@api.local/x").as_deref(), Some("api.local"));
        assert!(host_of("ftp://example.com").is_none());
    }

    #[test]
    fn reads_are_denied_without_root() {
        let mut io = SandboxIo::denied();
        let err = io
            .perform(&IoRequest::ReadFile { path: "a.txt".into() })
            .unwrap_err();
        assert!(matches!(err, IoFailure::Denied(_)));
    }

    #[test]
    fn reads_stay_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let mut io = SandboxIo::new(Some(dir.path().to_path_buf()), Vec::new(), Duration::from_secs(1));
        let payload = io
            .perform(&IoRequest::ReadFile { path: "a.txt".into() })
            .unwrap();
        assert_eq!(payload, IoPayload::Text("hello".into()));
        let escaped = io.perform(&IoRequest::ReadFile { path: "../../etc/passwd".into() });
        assert!(escaped.is_err());
        let missing = io.perform(&IoRequest::ReadFile { path: "nope.txt".into() });
        assert!(matches!(missing, Err(IoFailure::NotFound(_))));
    }

    #[test]
    fn fetch_to_unlisted_host_fails_without_network() {
        let mut io = SandboxIo::denied();
        let err = io
            .perform(&IoRequest::Fetch { url: "https://example.com/".into() })
            .unwrap_err();
        assert!(matches!(err, IoFailure::HostNotAllowed(_)));
    }
}
