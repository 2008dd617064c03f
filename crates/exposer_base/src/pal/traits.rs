use std::io::Read;
use std::sync::Arc;

use crate::ExposerResult;
use crate::error::ErrorKind;

use super::file_path::FilePath;
use super::http::{HttpServerConfig, HttpServerHandle, HttpService};

/* 📖 # Why is Pal a trait instead of a struct?

The exposure layer needs exactly two things from its platform: reading its settings file and
binding an HTTP server. Behind a trait, MockPal answers both in memory, so settings loading and
full request round trips are tested without touching the disk or the network.
*/

/// Platform Abstraction Layer (PAL) providing file and network access.
///
/// Two implementations are provided:
/// - `RealPal`: the real filesystem and a tiny_http server
/// - `MockPal`: in-memory implementation for testing
pub trait Pal: std::fmt::Debug + Send + Sync + 'static {
    /// Open a file for reading.
    fn read_file(&self, path: &FilePath) -> ExposerResult<Box<dyn Read + Send + 'static>>;

    /// Read entire file contents as a UTF-8 string.
    fn read_file_to_string(&self, path: &FilePath) -> ExposerResult<String> {
        let mut reader = self.read_file(path)?;
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).map_err(|e| {
            Box::new(crate::ExposerError::new(ErrorKind::FileError {
                path: path.as_path().to_path_buf(),
                source: e,
            }))
        })?;
        String::from_utf8(contents).map_err(|_e| crate::err!("File is not valid UTF-8: {}", path))
    }

    /// Start an HTTP server with the given service.
    ///
    /// The server listens immediately. Dropping the returned handle (or calling
    /// `shutdown()`) stops it from accepting new connections.
    fn start_http_server(
        &self,
        service: Box<dyn HttpService>,
        config: HttpServerConfig,
    ) -> ExposerResult<HttpServerHandle>;
}

/// Shared handle to a PAL implementation.
///
/// ```no_run
/// use exposer_base::{PalHandle, RealPal};
///
/// let pal = PalHandle::new(RealPal::new(".".into()));
/// let shared = pal.clone();
/// ```
#[derive(Debug, Clone)]
pub struct PalHandle(Arc<dyn Pal>);

impl PalHandle {
    pub fn new(pal: impl Pal + 'static) -> Self {
        Self(Arc::new(pal))
    }
}

impl std::ops::Deref for PalHandle {
    type Target = dyn Pal;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}
