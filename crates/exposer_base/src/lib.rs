/* 📖 # Why have exposer_base as a core library?
exposer_base provides the foundational error handling, logging setup and HTTP platform types
used across all crates. The engine only talks to the network through the abstractions defined
here, so it can be tested without binding sockets.
*/

pub mod error;
pub mod pal;
pub mod tracing;

pub use error::{Diagnostic, ErrorKind, ExposerError, ExposerResult, ResultExt};
pub use pal::{FilePath, MockPal, Pal, PalHandle, RealPal};
