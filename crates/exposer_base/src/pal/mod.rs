/* 📖 # What is the Platform Abstraction Layer?

The PAL is the only place that touches the filesystem or binds sockets. Everything above it
(settings loading, the exposed routes, the discovery endpoint) is written against the `Pal`
trait and the plain request/response values in `http`, so the whole service can be driven
in-memory through MockPal.
*/

mod file_path;
pub mod http;
pub mod mock;
pub mod real_pal;
mod traits;

pub use file_path::FilePath;
pub use mock::MockPal;
pub use real_pal::RealPal;
pub use traits::{Pal, PalHandle};
