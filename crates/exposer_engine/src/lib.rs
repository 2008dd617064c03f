/* 📖 # How does a function become an HTTP endpoint?

1. Groups are initialized one after another (`group`); each returns a map of API functions.
2. Every function's parameter names are read from its signature (`signature`), its validation
   fragments are compiled into one payload schema (`validation`) and a descriptor is built
   (`descriptor`): path `basePath/group/id`, GET without parameters, POST otherwise.
3. The list of exposed descriptors is fingerprinted (`checksum`).
4. Each descriptor gets a request handler (`handler`) that decodes the named payload, validates
   it, turns it into positional arguments (`marshal`), calls the function and encodes the result.
5. The routes, plus the discovery endpoint `GET basePath/exposed`, are handed to a `Router`.

`client` is the other side of the wire: it resolves the discovery document and calls APIs by
group and id, refusing results from a service whose API surface changed.
*/

pub mod api;
pub mod checksum;
pub mod client;
pub mod config;
pub mod descriptor;
pub mod expose;
pub mod group;
pub mod handler;
pub mod logger;
pub mod marshal;
pub mod router;
pub mod signature;
pub mod validation;

pub use api::{ApiFunction, ApiMap, ApiOutput, CallArgs, Callable, RawInput};
pub use checksum::{CHECKSUM_HEADER, checksum};
pub use client::{ExposedClient, ServiceTransport, Transport};
pub use config::{GroupCatalog, Settings, load_settings};
pub use descriptor::{Descriptor, ExposedApi};
pub use expose::{DiscoveryDocument, ExposeConfig, Exposure, expose};
pub use group::{Group, GroupContext, GroupExports, GroupOptions, initialize_groups};
pub use logger::Logger;
pub use router::{Output, RequestOptions, Route, RouteTable, Router};
