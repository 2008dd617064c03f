/* 📖 # Why does the CLI take no arguments?

Everything the server needs is in `exposer.toml` in the current directory: service name and
version, base path, which groups run and in which order, their options, the listen address and
the body limit. The group implementations are compiled into the binary (`demo::catalog`).

The workflow:
1. Change to the directory containing `exposer.toml`
2. Run `exposer`
3. Fetch `GET /api/exposed` to see what is served

Exit codes:
- 0: never, the server runs until the process is stopped
- 1: settings could not be loaded, a group failed to initialize, or the server did not start
*/

mod demo;

use std::env;
use std::process;
use std::thread;

use exposer_base::pal::http::HttpServerHandle;
use exposer_base::tracing::init_tracing;
use exposer_base::{ExposerResult, FilePath, PalHandle, RealPal};
use exposer_engine::load_settings;
use tracing::info;

fn main() {
    if let Err(e) = init_tracing() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let current_dir = env::current_dir().unwrap_or_else(|e| {
        eprintln!("Error: Failed to get current directory: {}", e);
        process::exit(1);
    });

    let pal = PalHandle::new(RealPal::new(current_dir));

    let _server = match run(&pal) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    loop {
        thread::park();
    }
}

fn run(pal: &PalHandle) -> ExposerResult<HttpServerHandle> {
    let settings = load_settings(&**pal, &FilePath::from("exposer.toml"))?;
    println!("Configuration loaded: {} {}", settings.name, settings.version);

    let exposure = futures::executor::block_on(exposer_engine::expose(
        settings.expose_config(&demo::catalog()),
    ))?;
    let table = exposure.route_table()?;
    for (method, path) in table.endpoints() {
        println!("  {} {}", method, path);
    }

    let server = pal.start_http_server(Box::new(table), settings.server_config())?;
    info!(
        address = %server.address(&settings.server.host),
        checksum = %exposure.checksum(),
        "serving {} APIs",
        exposure.exposed().len()
    );
    println!(
        "Listening on http://{}{}/exposed",
        server.address(&settings.server.host),
        exposure.base_path()
    );
    Ok(server)
}
