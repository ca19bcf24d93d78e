// Tracing setup for every host the core runs in.
//
// Filter: `RUST_LOG` when set and valid, else `DEFAULT_FILTER`. Mobile hosts
// rarely pass environment variables through, so the default is tuned for
// them: our crate at debug, HTTP plumbing quiet.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "terra_core=debug,reqwest=info,hyper=warn,info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Called first thing in `FfiApp::new()`;
/// later calls (a second `FfiApp` in the same process, tests) are no-ops.
///
/// iOS logs to os_log under `com.terra.app` and mirrors to
/// `<data_dir>/terra.log` so simulator runs keep a readable file. Android logs
/// to logcat with tag `terra`. Everything else writes to stderr.
pub fn init_logging(#[allow(unused)] data_dir: &str) {
    #[cfg(target_os = "ios")]
    {
        use tracing_subscriber::prelude::*;

        let _ = std::fs::create_dir_all(data_dir);
        let file_layer = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(std::path::Path::new(data_dir).join("terra.log"))
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
            });

        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_oslog::OsLogger::new("com.terra.app", "core"))
            .with(file_layer)
            .try_init();
    }

    #[cfg(target_os = "android")]
    {
        use tracing_subscriber::prelude::*;

        let _ = tracing_subscriber::registry()
            .with(paranoid_android::layer("terra").with_filter(env_filter()))
            .try_init();
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::stderr)
            .try_init();
    }
}
