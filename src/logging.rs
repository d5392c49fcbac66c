//! Global tracing subscriber: stdout, optional log file, optional span-timing profile.

use std::path::Path;
use std::sync::{Mutex, OnceLock};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Settings;

static INSTALLED: OnceLock<bool> = OnceLock::new();
// Guards am Leben halten, damit die Non-Blocking Writer korrekt flushen
static GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());

/// Installs the process-wide subscriber on the first call; later calls do nothing.
/// Returns whether this process ended up with our subscriber installed.
pub fn init(settings: &Settings) -> bool {
    *INSTALLED.get_or_init(|| install(settings))
}

/// Flushes and releases the background writers. Call right before exiting.
pub fn flush() {
    GUARDS.lock().unwrap_or_else(|e| e.into_inner()).clear();
}

fn install(settings: &Settings) -> bool {
    let mut guards = Vec::new();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},tower_http=info,sqlx=warn", settings.log_level)))
        .unwrap_or_else(|_| "info,tower_http=info".into());

    let stdout_layer = settings.log_out.then(|| {
        let (nb, guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(guard);
        tracing_subscriber::fmt::layer().with_writer(nb)
    });

    let file_layer = settings.log_file.as_deref().and_then(|path| {
        let (dir, name) = split_log_path(path)?;
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("could not create log directory {}: {}", dir.display(), e);
            return None;
        }
        let (nb, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        guards.push(guard);
        Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(nb))
    });

    let profile_layer = settings.cpu_profile_path.as_deref().and_then(|path| match std::fs::File::create(path) {
        Ok(file) => {
            let (nb, guard) = tracing_appender::non_blocking(file);
            guards.push(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(nb)
                    .with_filter(filter_fn(|meta| meta.is_span())),
            )
        }
        Err(e) => {
            eprintln!("unable to create cpu profile file {}: {}", path.display(), e);
            None
        }
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .with(profile_layer)
        .try_init()
        .is_ok();

    if installed {
        GUARDS.lock().unwrap_or_else(|e| e.into_inner()).extend(guards);
        if let Some(p) = &settings.cpu_profile_path {
            tracing::info!("profiling to {}", p.display());
        }
    }
    installed
}

fn split_log_path(path: &Path) -> Option<(&Path, &std::ffi::OsStr)> {
    let name = path.file_name()?;
    let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
    Some((dir, name))
}
