use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the stderr subscriber. stdout carries the IPC stream, so nothing
/// here may write to it.
///
/// `RUST_LOG` wins, then `GRADEBOOKD_LOG`, then `level`. A bare level like
/// `debug` is scoped to this crate; anything with `=` is used as a directive.
pub fn init_tracing(level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("GRADEBOOKD_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .try_init()?;
    Ok(())
}

fn default_directive(level: &str) -> String {
    if level.contains('=') {
        level.to_string()
    } else {
        format!("gradebookd={}", level)
    }
}
