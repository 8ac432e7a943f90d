//! Inicialização do tracing.

use tracing_subscriber::{EnvFilter, fmt};

/// Filtro usado quando `RUST_LOG` não está definido.
pub fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "studynotes=info",
        1 => "studynotes=debug",
        _ => "studynotes=trace",
    }
}

/// Instala o subscriber global, em texto ou JSON, escrevendo em stderr.
///
/// Chamadas repetidas são ignoradas.
pub fn init(verbose: u8, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let result = if json {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
    };
    let _ = result;
}
