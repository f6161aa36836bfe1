pub mod config;
mod filters;
mod formatter;
pub mod handle;

pub use config::{LogFormat, LoggingConfig, Rotation};
pub use handle::{LoggingHandle, LoggingStats};

use kipc_error::{GenericError, KipcResult, ResultExt, StackError, StatusCode};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Инициализация глобального подписчика `tracing` по конфигурации.
///
/// Консольный слой пишет в stdout; файловый слой (если включён) пишет через
/// неблокирующий писатель, guard которого хранится в [`LoggingHandle`].
pub fn init_logging(config: &LoggingConfig) -> KipcResult<LoggingHandle> {
    config.validate().context("logging configuration")?;

    let env_filter = filters::build_filter_from_config(config);
    let mut layers = Vec::new();

    if config.console_enabled {
        layers.push(formatter::build_layer(
            config,
            std::io::stdout,
            config.with_ansi,
        ));
    }

    let file_guard = if config.file_enabled {
        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("create log dir {}", config.log_dir.display()))?;
        let appender = match config.rotation {
            Rotation::Never => rolling::never(&config.log_dir, &config.file_name),
            Rotation::Hourly => rolling::hourly(&config.log_dir, &config.file_name),
            Rotation::Daily => rolling::daily(&config.log_dir, &config.file_name),
        };
        let (writer, guard) = non_blocking(appender);
        layers.push(formatter::build_layer(config, writer, false));
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| StackError::new(GenericError::new(StatusCode::Internal, e.to_string())))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        format = ?config.format,
        file_enabled = config.file_enabled,
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
