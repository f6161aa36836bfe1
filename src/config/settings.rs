use std::path::Path;

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use kipc_error::{ensure, GenericError, KipcResult, ResultExt, StackError, StatusCode};
use serde::{Deserialize, Serialize};

use crate::{
    ipc::{
        handle::MAX_HANDLE_CAPACITY,
        message::{CHANNEL_NAME_MAX, MAX_CHANNELS, MAX_MESSAGE_SIZE, MAX_QUEUE_SIZE, MAX_SUBSCRIBERS},
    },
    logging::LoggingConfig,
};

/// Префикс переменных окружения: `KIPC_MAX_QUEUES`, `KIPC_LOGGING__LEVEL`.
pub const ENV_PREFIX: &str = "KIPC";

/// Лимиты подсистемы IPC.
///
/// Загружаются из значений по умолчанию, необязательного TOML-файла и
/// переменных окружения (в порядке возрастания приоритета).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcSettings {
    /// Размер таблицы очередей.
    pub max_queues: usize,
    /// Размер таблицы каналов.
    pub max_channels: usize,
    /// Ёмкость очереди при `max_messages == 0`.
    pub default_queue_capacity: usize,
    pub max_queue_capacity: usize,
    pub max_message_size: usize,
    pub max_subscribers: usize,
    /// Сколько сообщений постоянный канал держит без подписчиков.
    pub persistent_buffer_depth: usize,
    pub max_broadcast_targets: usize,
    pub channel_name_max: usize,
    /// Сколько идентификаторов просроченных запросов помнит коррелятор.
    pub expired_reply_memory: usize,
    pub logging: LoggingConfig,
}

impl IpcSettings {
    /// Загружает настройки. `path` указывает на необязательный TOML-файл.
    pub fn load(path: Option<&Path>) -> KipcResult<Self> {
        let settings: Self = Self::builder(path)
            .and_then(|builder| builder.build())
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(config_error)
            .context("load ipc settings")?;

        settings.validate()?;
        Ok(settings)
    }

    fn builder(path: Option<&Path>) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("max_queues", defaults.max_queues as i64)?
            .set_default("max_channels", defaults.max_channels as i64)?
            .set_default("default_queue_capacity", defaults.default_queue_capacity as i64)?
            .set_default("max_queue_capacity", defaults.max_queue_capacity as i64)?
            .set_default("max_message_size", defaults.max_message_size as i64)?
            .set_default("max_subscribers", defaults.max_subscribers as i64)?
            .set_default("persistent_buffer_depth", defaults.persistent_buffer_depth as i64)?
            .set_default("max_broadcast_targets", defaults.max_broadcast_targets as i64)?
            .set_default("channel_name_max", defaults.channel_name_max as i64)?
            .set_default("expired_reply_memory", defaults.expired_reply_memory as i64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        Ok(builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        ))
    }

    pub fn validate(&self) -> KipcResult<()> {
        ensure!(
            (1..=MAX_HANDLE_CAPACITY).contains(&self.max_queues),
            StatusCode::InvalidConfig,
            "max_queues must be in 1..={}, got {}",
            MAX_HANDLE_CAPACITY,
            self.max_queues
        );
        ensure!(
            (1..=MAX_CHANNELS).contains(&self.max_channels),
            StatusCode::InvalidConfig,
            "max_channels must be in 1..={}, got {}",
            MAX_CHANNELS,
            self.max_channels
        );
        ensure!(
            (1..=MAX_QUEUE_SIZE).contains(&self.max_queue_capacity),
            StatusCode::InvalidConfig,
            "max_queue_capacity must be in 1..={}, got {}",
            MAX_QUEUE_SIZE,
            self.max_queue_capacity
        );
        ensure!(
            (1..=self.max_queue_capacity).contains(&self.default_queue_capacity),
            StatusCode::InvalidConfig,
            "default_queue_capacity {} exceeds max_queue_capacity {}",
            self.default_queue_capacity,
            self.max_queue_capacity
        );
        ensure!(
            (1..=MAX_MESSAGE_SIZE).contains(&self.max_message_size),
            StatusCode::InvalidConfig,
            "max_message_size must be in 1..={}, got {}",
            MAX_MESSAGE_SIZE,
            self.max_message_size
        );
        ensure!(
            (1..=MAX_SUBSCRIBERS).contains(&self.max_subscribers),
            StatusCode::InvalidConfig,
            "max_subscribers must be in 1..={}, got {}",
            MAX_SUBSCRIBERS,
            self.max_subscribers
        );
        ensure!(
            self.persistent_buffer_depth > 0,
            StatusCode::InvalidConfig,
            "persistent_buffer_depth must be positive"
        );
        ensure!(
            self.max_broadcast_targets > 0,
            StatusCode::InvalidConfig,
            "max_broadcast_targets must be positive"
        );
        ensure!(
            (1..=CHANNEL_NAME_MAX).contains(&self.channel_name_max),
            StatusCode::InvalidConfig,
            "channel_name_max must be in 1..={}, got {}",
            CHANNEL_NAME_MAX,
            self.channel_name_max
        );
        self.logging.validate()
    }
}

fn config_error(err: ConfigError) -> StackError {
    StackError::new(GenericError::new(StatusCode::InvalidConfig, err.to_string()))
}

impl Default for IpcSettings {
    fn default() -> Self {
        Self {
            max_queues: 256,
            max_channels: MAX_CHANNELS,
            default_queue_capacity: MAX_QUEUE_SIZE,
            max_queue_capacity: MAX_QUEUE_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            max_subscribers: MAX_SUBSCRIBERS,
            persistent_buffer_depth: MAX_QUEUE_SIZE,
            max_broadcast_targets: 64,
            channel_name_max: CHANNEL_NAME_MAX,
            expired_reply_memory: 128,
            logging: LoggingConfig::default(),
        }
    }
}
