use std::{collections::BTreeMap, path::PathBuf};

use kipc_error::{ensure, KipcResult, StatusCode};
use serde::{Deserialize, Serialize};

/// Формат вывода событий.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

/// Период ротации файла журнала.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Конфигурация логирования, вложенная в настройки под ключом `logging`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error.
    pub level: String,
    /// Уровни отдельных модулей, например `kipc::ipc::channel = "debug"`.
    pub module_levels: BTreeMap<String, String>,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub console_enabled: bool,
    /// Дублирование журнала в файл через неблокирующий писатель.
    pub file_enabled: bool,
    pub log_dir: PathBuf,
    pub file_name: String,
    pub rotation: Rotation,
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl LoggingConfig {
    pub fn validate(&self) -> KipcResult<()> {
        ensure!(
            is_level(&self.level),
            StatusCode::InvalidConfig,
            "unknown log level: {}",
            self.level
        );
        for (module, level) in &self.module_levels {
            ensure!(
                is_level(level),
                StatusCode::InvalidConfig,
                "unknown log level for {}: {}",
                module,
                level
            );
        }
        ensure!(
            !self.file_enabled || !self.file_name.is_empty(),
            StatusCode::InvalidConfig,
            "file logging enabled without a file name"
        );
        Ok(())
    }

    /// Директива для `EnvFilter`: базовый уровень и уровни модулей.
    pub fn build_filter_directive(&self) -> String {
        let mut directive = self.level.to_lowercase();
        for (module, level) in &self.module_levels {
            directive.push(',');
            directive.push_str(module);
            directive.push('=');
            directive.push_str(&level.to_lowercase());
        }
        directive
    }
}

fn is_level(level: &str) -> bool {
    LEVELS.contains(&level.to_lowercase().as_str())
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: BTreeMap::new(),
            format: LogFormat::default(),
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            console_enabled: true,
            file_enabled: false,
            log_dir: PathBuf::from("logs"),
            file_name: "kipc.log".to_string(),
            rotation: Rotation::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = LoggingConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.build_filter_directive(), "info");
    }

    /// Тест проверяет сборку директивы с уровнями модулей.
    #[test]
    fn test_filter_directive_with_modules() {
        let mut cfg = LoggingConfig {
            level: "WARN".to_string(),
            ..Default::default()
        };
        cfg.module_levels
            .insert("kipc::ipc::queue".to_string(), "trace".to_string());
        assert_eq!(cfg.build_filter_directive(), "warn,kipc::ipc::queue=trace");
    }

    #[test]
    fn test_invalid_level_rejected() {
        let cfg = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidConfig);
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let fmt: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(fmt, LogFormat::Json);
    }
}
