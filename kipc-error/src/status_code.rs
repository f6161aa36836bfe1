use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок подсистемы IPC.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Адресация (PID, очереди, каналы)
/// - 3xxx: Права доступа
/// - 4xxx: Исчерпание ресурсов
/// - 5xxx: Ошибки сообщений и целостности
/// - 6xxx: Время ожидания / IO
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
/// - опционально: `serde_repr` для сериализации в виде числового значения
///   (feature = "serde_repr").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Internal = 1001,
    InvalidArgs = 1002,
    InvalidConfig = 1003,
    NotImplemented = 1004,

    // === 2xxx: Адресация ===
    InvalidPid = 2000,
    InvalidQueue = 2001,
    ChannelNotFound = 2002,
    ChannelExists = 2003,
    NotSubscribed = 2004,

    // === 3xxx: Права доступа ===
    PermissionDenied = 3000,

    // === 4xxx: Ресурсы ===
    QueueFull = 4000,
    QueueEmpty = 4001,
    NoMemory = 4002,
    SubscriberLimitExceeded = 4003,

    // === 5xxx: Сообщения ===
    InvalidMessage = 5000,
    InvalidSize = 5001,
    CorruptedData = 5002,

    // === 6xxx: Время ожидания / IO ===
    Timeout = 6000,
    Io = 6001,
    InvalidUtf8 = 6002,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Имеет ли смысл повторить операцию позже: очередь освободится,
    /// появится сообщение или ответ.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull | Self::QueueEmpty | Self::Timeout | Self::NoMemory
        )
    }

    /// Ошибка вызывающей стороны: неверные аргументы, адреса или права.
    pub fn is_client_error(&self) -> bool {
        let c = self.code();
        if (2000..=3999).contains(&c) {
            return true;
        }
        matches!(
            self,
            Self::InvalidArgs | Self::InvalidMessage | Self::InvalidSize
        )
    }

    /// Исчерпание фиксированных ресурсов (диапазон 4xxx).
    pub fn is_resource_exhausted(&self) -> bool {
        (4000..=4999).contains(&self.code())
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Internal | Self::CorruptedData)
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::QueueEmpty | Self::NotSubscribed | Self::ChannelExists => LogLevel::Debug,
            Self::InvalidArgs
            | Self::InvalidPid
            | Self::InvalidQueue
            | Self::ChannelNotFound
            | Self::InvalidMessage
            | Self::InvalidSize
            | Self::PermissionDenied => LogLevel::Info,
            Self::QueueFull | Self::Timeout | Self::NoMemory | Self::SubscriberLimitExceeded => {
                LogLevel::Warn
            }
            Self::Internal | Self::CorruptedData => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что retryable-коды помечаются корректно.
    #[test]
    fn test_retryable() {
        assert!(StatusCode::QueueFull.is_retryable());
        assert!(StatusCode::Timeout.is_retryable());
        assert!(!StatusCode::PermissionDenied.is_retryable());
        assert!(!StatusCode::InvalidQueue.is_retryable());
    }

    /// Тест проверяет разделение клиентских ошибок и исчерпания ресурсов.
    #[test]
    fn test_client_vs_resource() {
        assert!(StatusCode::InvalidPid.is_client_error());
        assert!(StatusCode::PermissionDenied.is_client_error());
        assert!(StatusCode::InvalidSize.is_client_error());
        assert!(!StatusCode::QueueFull.is_client_error());
        assert!(StatusCode::QueueFull.is_resource_exhausted());
        assert!(StatusCode::SubscriberLimitExceeded.is_resource_exhausted());
        assert!(!StatusCode::Timeout.is_resource_exhausted());
    }

    /// Тест проверяет конвертацию через `TryFrom<u32>` и `from_u32`.
    #[test]
    fn test_from_try_from_u32() {
        let n = StatusCode::ChannelNotFound.code();
        assert_eq!(
            StatusCode::try_from(n).unwrap(),
            StatusCode::ChannelNotFound
        );
        assert!(StatusCode::from_u32(99999).is_none());
        assert!(StatusCode::is_success(0));
        assert!(!StatusCode::is_success(StatusCode::QueueFull.code()));
    }

    /// Тест проверяет рекомендуемые уровни логирования.
    #[test]
    fn test_log_level_mappings() {
        assert_eq!(StatusCode::Success.log_level(), LogLevel::Trace);
        assert_eq!(StatusCode::QueueEmpty.log_level(), LogLevel::Debug);
        assert_eq!(StatusCode::Timeout.log_level(), LogLevel::Warn);
        assert_eq!(StatusCode::CorruptedData.log_level(), LogLevel::Error);
        assert!(StatusCode::CorruptedData.is_critical());
    }

    /// Тест проверяет формат `Display` — имя варианта и числовой код.
    #[test]
    fn test_display_contains_name_and_code() {
        let s = format!("{}", StatusCode::QueueFull);
        assert!(s.contains("4000"), "got: {s}");
        assert!(s.contains("QueueFull"), "got: {s}");
    }
}
