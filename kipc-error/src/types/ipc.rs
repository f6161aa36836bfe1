use std::any::Any;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Единая таксономия отказов подсистемы IPC.
///
/// Дискриминанты — коды, которые системный вызов возвращает в пространство
/// пользователя (отрицательные, `0` означает успех).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum IpcError {
    /// Процесс не существует или PID равен нулю там, где он обязателен.
    #[error("invalid process id")]
    InvalidPid = -1,
    /// Очередь не существует или была уничтожена.
    #[error("invalid or destroyed queue")]
    InvalidQueue = -2,
    #[error("queue is full")]
    QueueFull = -3,
    #[error("queue is empty")]
    QueueEmpty = -4,
    /// Таблица очередей/каналов или список подписчиков заполнены.
    #[error("ipc resources exhausted")]
    NoMemory = -5,
    #[error("operation timed out")]
    Timeout = -6,
    #[error("permission denied")]
    Permission = -7,
    /// Сообщение или аргументы не прошли проверку.
    #[error("invalid message")]
    InvalidMsg = -8,
    #[error("channel already exists")]
    ChannelExists = -9,
    #[error("channel not found")]
    ChannelNotFound = -10,
    #[error("process is not subscribed to the channel")]
    NotSubscribed = -11,
    /// Размер полезной нагрузки, ёмкости или списка целей вне допустимого
    /// диапазона.
    #[error("invalid size")]
    InvalidSize = -12,
}

impl IpcError {
    /// Все варианты в порядке кодов.
    pub const ALL: [IpcError; 12] = [
        IpcError::InvalidPid,
        IpcError::InvalidQueue,
        IpcError::QueueFull,
        IpcError::QueueEmpty,
        IpcError::NoMemory,
        IpcError::Timeout,
        IpcError::Permission,
        IpcError::InvalidMsg,
        IpcError::ChannelExists,
        IpcError::ChannelNotFound,
        IpcError::NotSubscribed,
        IpcError::InvalidSize,
    ];

    /// Код возврата системного вызова.
    pub fn code(self) -> i32 {
        self.into()
    }

    /// Обратное преобразование кода возврата.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::try_from(code).ok()
    }

    /// Имя в верхнем регистре, как в таблице кодов ABI.
    pub fn name(self) -> &'static str {
        match self {
            Self::InvalidPid => "INVALID_PID",
            Self::InvalidQueue => "INVALID_QUEUE",
            Self::QueueFull => "QUEUE_FULL",
            Self::QueueEmpty => "QUEUE_EMPTY",
            Self::NoMemory => "NO_MEMORY",
            Self::Timeout => "TIMEOUT",
            Self::Permission => "PERMISSION",
            Self::InvalidMsg => "INVALID_MSG",
            Self::ChannelExists => "CHANNEL_EXISTS",
            Self::ChannelNotFound => "CHANNEL_NOT_FOUND",
            Self::NotSubscribed => "NOT_SUBSCRIBED",
            Self::InvalidSize => "INVALID_SIZE",
        }
    }
}

impl ErrorExt for IpcError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPid => StatusCode::InvalidPid,
            Self::InvalidQueue => StatusCode::InvalidQueue,
            Self::QueueFull => StatusCode::QueueFull,
            Self::QueueEmpty => StatusCode::QueueEmpty,
            Self::NoMemory => StatusCode::NoMemory,
            Self::Timeout => StatusCode::Timeout,
            Self::Permission => StatusCode::PermissionDenied,
            Self::InvalidMsg => StatusCode::InvalidMessage,
            Self::ChannelExists => StatusCode::ChannelExists,
            Self::ChannelNotFound => StatusCode::ChannelNotFound,
            Self::NotSubscribed => StatusCode::NotSubscribed,
            Self::InvalidSize => StatusCode::InvalidSize,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", "ipc".to_string()),
            ("status_code", self.status_code().to_string()),
            ("errno", self.code().to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что коды системных вызовов идут подряд от -1 до -12
    /// и обратимы.
    #[test]
    fn test_codes_are_stable() {
        for (i, err) in IpcError::ALL.iter().enumerate() {
            assert_eq!(err.code(), -(i as i32) - 1, "{}", err.name());
            assert_eq!(IpcError::from_code(err.code()), Some(*err));
        }
        assert_eq!(IpcError::from_code(0), None);
        assert_eq!(IpcError::from_code(-13), None);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(IpcError::QueueFull.status_code(), StatusCode::QueueFull);
        assert_eq!(
            IpcError::Permission.status_code(),
            StatusCode::PermissionDenied
        );
        assert!(IpcError::Timeout.status_code().is_retryable());
        assert!(IpcError::InvalidPid.status_code().is_client_error());
    }

    #[test]
    fn test_metrics_tags_carry_errno() {
        let tags = IpcError::NotSubscribed.metrics_tags();
        assert!(tags.iter().any(|(k, v)| *k == "errno" && v == "-11"));
    }
}
