use std::{any::Any, error::Error};

use crate::StatusCode;

/// Расширение для ошибок подсистемы (object-safe).
///
/// Предоставляет вспомогательные методы для работы с ошибками:
/// - извлечение статус-кода,
/// - безопасное сообщение для вызывающего процесса,
/// - детализированное сообщение для логов,
/// - теги для счётчиков и трассировки.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Статус ошибки.
    ///
    /// По умолчанию возвращает [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Возвращает ошибку как [`Any`](std::any::Any), чтобы можно было
    /// выполнить downcast к конкретному типу.
    fn as_any(&self) -> &dyn Any;

    /// Сообщение, которое можно отдать в пространство пользователя.
    ///
    /// Внутренние ошибки не раскрывают деталей и возвращают
    /// `"Internal kernel error"`.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal | StatusCode::CorruptedData => {
                "Internal kernel error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Детализированное сообщение для логов.
    fn log_message(&self) -> String {
        format!("{self:?}")
    }

    /// Набор тегов (ключ–значение) для счётчиков и событий трассировки.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", self.type_name()),
            ("status_code", self.status_code().to_string()),
        ]
    }

    /// Имя типа ошибки (для метрик или логирования).
    fn type_name(&self) -> String {
        std::any::type_name::<Self>()
            .split("::")
            .last()
            .unwrap_or("Unknown")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{any::Any, error::Error, fmt};

    use super::*;

    #[derive(Debug)]
    struct DefaultError(pub &'static str);

    impl fmt::Display for DefaultError {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "DefaultError: {}", self.0)
        }
    }

    impl Error for DefaultError {}

    impl ErrorExt for DefaultError {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct FullQueue(pub u32);

    impl fmt::Display for FullQueue {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "queue {} is full", self.0)
        }
    }

    impl Error for FullQueue {}

    impl ErrorExt for FullQueue {
        fn status_code(&self) -> StatusCode {
            StatusCode::QueueFull
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Тест проверяет, что по умолчанию статус ошибки — `Internal`, а
    /// сообщение для пользователя не раскрывает деталей.
    #[test]
    fn test_default_status_is_internal_and_hidden() {
        let e = DefaultError("page table walk failed");
        assert_eq!(e.status_code(), StatusCode::Internal);
        assert_eq!(e.client_message(), "Internal kernel error");
    }

    /// Тест проверяет, что для обычных ошибок `client_message` совпадает с
    /// `Display`.
    #[test]
    fn test_client_message_non_internal() {
        let e = FullQueue(3);
        assert_eq!(e.client_message(), "queue 3 is full");
    }

    /// Тест проверяет downcast через `as_any`.
    #[test]
    fn test_as_any_downcast() {
        let e = FullQueue(9);
        let down = e.as_any().downcast_ref::<FullQueue>();
        assert_eq!(down.map(|f| f.0), Some(9));
    }

    /// Тест проверяет, что `metrics_tags` содержит `error_type` и
    /// `status_code`, а `type_name` — короткое имя типа.
    #[test]
    fn test_metrics_tags_and_type_name() {
        let e = FullQueue(1);
        let tags = e.metrics_tags();
        assert!(tags.iter().any(|(k, v)| *k == "error_type" && v == "FullQueue"));
        assert!(tags
            .iter()
            .any(|(k, v)| *k == "status_code" && v == &StatusCode::QueueFull.to_string()));
        assert!(e.type_name().ends_with("FullQueue"));
    }
}
