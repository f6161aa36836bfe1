pub mod ext;
pub mod macros;
pub mod stack;
pub mod status_code;
pub mod types;

// Публичный экспорт всех типов ошибок и функций из вложенных модулей, чтобы
// упростить доступ к ним из внешнего кода.
pub use ext::*;
pub use macros::*;
pub use stack::*;
pub use status_code::*;
pub use types::*;

/// Результат операций ядра IPC (очереди, каналы, корреляция).
pub type IpcResult<T> = Result<T, IpcError>;

/// Результат прикладного уровня (настройки, бинарник, системные вызовы) с
/// цепочкой контекстов.
pub type KipcResult<T> = Result<T, StackError>;
