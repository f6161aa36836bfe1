use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;
use bytes::Bytes;
use chrono::Utc;
use kipc_error::{IpcError, IpcResult};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Идентификатор задачи (процесса). `0` зарезервирован.
pub type Pid = u32;
/// Идентификатор сообщения. `0` означает "не назначен".
pub type MsgId = u32;
/// Непрозрачный дескриптор очереди.
pub type QueueId = u32;
/// Непрозрачный дескриптор канала. `0` означает "без канала".
pub type ChannelId = u32;

/// Максимальный размер полезной нагрузки сообщения в байтах.
pub const MAX_MESSAGE_SIZE: usize = 4096;
/// Максимальная ёмкость одной очереди.
pub const MAX_QUEUE_SIZE: usize = 64;
/// Максимальное количество каналов в системе.
pub const MAX_CHANNELS: usize = 256;
/// Максимальное количество подписчиков одного канала.
pub const MAX_SUBSCRIBERS: usize = 32;
/// Максимальная длина имени канала (без завершающего нуля).
pub const CHANNEL_NAME_MAX: usize = 63;
/// Количество уровней приоритета.
pub const PRIORITY_LEVELS: usize = 4;

/// Тип сообщения. Значения совпадают с двоичным форматом.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u32)]
pub enum MessageType {
    Data = 1,
    Request = 2,
    Reply = 3,
    Notification = 4,
    Signal = 5,
    Control = 6,
}

/// Приоритет сообщения. Чем больше значение, тем раньше сообщение будет
/// извлечено из очереди.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u32)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

bitflags! {
    /// Флаги сообщения и флаги вызова отправки/приёма.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct MessageFlags: u32 {
        const BLOCKING = 0x01;
        const NON_BLOCKING = 0x02;
        const BROADCAST = 0x04;
        const MULTICAST = 0x08;
        /// Сообщение нельзя вытеснить политикой `DropOldest`.
        const RELIABLE = 0x10;
        const ORDERED = 0x20;
    }
}

bitflags! {
    /// Права доступа к очереди для задач, не являющихся владельцем.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        const CREATE = 0x04;
        const DELETE = 0x08;
        const ALL = 0xFF;
    }
}

/// Сообщение: единица передачи между задачами.
///
/// Обычное значение без ссылок на контейнер. Копии для рассылки получают
/// собственный `msg_id`, но разделяют `payload` через счётчик ссылок
/// [`Bytes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub msg_id: MsgId,
    pub sender_pid: Pid,
    pub receiver_pid: Pid,
    pub channel_id: ChannelId,
    pub kind: MessageType,
    pub priority: Priority,
    pub flags: MessageFlags,
    pub payload: Bytes,
    /// Время создания в микросекундах от эпохи Unix.
    pub timestamp: u64,
    pub sequence: u64,
    pub reply_to: MsgId,
}

/// Генератор идентификаторов сообщений и порядковых номеров.
///
/// Один экземпляр на реестр, общий для всех очередей.
#[derive(Debug)]
pub struct IdGenerator {
    next_msg_id: AtomicU32,
    next_sequence: AtomicU64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MessageType {
    pub fn from_wire(raw: u32) -> IpcResult<Self> {
        Self::try_from(raw).map_err(|_| IpcError::InvalidMsg)
    }
}

impl Priority {
    pub fn from_wire(raw: u32) -> IpcResult<Self> {
        Self::try_from(raw).map_err(|_| IpcError::InvalidMsg)
    }

    /// Индекс полосы в очереди: `0` для `Urgent`, `3` для `Low`.
    pub fn lane(self) -> usize {
        PRIORITY_LEVELS - 1 - u32::from(self) as usize
    }
}

impl Permissions {
    /// Очередь публична, если выставлен хотя бы один бит прав.
    pub fn is_public(self) -> bool {
        !self.is_empty()
    }
}

impl Message {
    /// Создаёт сообщение типа `DATA` с обычным приоритетом.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_priority(
        mut self,
        priority: Priority,
    ) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(
        mut self,
        kind: MessageType,
    ) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_flags(
        mut self,
        flags: MessageFlags,
    ) -> Self {
        self.flags |= flags;
        self
    }

    /// Помечает сообщение как ответ на `request`.
    pub fn in_reply_to(
        mut self,
        request: MsgId,
    ) -> Self {
        self.reply_to = request;
        self
    }

    pub fn data_size(&self) -> usize {
        self.payload.len()
    }

    pub fn is_reliable(&self) -> bool {
        self.flags.contains(MessageFlags::RELIABLE)
    }

    /// Независимая копия для доставки одному получателю.
    ///
    /// Идентификатор и порядковый номер сбрасываются: их назначит ядро при
    /// постановке копии в очередь. Полезная нагрузка не копируется.
    pub fn fanout_copy(
        &self,
        receiver: Pid,
    ) -> Self {
        Self {
            msg_id: 0,
            receiver_pid: receiver,
            sequence: 0,
            ..self.clone()
        }
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next_msg_id: AtomicU32::new(1),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Следующий идентификатор сообщения; `0` пропускается при переполнении.
    pub fn next_msg_id(&self) -> MsgId {
        loop {
            let id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Назначает сообщению идентификатор, отправителя и время создания.
    pub fn stamp(
        &self,
        msg: &mut Message,
        sender: Pid,
    ) -> MsgId {
        msg.msg_id = self.next_msg_id();
        msg.sender_pid = sender;
        msg.timestamp = now_micros();
        msg.msg_id
    }
}

////////////////////////////////////////////////////////////////////////////////
// Проверка параметров
////////////////////////////////////////////////////////////////////////////////

/// Проверяет сообщение перед любым изменением состояния.
pub fn validate_message(
    msg: &Message,
    max_size: usize,
) -> IpcResult<()> {
    if msg.payload.len() > max_size {
        return Err(IpcError::InvalidSize);
    }
    if msg.kind == MessageType::Reply && msg.reply_to == 0 {
        return Err(IpcError::InvalidMsg);
    }
    Ok(())
}

/// PID `0` никогда не адресует задачу.
pub fn validate_pid(pid: Pid) -> IpcResult<()> {
    if pid == 0 {
        return Err(IpcError::InvalidPid);
    }
    Ok(())
}

/// Имя канала: непустое, не длиннее `max_len` байт, без нулевых байтов.
pub fn validate_channel_name(
    name: &str,
    max_len: usize,
) -> IpcResult<()> {
    if name.is_empty() || name.len() > max_len || name.contains('\0') {
        return Err(IpcError::InvalidMsg);
    }
    Ok(())
}

pub fn now_micros() -> u64 {
    u64::try_from(Utc::now().timestamp_micros()).unwrap_or_default()
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for MessageType {
    fn default() -> Self {
        Self::Data
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
