//! Системные вызовы IPC: проверка пользовательской памяти, разбор
//! аргументов в типизированную операцию и её выполнение.

use std::{ops::Range, time::Duration};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use kipc_error::{IpcError, IpcResult, StackError};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::debug;

use super::{
    message::{
        ChannelId, Message, MessageFlags, MessageType, Permissions, Pid, Priority, QueueId,
        MAX_MESSAGE_SIZE,
    },
    Ipc,
};
use crate::config::IpcSettings;

/// Нижняя граница пользовательских адресов.
pub const USER_SPACE_BASE: u64 = 0x1000_0000;
/// Заголовок пользовательского сообщения в байтах.
pub const USER_MESSAGE_HEADER: usize = 48;
/// Полный размер пользовательского сообщения: заголовок и область данных.
pub const USER_MESSAGE_SIZE: usize = USER_MESSAGE_HEADER + MAX_MESSAGE_SIZE;
/// Предел длины строки из пространства пользователя, включая завершающий
/// ноль.
pub const USER_STRING_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u64)]
pub enum SyscallNumber {
    CreateQueue = 50,
    DestroyQueue = 51,
    SendMessage = 52,
    ReceiveMessage = 53,
    CreateChannel = 54,
    SubscribeChannel = 55,
    SendToChannel = 56,
    SendRequest = 57,
    SendReply = 58,
    SendAsync = 59,
    Broadcast = 60,
}

/// Сырой системный вызов: номер и пять аргументов-регистров.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSyscall {
    pub number: u64,
    pub args: [u64; 5],
}

/// Пользовательский адрес, уже проверенный на достаточный размер.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPtr(u64);

/// Разобранный системный вызов с проверенными аргументами.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateQueue {
        max_messages: usize,
        permissions: Permissions,
    },
    DestroyQueue {
        queue: QueueId,
    },
    SendMessage {
        queue: QueueId,
        message: Message,
        flags: MessageFlags,
    },
    ReceiveMessage {
        queue: QueueId,
        out: UserPtr,
        flags: MessageFlags,
    },
    CreateChannel {
        name: String,
        is_broadcast: bool,
        is_persistent: bool,
    },
    SubscribeChannel {
        channel: ChannelId,
        /// `None`: подписывается вызывающая задача.
        pid: Option<Pid>,
    },
    SendToChannel {
        channel: ChannelId,
        message: Message,
        flags: MessageFlags,
    },
    SendRequest {
        target: Pid,
        request: Message,
        reply_out: UserPtr,
        timeout: Duration,
    },
    SendReply {
        target: Pid,
        reply: Message,
    },
    SendAsync {
        target: Pid,
        message: Message,
    },
    Broadcast {
        message: Message,
        targets: Vec<Pid>,
    },
}

/// Адресное пространство задачи в размещённом режиме: непрерывная область
/// памяти, начинающаяся с `base`.
#[derive(Debug, Clone)]
pub struct AddressSpace {
    base: u64,
    memory: Vec<u8>,
}

////////////////////////////////////////////////////////////////////////////////
// Пользовательская память
////////////////////////////////////////////////////////////////////////////////

impl AddressSpace {
    pub fn new(size: usize) -> Self {
        Self::with_base(USER_SPACE_BASE, size)
    }

    pub fn with_base(
        base: u64,
        size: usize,
    ) -> Self {
        Self {
            base,
            memory: vec![0; size],
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Ненулевой адрес в пространстве пользователя, за которым лежит не
    /// меньше `len` байт.
    pub fn is_valid_user_pointer(
        &self,
        ptr: u64,
        len: usize,
    ) -> bool {
        self.range(ptr, len).is_some()
    }

    pub fn copy_from_user(
        &self,
        ptr: u64,
        len: usize,
    ) -> IpcResult<&[u8]> {
        let range = self.range(ptr, len).ok_or(IpcError::InvalidMsg)?;
        Ok(&self.memory[range])
    }

    pub fn copy_to_user(
        &mut self,
        ptr: u64,
        data: &[u8],
    ) -> IpcResult<()> {
        let range = self.range(ptr, data.len()).ok_or(IpcError::InvalidMsg)?;
        self.memory[range].copy_from_slice(data);
        Ok(())
    }

    /// Строка с завершающим нулём не длиннее `max` байт вместе с нулём.
    pub fn copy_string_from_user(
        &self,
        ptr: u64,
        max: usize,
    ) -> IpcResult<String> {
        let start = self.range(ptr, 1).ok_or(IpcError::InvalidMsg)?.start;
        let window = &self.memory[start..self.memory.len().min(start + max)];
        let len = window
            .iter()
            .position(|&b| b == 0)
            .ok_or(IpcError::InvalidMsg)?;
        std::str::from_utf8(&window[..len])
            .map(str::to_owned)
            .map_err(|_| IpcError::InvalidMsg)
    }

    fn range(
        &self,
        ptr: u64,
        len: usize,
    ) -> Option<Range<usize>> {
        if ptr == 0 || ptr < USER_SPACE_BASE || ptr < self.base {
            return None;
        }
        let start = usize::try_from(ptr - self.base).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.memory.len()).then_some(start..end)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Формат пользовательского сообщения
////////////////////////////////////////////////////////////////////////////////

/// Разбирает сообщение в формате пользовательского ABI (little endian).
pub fn decode_user_message(raw: &[u8]) -> IpcResult<Message> {
    if raw.len() < USER_MESSAGE_SIZE {
        return Err(IpcError::InvalidMsg);
    }
    let mut buf = &raw[..USER_MESSAGE_SIZE];

    let msg_id = buf.get_u32_le();
    let sender_pid = buf.get_u32_le();
    let receiver_pid = buf.get_u32_le();
    let channel_id = buf.get_u32_le();
    let kind = MessageType::from_wire(buf.get_u32_le())?;
    let priority = Priority::from_wire(buf.get_u32_le())?;
    let flags = MessageFlags::from_bits(buf.get_u32_le()).ok_or(IpcError::InvalidMsg)?;
    let data_size = buf.get_u32_le() as usize;
    let timestamp = buf.get_u64_le();
    let sequence = u64::from(buf.get_u32_le());
    let reply_to = buf.get_u32_le();

    if data_size > MAX_MESSAGE_SIZE {
        return Err(IpcError::InvalidSize);
    }

    Ok(Message {
        msg_id,
        sender_pid,
        receiver_pid,
        channel_id,
        kind,
        priority,
        flags,
        payload: Bytes::copy_from_slice(&buf[..data_size]),
        timestamp,
        sequence,
        reply_to,
    })
}

/// Кодирует сообщение в формат пользовательского ABI. Порядковый номер
/// усекается до 32 бит.
pub fn encode_user_message(msg: &Message) -> BytesMut {
    let data_size = msg.payload.len().min(MAX_MESSAGE_SIZE);
    let mut buf = BytesMut::with_capacity(USER_MESSAGE_SIZE);

    buf.put_u32_le(msg.msg_id);
    buf.put_u32_le(msg.sender_pid);
    buf.put_u32_le(msg.receiver_pid);
    buf.put_u32_le(msg.channel_id);
    buf.put_u32_le(msg.kind.into());
    buf.put_u32_le(msg.priority.into());
    buf.put_u32_le(msg.flags.bits());
    buf.put_u32_le(data_size as u32);
    buf.put_u64_le(msg.timestamp);
    buf.put_u32_le(msg.sequence as u32);
    buf.put_u32_le(msg.reply_to);
    buf.put_slice(&msg.payload[..data_size]);
    buf.put_bytes(0, MAX_MESSAGE_SIZE - data_size);
    buf
}

////////////////////////////////////////////////////////////////////////////////
// Разбор аргументов
////////////////////////////////////////////////////////////////////////////////

impl Operation {
    /// Разбирает сырой вызов. Все указатели проверяются до чтения, буферы
    /// для результата проверяются до выполнения операции.
    pub fn decode(
        raw: &RawSyscall,
        space: &AddressSpace,
        settings: &IpcSettings,
    ) -> IpcResult<Self> {
        let number = SyscallNumber::try_from(raw.number).map_err(|_| IpcError::InvalidMsg)?;
        let [a1, a2, a3, a4, _] = raw.args;

        let op = match number {
            SyscallNumber::CreateQueue => Operation::CreateQueue {
                max_messages: usize::try_from(a1).map_err(|_| IpcError::InvalidSize)?,
                permissions: Permissions::from_bits_truncate(arg_u32(a2)?),
            },
            SyscallNumber::DestroyQueue => Operation::DestroyQueue { queue: arg_u32(a1)? },
            SyscallNumber::SendMessage => Operation::SendMessage {
                queue: arg_u32(a1)?,
                message: read_message(space, a2)?,
                flags: arg_flags(a3)?,
            },
            SyscallNumber::ReceiveMessage => Operation::ReceiveMessage {
                queue: arg_u32(a1)?,
                out: user_buffer(space, a2)?,
                flags: arg_flags(a3)?,
            },
            SyscallNumber::CreateChannel => Operation::CreateChannel {
                name: space.copy_string_from_user(a1, USER_STRING_MAX)?,
                is_broadcast: a2 != 0,
                is_persistent: a3 != 0,
            },
            SyscallNumber::SubscribeChannel => Operation::SubscribeChannel {
                channel: arg_u32(a1)?,
                pid: Some(arg_u32(a2)?).filter(|&pid| pid != 0),
            },
            SyscallNumber::SendToChannel => Operation::SendToChannel {
                channel: arg_u32(a1)?,
                message: read_message(space, a2)?,
                flags: arg_flags(a3)?,
            },
            SyscallNumber::SendRequest => Operation::SendRequest {
                target: arg_u32(a1)?,
                request: read_message(space, a2)?,
                reply_out: user_buffer(space, a3)?,
                timeout: Duration::from_millis(u64::from(arg_u32(a4)?)),
            },
            SyscallNumber::SendReply => Operation::SendReply {
                target: arg_u32(a1)?,
                reply: read_message(space, a2)?,
            },
            SyscallNumber::SendAsync => Operation::SendAsync {
                target: arg_u32(a1)?,
                message: read_message(space, a2)?,
            },
            SyscallNumber::Broadcast => {
                let count = usize::try_from(a3).map_err(|_| IpcError::InvalidSize)?;
                if count > settings.max_broadcast_targets {
                    return Err(IpcError::InvalidSize);
                }
                let message = read_message(space, a1)?;
                let mut raw_pids = space.copy_from_user(a2, count * 4)?;
                let targets = (0..count).map(|_| raw_pids.get_u32_le()).collect();
                Operation::Broadcast { message, targets }
            }
        };
        Ok(op)
    }

    pub fn number(&self) -> SyscallNumber {
        match self {
            Operation::CreateQueue { .. } => SyscallNumber::CreateQueue,
            Operation::DestroyQueue { .. } => SyscallNumber::DestroyQueue,
            Operation::SendMessage { .. } => SyscallNumber::SendMessage,
            Operation::ReceiveMessage { .. } => SyscallNumber::ReceiveMessage,
            Operation::CreateChannel { .. } => SyscallNumber::CreateChannel,
            Operation::SubscribeChannel { .. } => SyscallNumber::SubscribeChannel,
            Operation::SendToChannel { .. } => SyscallNumber::SendToChannel,
            Operation::SendRequest { .. } => SyscallNumber::SendRequest,
            Operation::SendReply { .. } => SyscallNumber::SendReply,
            Operation::SendAsync { .. } => SyscallNumber::SendAsync,
            Operation::Broadcast { .. } => SyscallNumber::Broadcast,
        }
    }
}

fn arg_u32(arg: u64) -> IpcResult<u32> {
    u32::try_from(arg).map_err(|_| IpcError::InvalidMsg)
}

fn arg_flags(arg: u64) -> IpcResult<MessageFlags> {
    MessageFlags::from_bits(arg_u32(arg)?).ok_or(IpcError::InvalidMsg)
}

fn read_message(
    space: &AddressSpace,
    ptr: u64,
) -> IpcResult<Message> {
    decode_user_message(space.copy_from_user(ptr, USER_MESSAGE_SIZE)?)
}

fn user_buffer(
    space: &AddressSpace,
    ptr: u64,
) -> IpcResult<UserPtr> {
    if !space.is_valid_user_pointer(ptr, USER_MESSAGE_SIZE) {
        return Err(IpcError::InvalidMsg);
    }
    Ok(UserPtr(ptr))
}

////////////////////////////////////////////////////////////////////////////////
// Выполнение
////////////////////////////////////////////////////////////////////////////////

impl Ipc {
    /// Точка входа системного вызова: неотрицательный результат или
    /// отрицательный код ошибки.
    pub fn syscall(
        &self,
        raw: &RawSyscall,
        space: &mut AddressSpace,
    ) -> i64 {
        let result = Operation::decode(raw, space, self.settings())
            .and_then(|op| self.dispatch(op, space));

        match result {
            Ok(value) => value as i64,
            Err(e) => {
                let err = StackError::from(e).context(format!("syscall {}", raw.number));
                debug!(error = %err, "IPC syscall failed");
                i64::from(err.syscall_code())
            }
        }
    }

    /// Выполняет разобранную операцию.
    pub fn dispatch(
        &self,
        op: Operation,
        space: &mut AddressSpace,
    ) -> IpcResult<u64> {
        match op {
            Operation::CreateQueue {
                max_messages,
                permissions,
            } => self
                .create_queue(max_messages, permissions)
                .map(u64::from),
            Operation::DestroyQueue { queue } => self.destroy_queue(queue).map(|()| 0),
            Operation::SendMessage {
                queue,
                message,
                flags,
            } => self.send_message(queue, message, flags).map(u64::from),
            Operation::ReceiveMessage { queue, out, flags } => {
                let msg = self.receive_message(queue, flags)?;
                space.copy_to_user(out.0, &encode_user_message(&msg))?;
                Ok(0)
            }
            Operation::CreateChannel {
                name,
                is_broadcast,
                is_persistent,
            } => self
                .create_channel(&name, is_broadcast, is_persistent)
                .map(u64::from),
            Operation::SubscribeChannel { channel, pid } => {
                let pid = match pid {
                    Some(pid) => pid,
                    None => self.current_pid()?,
                };
                self.subscribe_channel(channel, pid).map(|_| 0)
            }
            Operation::SendToChannel {
                channel,
                message,
                flags,
            } => self
                .send_to_channel(channel, message, flags)
                .map(|report| report.delivered as u64),
            Operation::SendRequest {
                target,
                request,
                reply_out,
                timeout,
            } => {
                let reply = self.send_request(target, request, timeout)?;
                space.copy_to_user(reply_out.0, &encode_user_message(&reply))?;
                Ok(0)
            }
            Operation::SendReply { target, reply } => self.send_reply(target, reply).map(|_| 0),
            Operation::SendAsync { target, message } => {
                self.send_async(target, message).map(u64::from)
            }
            Operation::Broadcast { message, targets } => self
                .broadcast(message, &targets)
                .map(|report| report.delivered as u64),
        }
    }
}
