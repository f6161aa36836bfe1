use std::{collections::VecDeque, mem, time::Instant};

use kipc_error::{IpcError, IpcResult};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::message::{
    IdGenerator, Message, MessageFlags, MsgId, Permissions, Pid, QueueId, PRIORITY_LEVELS,
};

/// Поведение неблокирующей отправки в заполненную очередь.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Отказ с `QueueFull`.
    #[default]
    Reject,
    /// Вытеснение самого старого сообщения низшего занятого приоритета.
    /// Сообщения с флагом `RELIABLE` не вытесняются.
    DropOldest,
}

/// Режим ожидания для операций над очередью.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    NonBlocking,
    Blocking,
    /// Блокирующее ожидание с крайним сроком; по истечении `Timeout`.
    Until(Instant),
}

/// Параметры создания очереди.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// `0` означает ёмкость по умолчанию из настроек.
    pub capacity: usize,
    pub permissions: Permissions,
    pub overflow: OverflowPolicy,
}

/// Результат успешной постановки в очередь.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub msg_id: MsgId,
    /// Сколько сообщений вытеснено политикой `DropOldest`.
    pub evicted: usize,
}

/// Снимок состояния очереди.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub id: QueueId,
    pub owner: Pid,
    pub capacity: usize,
    pub count: usize,
    pub blocked_senders: usize,
    pub blocked_receivers: usize,
    pub permissions: u32,
    pub is_public: bool,
    pub overflow: OverflowPolicy,
    pub total_sent: u64,
    pub total_received: u64,
    pub total_dropped: u64,
}

/// Ограниченная очередь сообщений с приоритетами.
///
/// Содержимое лежит в четырёх полосах по приоритету (индекс `0` для
/// `Urgent`), внутри полосы строгий FIFO. Одна блокировка на всё состояние
/// очереди; ожидающие отправители и получатели паркуются на отдельных
/// условных переменных.
#[derive(Debug)]
pub struct MessageQueue {
    id: QueueId,
    owner: Pid,
    capacity: usize,
    permissions: Permissions,
    overflow: OverflowPolicy,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    /// Сигнал для `destroy`: все разбуженные ожидающие покинули очередь.
    idle: Condvar,
}

#[derive(Debug, Default)]
struct QueueState {
    lanes: [VecDeque<Message>; PRIORITY_LEVELS],
    count: usize,
    blocked_senders: usize,
    blocked_receivers: usize,
    destroyed: bool,
    total_sent: u64,
    total_received: u64,
    total_dropped: u64,
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Sender,
    Receiver,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Wait {
    /// `NON_BLOCKING` возвращает управление сразу, иначе вызов блокируется.
    pub fn from_flags(flags: MessageFlags) -> Self {
        if flags.contains(MessageFlags::NON_BLOCKING) {
            Wait::NonBlocking
        } else {
            Wait::Blocking
        }
    }
}

impl MessageQueue {
    pub fn new(
        id: QueueId,
        owner: Pid,
        capacity: usize,
        permissions: Permissions,
        overflow: OverflowPolicy,
    ) -> Self {
        Self {
            id,
            owner,
            capacity,
            permissions,
            overflow,
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn owner(&self) -> Pid {
        self.owner
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_public(&self) -> bool {
        self.permissions.is_public()
    }

    /// Владелец имеет все права; остальные задачи только на публичной
    /// очереди и только в пределах выставленных битов.
    pub fn permits(
        &self,
        pid: Pid,
        required: Permissions,
    ) -> bool {
        pid == self.owner || (self.is_public() && self.permissions.contains(required))
    }

    /// Ставит сообщение в очередь.
    ///
    /// Порядковый номер назначается под блокировкой очереди, поэтому
    /// порядок номеров внутри очереди совпадает с порядком вставки.
    pub fn push(
        &self,
        mut msg: Message,
        wait: Wait,
        ids: &IdGenerator,
    ) -> IpcResult<Enqueued> {
        let mut st = self.state.lock();
        let mut evicted = 0;
        let mut timed_out = false;

        loop {
            if st.destroyed {
                return Err(IpcError::InvalidQueue);
            }
            if st.count < self.capacity {
                break;
            }
            if timed_out {
                return Err(IpcError::Timeout);
            }
            match wait {
                Wait::NonBlocking => {
                    if self.overflow == OverflowPolicy::DropOldest && st.evict_oldest().is_some() {
                        st.total_dropped += 1;
                        evicted += 1;
                        break;
                    }
                    return Err(IpcError::QueueFull);
                }
                Wait::Blocking | Wait::Until(_) => {
                    timed_out = self.park(&mut st, Role::Sender, wait)?;
                }
            }
        }

        msg.sequence = ids.next_sequence();
        let msg_id = msg.msg_id;
        st.enqueue(msg);
        st.total_sent += 1;
        st.check_invariants(self.capacity);
        drop(st);

        self.not_empty.notify_one();
        Ok(Enqueued { msg_id, evicted })
    }

    /// Извлекает сообщение с наивысшим приоритетом и наименьшим порядковым
    /// номером.
    pub fn pop(
        &self,
        wait: Wait,
    ) -> IpcResult<Message> {
        let mut st = self.state.lock();
        let mut timed_out = false;

        loop {
            if st.destroyed {
                return Err(IpcError::InvalidQueue);
            }
            if let Some(msg) = st.dequeue() {
                st.total_received += 1;
                st.check_invariants(self.capacity);
                drop(st);
                self.not_full.notify_one();
                return Ok(msg);
            }
            if timed_out {
                return Err(IpcError::Timeout);
            }
            match wait {
                Wait::NonBlocking => return Err(IpcError::QueueEmpty),
                Wait::Blocking | Wait::Until(_) => {
                    timed_out = self.park(&mut st, Role::Receiver, wait)?;
                }
            }
        }
    }

    pub fn peek(&self) -> IpcResult<Message> {
        let st = self.state.lock();
        if st.destroyed {
            return Err(IpcError::InvalidQueue);
        }
        st.head().cloned().ok_or(IpcError::QueueEmpty)
    }

    /// Удаляет всё содержимое (учитывается как потерянное) и будит
    /// заблокированных отправителей.
    pub fn flush(&self) -> IpcResult<usize> {
        let mut st = self.state.lock();
        if st.destroyed {
            return Err(IpcError::InvalidQueue);
        }
        let flushed = st.clear();
        st.total_dropped += flushed as u64;
        drop(st);

        self.not_full.notify_all();
        Ok(flushed)
    }

    /// Уничтожает очередь: освобождает содержимое, будит всех ожидающих с
    /// `InvalidQueue` и возвращается только после их ухода.
    ///
    /// Возвращает число освобождённых сообщений.
    pub fn destroy(&self) -> IpcResult<usize> {
        let mut st = self.state.lock();
        if st.destroyed {
            return Err(IpcError::InvalidQueue);
        }
        st.destroyed = true;
        let released = st.clear();
        st.total_dropped += released as u64;

        let waiters = st.blocked_senders + st.blocked_receivers;
        if waiters > 0 {
            warn!(queue_id = self.id, waiters, "Waking tasks blocked on destroyed queue");
            self.not_empty.notify_all();
            self.not_full.notify_all();
            while st.blocked_senders + st.blocked_receivers > 0 {
                self.idle.wait(&mut st);
            }
        }
        Ok(released)
    }

    pub fn len(&self) -> usize {
        self.state.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let st = self.state.lock();
        QueueStats {
            id: self.id,
            owner: self.owner,
            capacity: self.capacity,
            count: st.count,
            blocked_senders: st.blocked_senders,
            blocked_receivers: st.blocked_receivers,
            permissions: self.permissions.bits(),
            is_public: self.is_public(),
            overflow: self.overflow,
            total_sent: st.total_sent,
            total_received: st.total_received,
            total_dropped: st.total_dropped,
        }
    }

    /// Оценка занятой памяти: сама очередь и буферы сообщений.
    pub fn memory_usage(&self) -> usize {
        let st = self.state.lock();
        let messages: usize = st
            .lanes
            .iter()
            .flatten()
            .map(|msg| mem::size_of::<Message>() + msg.payload.len())
            .sum();
        mem::size_of::<Self>() + messages
    }

    /// Паркует вызывающего до сигнала. Возвращает `true`, если истёк срок.
    fn park(
        &self,
        st: &mut MutexGuard<'_, QueueState>,
        role: Role,
        wait: Wait,
    ) -> IpcResult<bool> {
        let condvar = match role {
            Role::Sender => &self.not_full,
            Role::Receiver => &self.not_empty,
        };

        *st.blocked_mut(role) += 1;
        trace!(queue_id = self.id, ?role, "Task blocked on queue");
        let timed_out = match wait {
            Wait::Until(deadline) => condvar.wait_until(st, deadline).timed_out(),
            Wait::Blocking | Wait::NonBlocking => {
                condvar.wait(st);
                false
            }
        };
        *st.blocked_mut(role) -= 1;

        if st.destroyed {
            if st.blocked_senders + st.blocked_receivers == 0 {
                self.idle.notify_all();
            }
            return Err(IpcError::InvalidQueue);
        }
        Ok(timed_out)
    }
}

impl QueueState {
    fn enqueue(
        &mut self,
        msg: Message,
    ) {
        self.lanes[msg.priority.lane()].push_back(msg);
        self.count += 1;
    }

    fn dequeue(&mut self) -> Option<Message> {
        let msg = self.lanes.iter_mut().find_map(VecDeque::pop_front)?;
        self.count -= 1;
        Some(msg)
    }

    fn head(&self) -> Option<&Message> {
        self.lanes.iter().find_map(VecDeque::front)
    }

    /// Самое старое невытесняемое сообщение, начиная с низшего приоритета.
    fn evict_oldest(&mut self) -> Option<Message> {
        for lane in self.lanes.iter_mut().rev() {
            if let Some(pos) = lane.iter().position(|msg| !msg.is_reliable()) {
                self.count -= 1;
                return lane.remove(pos);
            }
        }
        None
    }

    fn clear(&mut self) -> usize {
        let released = self.count;
        for lane in &mut self.lanes {
            lane.clear();
        }
        self.count = 0;
        released
    }

    fn blocked_mut(
        &mut self,
        role: Role,
    ) -> &mut usize {
        match role {
            Role::Sender => &mut self.blocked_senders,
            Role::Receiver => &mut self.blocked_receivers,
        }
    }

    /// Повреждение счётчика недопустимо и приводит к панике.
    fn check_invariants(
        &self,
        capacity: usize,
    ) {
        let actual: usize = self.lanes.iter().map(VecDeque::len).sum();
        assert!(
            actual == self.count && self.count <= capacity,
            "queue count invariant violated: count={}, stored={actual}, capacity={capacity}",
            self.count
        );

        #[cfg(debug_assertions)]
        {
            let mut seen = std::collections::HashSet::with_capacity(actual);
            for msg in self.lanes.iter().flatten() {
                assert!(
                    msg.msg_id == 0 || seen.insert(msg.msg_id),
                    "duplicate message id {} in queue",
                    msg.msg_id
                );
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
