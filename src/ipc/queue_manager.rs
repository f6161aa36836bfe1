use std::{sync::Arc, time::Instant};

use dashmap::DashMap;
use kipc_error::{IpcError, IpcResult};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{
    handle::HandleTable,
    message::{validate_message, IdGenerator, Message, MessageFlags, MsgId, Permissions, Pid, QueueId},
    queue::{MessageQueue, OverflowPolicy, QueueOptions, QueueStats, Wait},
    scheduler::Scheduler,
    stats::IpcStats,
};
use crate::config::IpcSettings;

/// Реестр очередей сообщений.
///
/// Таблица дескрипторов защищена отдельной узкой блокировкой, которая
/// никогда не удерживается во время ожидания на очереди: операции сначала
/// достают `Arc<MessageQueue>`, отпускают таблицу и только потом работают с
/// очередью.
pub struct QueueManager {
    settings: Arc<IpcSettings>,
    scheduler: Arc<dyn Scheduler>,
    stats: Arc<IpcStats>,
    ids: IdGenerator,
    table: RwLock<HandleTable<MessageQueue>>,
    /// Очередь процесса: первая созданная задачей очередь.
    process_queues: DashMap<Pid, QueueId>,
}

impl QueueManager {
    pub fn new(
        settings: Arc<IpcSettings>,
        scheduler: Arc<dyn Scheduler>,
        stats: Arc<IpcStats>,
    ) -> Self {
        let table = HandleTable::with_capacity(settings.max_queues);
        Self {
            settings,
            scheduler,
            stats,
            ids: IdGenerator::new(),
            table: RwLock::new(table),
            process_queues: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &IpcSettings {
        &self.settings
    }

    pub fn stats(&self) -> &IpcStats {
        &self.stats
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// PID вызывающей задачи; вызов вне контекста задачи даёт `InvalidPid`.
    pub fn current_pid(&self) -> IpcResult<Pid> {
        self.scheduler.current_task_id().ok_or(IpcError::InvalidPid)
    }

    pub fn is_valid_pid(
        &self,
        pid: Pid,
    ) -> bool {
        pid != 0 && self.scheduler.is_valid_pid(pid)
    }

    pub fn create_queue(
        &self,
        max_messages: usize,
        permissions: Permissions,
    ) -> IpcResult<QueueId> {
        self.create_queue_with(QueueOptions {
            capacity: max_messages,
            permissions,
            overflow: OverflowPolicy::Reject,
        })
    }

    pub fn create_queue_with(
        &self,
        options: QueueOptions,
    ) -> IpcResult<QueueId> {
        let owner = self.current_pid()?;
        let capacity = match options.capacity {
            0 => self.settings.default_queue_capacity,
            n if n > self.settings.max_queue_capacity => return Err(IpcError::InvalidSize),
            n => n,
        };

        let (id, _) = self
            .table
            .write()
            .insert_with(|id| {
                MessageQueue::new(id, owner, capacity, options.permissions, options.overflow)
            })
            .inspect_err(|_| {
                warn!(owner, max_queues = self.settings.max_queues, "Queue table is full")
            })?;

        self.process_queues.entry(owner).or_insert(id);
        self.stats.record_queue_created();
        debug!(queue_id = id, owner, capacity, "Queue created");
        Ok(id)
    }

    pub fn destroy_queue(
        &self,
        id: QueueId,
    ) -> IpcResult<()> {
        let caller = self.current_pid()?;
        let queue = self.lookup(id)?;
        if !queue.permits(caller, Permissions::DELETE) {
            return Err(IpcError::Permission);
        }

        // Кто первым убрал дескриптор из таблицы, тот и уничтожает.
        self.table
            .write()
            .remove(id)
            .ok_or(IpcError::InvalidQueue)?;
        self.process_queues
            .remove_if(&queue.owner(), |_, process_queue| *process_queue == id);

        let released = queue.destroy()?;
        self.stats.record_dropped(released as u64);
        self.stats.record_queue_destroyed();
        debug!(queue_id = id, released, "Queue destroyed");
        Ok(())
    }

    /// Отправка в очередь по дескриптору. Ядро проставляет отправителя,
    /// идентификатор и время создания.
    pub fn send_message(
        &self,
        id: QueueId,
        mut msg: Message,
        flags: MessageFlags,
    ) -> IpcResult<MsgId> {
        let caller = self.current_pid()?;
        validate_message(&msg, self.settings.max_message_size)?;
        let queue = self.lookup(id)?;
        if !queue.permits(caller, Permissions::WRITE) {
            return Err(IpcError::Permission);
        }

        if msg.receiver_pid == 0 {
            msg.receiver_pid = queue.owner();
        }
        self.ids.stamp(&mut msg, caller);
        self.enqueue(&queue, msg, Wait::from_flags(flags))
    }

    pub fn receive_message(
        &self,
        id: QueueId,
        flags: MessageFlags,
    ) -> IpcResult<Message> {
        self.receive_with(id, Wait::from_flags(flags))
    }

    pub fn receive_with(
        &self,
        id: QueueId,
        wait: Wait,
    ) -> IpcResult<Message> {
        let caller = self.current_pid()?;
        let queue = self.lookup(id)?;
        if !queue.permits(caller, Permissions::READ) {
            return Err(IpcError::Permission);
        }

        let msg = queue.pop(wait)?;
        self.stats.record_received();
        Ok(msg)
    }

    /// Приём из очереди процесса вызывающей задачи с крайним сроком.
    pub fn receive_own_until(
        &self,
        deadline: Instant,
    ) -> IpcResult<Message> {
        let caller = self.current_pid()?;
        let id = self.process_queue(caller).ok_or(IpcError::InvalidQueue)?;
        self.receive_with(id, Wait::Until(deadline))
    }

    pub fn peek_message(
        &self,
        id: QueueId,
    ) -> IpcResult<Message> {
        let caller = self.current_pid()?;
        let queue = self.lookup(id)?;
        if !queue.permits(caller, Permissions::READ) {
            return Err(IpcError::Permission);
        }
        queue.peek()
    }

    pub fn flush_queue(
        &self,
        id: QueueId,
    ) -> IpcResult<usize> {
        let caller = self.current_pid()?;
        let queue = self.lookup(id)?;
        if !queue.permits(caller, Permissions::DELETE) {
            return Err(IpcError::Permission);
        }

        let flushed = queue.flush()?;
        self.stats.record_dropped(flushed as u64);
        debug!(queue_id = id, flushed, "Queue flushed");
        Ok(flushed)
    }

    pub fn queue_count(
        &self,
        id: QueueId,
    ) -> IpcResult<usize> {
        Ok(self.lookup(id)?.len())
    }

    pub fn queue_stats(
        &self,
        id: QueueId,
    ) -> IpcResult<QueueStats> {
        Ok(self.lookup(id)?.stats())
    }

    pub fn process_queue(
        &self,
        pid: Pid,
    ) -> Option<QueueId> {
        self.process_queues.get(&pid).map(|entry| *entry)
    }

    /// Доставка ядром в очередь процесса `pid` в обход прав доступа.
    ///
    /// Сообщению без идентификатора (копии для рассылки) назначается новый.
    pub fn deliver(
        &self,
        pid: Pid,
        mut msg: Message,
        wait: Wait,
    ) -> IpcResult<MsgId> {
        if !self.is_valid_pid(pid) {
            return Err(IpcError::InvalidPid);
        }
        let id = self.process_queue(pid).ok_or(IpcError::InvalidQueue)?;
        let queue = self.lookup(id)?;

        if msg.msg_id == 0 {
            msg.msg_id = self.ids.next_msg_id();
        }
        msg.receiver_pid = pid;
        self.enqueue(&queue, msg, wait)
    }

    /// Учитывает доставку в обход очереди (ответ, переданный ожидающему
    /// напрямую).
    pub fn record_direct_delivery(&self) {
        self.stats.record_sent();
        self.stats.record_received();
    }

    pub fn owned_by(
        &self,
        pid: Pid,
    ) -> Vec<QueueId> {
        self.table
            .read()
            .iter()
            .filter(|(_, queue)| queue.owner() == pid)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn active_queues(&self) -> usize {
        self.table.read().len()
    }

    pub fn memory_usage(&self) -> usize {
        let queues: Vec<Arc<MessageQueue>> = self
            .table
            .read()
            .iter()
            .map(|(_, queue)| Arc::clone(queue))
            .collect();
        queues.iter().map(|queue| queue.memory_usage()).sum()
    }

    fn lookup(
        &self,
        id: QueueId,
    ) -> IpcResult<Arc<MessageQueue>> {
        self.table.read().get(id).ok_or(IpcError::InvalidQueue)
    }

    fn enqueue(
        &self,
        queue: &MessageQueue,
        msg: Message,
        wait: Wait,
    ) -> IpcResult<MsgId> {
        match queue.push(msg, wait, &self.ids) {
            Ok(out) => {
                self.stats.record_sent();
                if out.evicted > 0 {
                    self.stats.record_dropped(out.evicted as u64);
                    warn!(
                        queue_id = queue.id(),
                        evicted = out.evicted,
                        "Oldest message dropped to admit a new one"
                    );
                }
                Ok(out.msg_id)
            }
            Err(e) => {
                debug!(queue_id = queue.id(), error = %e, "Enqueue failed");
                Err(e)
            }
        }
    }
}
