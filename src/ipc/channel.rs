use std::{
    collections::{HashMap, VecDeque},
    mem,
    sync::Arc,
};

use kipc_error::{IpcError, IpcResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use super::{
    handle::HandleTable,
    message::{validate_channel_name, validate_message, ChannelId, Message, MessageFlags, Pid},
    queue::Wait,
    queue_manager::QueueManager,
};

/// Параметры создания канала.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Копии помечаются `BROADCAST` вместо `MULTICAST`.
    pub is_broadcast: bool,
    /// Без подписчиков сообщения буферизуются, а не теряются.
    pub is_persistent: bool,
    /// Ограничение размера сообщения для этого канала.
    pub max_message_size: Option<usize>,
}

/// Итог публикации в канал.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelDelivery {
    pub delivered: usize,
    pub dropped: usize,
    pub buffered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub creator: Pid,
    pub subscribers: usize,
    pub is_broadcast: bool,
    pub is_persistent: bool,
    pub max_message_size: usize,
    pub buffered: usize,
    pub total_published: u64,
    pub total_dropped: u64,
}

/// Именованный канал публикации/подписки.
///
/// Подписчики и буфер защищены одной блокировкой канала. Доставка в очереди
/// подписчиков идёт под ней, поэтому порядок блокировок: канал, затем
/// очередь.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    name: Arc<str>,
    creator: Pid,
    is_broadcast: bool,
    is_persistent: bool,
    max_message_size: usize,
    state: Mutex<ChannelState>,
}

#[derive(Debug, Default)]
struct ChannelState {
    subscribers: Vec<Pid>,
    buffered: VecDeque<BufferedMessage>,
    destroyed: bool,
    total_published: u64,
    total_dropped: u64,
}

/// Сообщение, ожидающее подписчиков. Помнит, с кем расчёт уже закончен
/// (копия доставлена или потеряна), чтобы повторная попытка не дублировала
/// копии.
#[derive(Debug)]
struct BufferedMessage {
    msg: Message,
    settled: Vec<Pid>,
}

#[derive(Debug)]
struct ChannelTable {
    handles: HandleTable<Channel>,
    names: HashMap<Arc<str>, ChannelId>,
}

/// Реестр каналов поверх [`QueueManager`].
pub struct ChannelManager {
    queues: Arc<QueueManager>,
    table: RwLock<ChannelTable>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Channel {
    pub fn is_subscribed(
        &self,
        pid: Pid,
    ) -> bool {
        self.state.lock().subscribers.contains(&pid)
    }

    pub fn info(&self) -> ChannelInfo {
        let st = self.state.lock();
        ChannelInfo {
            id: self.id,
            name: self.name.to_string(),
            creator: self.creator,
            subscribers: st.subscribers.len(),
            is_broadcast: self.is_broadcast,
            is_persistent: self.is_persistent,
            max_message_size: self.max_message_size,
            buffered: st.buffered.len(),
            total_published: st.total_published,
            total_dropped: st.total_dropped,
        }
    }

    fn memory_usage(&self) -> usize {
        let st = self.state.lock();
        let buffered: usize = st
            .buffered
            .iter()
            .map(|entry| mem::size_of::<BufferedMessage>() + entry.msg.payload.len())
            .sum();
        mem::size_of::<Self>()
            + self.name.len()
            + st.subscribers.capacity() * mem::size_of::<Pid>()
            + buffered
    }
}

impl ChannelManager {
    pub fn new(queues: Arc<QueueManager>) -> Self {
        let table = ChannelTable {
            handles: HandleTable::with_capacity(queues.settings().max_channels),
            names: HashMap::new(),
        };
        Self {
            queues,
            table: RwLock::new(table),
        }
    }

    pub fn create_channel(
        &self,
        name: &str,
        is_broadcast: bool,
        is_persistent: bool,
    ) -> IpcResult<ChannelId> {
        self.create_channel_with(
            name,
            ChannelOptions {
                is_broadcast,
                is_persistent,
                max_message_size: None,
            },
        )
    }

    pub fn create_channel_with(
        &self,
        name: &str,
        options: ChannelOptions,
    ) -> IpcResult<ChannelId> {
        let creator = self.queues.current_pid()?;
        let settings = self.queues.settings();
        validate_channel_name(name, settings.channel_name_max)?;
        let max_message_size = match options.max_message_size {
            None => settings.max_message_size,
            Some(size) if size == 0 || size > settings.max_message_size => {
                return Err(IpcError::InvalidSize)
            }
            Some(size) => size,
        };

        let mut table = self.table.write();
        if table.names.contains_key(name) {
            return Err(IpcError::ChannelExists);
        }

        let name: Arc<str> = Arc::from(name);
        let (id, _) = table
            .handles
            .insert_with(|id| Channel {
                id,
                name: Arc::clone(&name),
                creator,
                is_broadcast: options.is_broadcast,
                is_persistent: options.is_persistent,
                max_message_size,
                state: Mutex::new(ChannelState {
                    subscribers: Vec::with_capacity(settings.max_subscribers),
                    ..Default::default()
                }),
            })
            .inspect_err(|_| warn!(%name, "Channel table is full"))?;
        table.names.insert(Arc::clone(&name), id);
        drop(table);

        self.queues.stats().record_channel_created();
        debug!(channel_id = id, %name, creator, ?options, "Channel created");
        Ok(id)
    }

    /// Уничтожает канал. Доступно только создателю.
    pub fn destroy_channel(
        &self,
        id: ChannelId,
    ) -> IpcResult<()> {
        let caller = self.queues.current_pid()?;
        let channel = self.lookup(id)?;
        if channel.creator != caller {
            return Err(IpcError::Permission);
        }

        {
            let mut table = self.table.write();
            table.handles.remove(id).ok_or(IpcError::ChannelNotFound)?;
            table.names.remove(&channel.name);
        }

        let mut st = channel.state.lock();
        st.destroyed = true;
        let released = st.buffered.len();
        st.buffered.clear();
        st.subscribers.clear();
        st.total_dropped += released as u64;
        drop(st);

        self.queues.stats().record_dropped(released as u64);
        self.queues.stats().record_channel_destroyed();
        debug!(channel_id = id, name = %channel.name, released, "Channel destroyed");
        Ok(())
    }

    /// Подписывает `pid`. Возвращает число копий, доставленных из буфера.
    pub fn subscribe_channel(
        &self,
        id: ChannelId,
        pid: Pid,
    ) -> IpcResult<usize> {
        if !self.queues.is_valid_pid(pid) {
            return Err(IpcError::InvalidPid);
        }
        let channel = self.lookup(id)?;
        let mut guard = channel.state.lock();
        let st = &mut *guard;
        if st.destroyed {
            return Err(IpcError::ChannelNotFound);
        }
        if st.subscribers.contains(&pid) {
            return Ok(0);
        }
        let max = self.queues.settings().max_subscribers;
        if st.subscribers.len() >= max {
            warn!(channel_id = id, pid, max, "Listener table full");
            return Err(IpcError::NoMemory);
        }

        st.subscribers.push(pid);
        debug!(channel_id = id, pid, "Subscribed");

        if channel.is_persistent && !st.buffered.is_empty() {
            Ok(self.flush_buffer(id, st))
        } else {
            Ok(0)
        }
    }

    pub fn unsubscribe_channel(
        &self,
        id: ChannelId,
        pid: Pid,
    ) -> IpcResult<()> {
        let channel = self.lookup(id)?;
        let mut st = channel.state.lock();
        let pos = st
            .subscribers
            .iter()
            .position(|&sub| sub == pid)
            .ok_or(IpcError::NotSubscribed)?;
        st.subscribers.remove(pos);
        debug!(channel_id = id, pid, "Unsubscribed");
        Ok(())
    }

    /// Публикация в канал.
    ///
    /// Каждый подписчик получает независимую копию в свою очередь процесса.
    /// Доставка неблокирующая: отсутствующая или заполненная очередь
    /// считается потерей. Подписчику, которому ещё не доставлен буфер,
    /// копия не отправляется сразу, а ставится в буфер за старыми
    /// сообщениями. Из флагов вызова на копии переносятся только `RELIABLE`
    /// и `ORDERED`.
    pub fn send_to_channel(
        &self,
        id: ChannelId,
        mut msg: Message,
        flags: MessageFlags,
    ) -> IpcResult<ChannelDelivery> {
        let sender = self.queues.current_pid()?;
        let channel = self.lookup(id)?;
        if msg.payload.len() > channel.max_message_size {
            return Err(IpcError::InvalidSize);
        }
        validate_message(&msg, self.queues.settings().max_message_size)?;

        msg.channel_id = id;
        msg.flags |= flags & (MessageFlags::RELIABLE | MessageFlags::ORDERED);
        msg.flags
            .remove(MessageFlags::BROADCAST | MessageFlags::MULTICAST);
        msg.flags |= if channel.is_broadcast {
            MessageFlags::BROADCAST
        } else {
            MessageFlags::MULTICAST
        };
        self.queues.ids().stamp(&mut msg, sender);

        let mut guard = channel.state.lock();
        let st = &mut *guard;
        if st.destroyed {
            return Err(IpcError::ChannelNotFound);
        }
        st.total_published += 1;

        if st.subscribers.is_empty() {
            return self.hold_or_drop(&channel, st, msg);
        }

        if !st.buffered.is_empty() {
            self.flush_buffer(id, st);
        }

        let mut report = ChannelDelivery::default();
        let mut settled = Vec::with_capacity(st.subscribers.len());
        let mut held_back = 0;
        for &pid in &st.subscribers {
            if st.has_pending(pid) {
                held_back += 1;
                continue;
            }
            match self.queues.deliver(pid, msg.fanout_copy(pid), Wait::NonBlocking) {
                Ok(_) => report.delivered += 1,
                Err(e) => {
                    debug!(channel_id = id, pid, error = %e, "Subscriber delivery failed");
                    report.dropped += 1;
                }
            }
            settled.push(pid);
        }

        if held_back > 0 {
            let depth = self.queues.settings().persistent_buffer_depth;
            if st.buffered.len() < depth {
                st.buffered.push_back(BufferedMessage { msg, settled });
                report.buffered = true;
            } else {
                warn!(channel_id = id, depth, held_back, "Persistent buffer full, copies dropped");
                report.dropped += held_back;
            }
        }

        if report.dropped > 0 {
            st.total_dropped += report.dropped as u64;
            self.queues.stats().record_dropped(report.dropped as u64);
        }
        Ok(report)
    }

    pub fn find_channel(
        &self,
        name: &str,
    ) -> Option<ChannelId> {
        self.table.read().names.get(name).copied()
    }

    pub fn channel_info(
        &self,
        id: ChannelId,
    ) -> IpcResult<ChannelInfo> {
        Ok(self.lookup(id)?.info())
    }

    pub fn list_channels(&self) -> Vec<ChannelInfo> {
        self.snapshot().iter().map(|channel| channel.info()).collect()
    }

    pub fn subscriptions_of(
        &self,
        pid: Pid,
    ) -> Vec<ChannelId> {
        self.snapshot()
            .iter()
            .filter(|channel| channel.is_subscribed(pid))
            .map(|channel| channel.id)
            .collect()
    }

    pub fn active_channels(&self) -> usize {
        self.table.read().handles.len()
    }

    pub fn memory_usage(&self) -> usize {
        self.snapshot()
            .iter()
            .map(|channel| channel.memory_usage())
            .sum()
    }

    fn lookup(
        &self,
        id: ChannelId,
    ) -> IpcResult<Arc<Channel>> {
        self.table
            .read()
            .handles
            .get(id)
            .ok_or(IpcError::ChannelNotFound)
    }

    /// Живые каналы; блокировка таблицы отпускается до обращения к каналам.
    fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.table
            .read()
            .handles
            .iter()
            .map(|(_, channel)| Arc::clone(channel))
            .collect()
    }

    /// Нет подписчиков: постоянный канал буферизует, остальные теряют
    /// сообщение.
    fn hold_or_drop(
        &self,
        channel: &Channel,
        st: &mut ChannelState,
        msg: Message,
    ) -> IpcResult<ChannelDelivery> {
        if !channel.is_persistent {
            st.total_dropped += 1;
            self.queues.stats().record_dropped(1);
            debug!(channel_id = channel.id, "No subscribers, message dropped");
            return Ok(ChannelDelivery {
                dropped: 1,
                ..Default::default()
            });
        }

        let depth = self.queues.settings().persistent_buffer_depth;
        if st.buffered.len() >= depth {
            st.total_dropped += 1;
            self.queues.stats().record_dropped(1);
            warn!(channel_id = channel.id, depth, "Persistent buffer full");
            return Err(IpcError::QueueFull);
        }

        st.buffered.push_back(BufferedMessage {
            msg,
            settled: Vec::new(),
        });
        Ok(ChannelDelivery {
            buffered: true,
            ..Default::default()
        })
    }

    /// Доставляет буфер текущим подписчикам в исходном порядке.
    ///
    /// Подписчик, чья очередь не приняла копию, до следующей попытки
    /// пропускает все более поздние записи; остальные получают их сразу.
    /// Запись покидает буфер, когда с ней рассчитались все подписчики.
    /// Возвращает число доставленных копий.
    fn flush_buffer(
        &self,
        id: ChannelId,
        st: &mut ChannelState,
    ) -> usize {
        let mut stalled: Vec<Pid> = Vec::new();
        let mut delivered = 0;
        for entry in st.buffered.iter_mut() {
            for &pid in &st.subscribers {
                if entry.settled.contains(&pid) || stalled.contains(&pid) {
                    continue;
                }
                match self
                    .queues
                    .deliver(pid, entry.msg.fanout_copy(pid), Wait::NonBlocking)
                {
                    Ok(_) => {
                        entry.settled.push(pid);
                        delivered += 1;
                    }
                    Err(e) => {
                        debug!(channel_id = id, pid, error = %e, "Buffered delivery deferred");
                        stalled.push(pid);
                    }
                }
            }
        }

        let subscribers = &st.subscribers;
        let before = st.buffered.len();
        st.buffered
            .retain(|entry| !subscribers.iter().all(|pid| entry.settled.contains(pid)));

        if delivered > 0 {
            debug!(
                channel_id = id,
                delivered,
                completed = before - st.buffered.len(),
                remaining = st.buffered.len(),
                "Buffer flushed"
            );
        }
        delivered
    }
}

impl ChannelState {
    /// Есть ли в буфере запись, ещё не доставленная `pid`.
    fn has_pending(
        &self,
        pid: Pid,
    ) -> bool {
        self.buffered
            .iter()
            .any(|entry| !entry.settled.contains(&pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::IpcSettings,
        ipc::{
            message::Permissions,
            scheduler::{Scheduler, TaskTable},
            stats::IpcStats,
        },
    };

    struct Fixture {
        tasks: Arc<TaskTable>,
        queues: Arc<QueueManager>,
        channels: ChannelManager,
    }

    fn fixture(settings: IpcSettings) -> Fixture {
        let tasks = Arc::new(TaskTable::new());
        for pid in 1..=40 {
            tasks.register(pid, format!("task-{pid}")).unwrap();
        }
        let scheduler: Arc<dyn Scheduler> = tasks.clone();
        let queues = Arc::new(QueueManager::new(
            Arc::new(settings),
            scheduler,
            Arc::new(IpcStats::new()),
        ));
        let channels = ChannelManager::new(queues.clone());
        Fixture {
            tasks,
            queues,
            channels,
        }
    }

    impl Fixture {
        fn queue_for(
            &self,
            pid: Pid,
            capacity: usize,
        ) {
            let _g = self.tasks.enter(pid);
            self.queues
                .create_queue(capacity, Permissions::empty())
                .unwrap();
        }

        fn recv(
            &self,
            pid: Pid,
        ) -> IpcResult<Message> {
            let _g = self.tasks.enter(pid);
            let q = self.queues.process_queue(pid).unwrap();
            self.queues.receive_message(q, MessageFlags::NON_BLOCKING)
        }
    }

    #[test]
    fn test_create_and_find() {
        let f = fixture(IpcSettings::default());
        let _g = f.tasks.enter(1);

        let id = f.channels.create_channel("log", true, false).unwrap();
        assert_eq!(f.channels.find_channel("log"), Some(id));
        assert_eq!(f.channels.find_channel("nope"), None);
        assert_eq!(
            f.channels.create_channel("log", false, false),
            Err(IpcError::ChannelExists)
        );
        assert_eq!(
            f.channels.create_channel("", false, false),
            Err(IpcError::InvalidMsg)
        );
        assert_eq!(
            f.channels.create_channel(&"x".repeat(64), false, false),
            Err(IpcError::InvalidMsg)
        );
    }

    #[test]
    fn test_channel_table_full() {
        let f = fixture(IpcSettings {
            max_channels: 1,
            ..Default::default()
        });
        let _g = f.tasks.enter(1);
        f.channels.create_channel("a", false, false).unwrap();
        assert_eq!(
            f.channels.create_channel("b", false, false),
            Err(IpcError::NoMemory)
        );
    }

    /// Тест проверяет коды ошибок подписки.
    #[test]
    fn test_subscription_errors() {
        let f = fixture(IpcSettings {
            max_subscribers: 2,
            ..Default::default()
        });
        let id = {
            let _g = f.tasks.enter(1);
            f.channels.create_channel("events", false, false).unwrap()
        };

        assert_eq!(f.channels.subscribe_channel(id, 2), Ok(0));
        assert_eq!(f.channels.subscribe_channel(id, 2), Ok(0));
        assert_eq!(f.channels.subscribe_channel(id, 3), Ok(0));
        assert_eq!(
            f.channels.subscribe_channel(id, 4),
            Err(IpcError::NoMemory)
        );
        assert_eq!(
            f.channels.subscribe_channel(id, 999),
            Err(IpcError::InvalidPid)
        );
        assert_eq!(
            f.channels.subscribe_channel(id + 1, 2),
            Err(IpcError::ChannelNotFound)
        );
        assert_eq!(
            f.channels.unsubscribe_channel(id, 4),
            Err(IpcError::NotSubscribed)
        );
        assert_eq!(f.channels.unsubscribe_channel(id, 2), Ok(()));
        assert_eq!(f.channels.channel_info(id).unwrap().subscribers, 1);
    }

    /// Тест проверяет рассылку независимых копий всем подписчикам.
    #[test]
    fn test_fan_out_to_subscribers() {
        let f = fixture(IpcSettings::default());
        f.queue_for(2, 4);
        f.queue_for(3, 4);
        let id = {
            let _g = f.tasks.enter(1);
            f.channels.create_channel("news", false, false).unwrap()
        };
        f.channels.subscribe_channel(id, 2).unwrap();
        f.channels.subscribe_channel(id, 3).unwrap();
        f.channels.subscribe_channel(id, 4).unwrap();

        let report = {
            let _g = f.tasks.enter(1);
            f.channels
                .send_to_channel(id, Message::new("hello"), MessageFlags::empty())
                .unwrap()
        };
        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, 1);

        let a = f.recv(2).unwrap();
        let b = f.recv(3).unwrap();
        assert_ne!(a.msg_id, b.msg_id);
        assert_eq!(a.payload, "hello");
        assert_eq!(a.payload.as_ptr(), b.payload.as_ptr());
        assert_eq!(a.channel_id, id);
        assert_eq!(a.sender_pid, 1);
        assert!(a.flags.contains(MessageFlags::MULTICAST));
    }

    #[test]
    fn test_non_persistent_without_subscribers_drops() {
        let f = fixture(IpcSettings::default());
        let _g = f.tasks.enter(1);
        let id = f.channels.create_channel("tmp", false, false).unwrap();

        let report = f
            .channels
            .send_to_channel(id, Message::new("lost"), MessageFlags::empty())
            .unwrap();
        assert_eq!(report.dropped, 1);
        assert!(!report.buffered);
        assert_eq!(f.channels.channel_info(id).unwrap().total_dropped, 1);
        assert_eq!(f.queues.stats().messages_dropped(), 1);
    }

    /// Тест проверяет буфер постоянного канала: порядок сохраняется,
    /// переполнение даёт `QueueFull`.
    #[test]
    fn test_persistent_buffer_flushes_in_order() {
        let f = fixture(IpcSettings {
            persistent_buffer_depth: 2,
            ..Default::default()
        });
        f.queue_for(7, 8);
        let id = {
            let _g = f.tasks.enter(1);
            let id = f.channels.create_channel("log", true, true).unwrap();
            for body in ["one", "two"] {
                let r = f
                    .channels
                    .send_to_channel(id, Message::new(body), MessageFlags::empty())
                    .unwrap();
                assert!(r.buffered);
            }
            assert_eq!(
                f.channels
                    .send_to_channel(id, Message::new("three"), MessageFlags::empty()),
                Err(IpcError::QueueFull)
            );
            id
        };

        assert_eq!(f.channels.subscribe_channel(id, 7), Ok(2));
        assert_eq!(f.channels.channel_info(id).unwrap().buffered, 0);

        let first = f.recv(7).unwrap();
        assert_eq!(first.payload, "one");
        assert!(first.flags.contains(MessageFlags::BROADCAST));
        assert_eq!(f.recv(7).unwrap().payload, "two");
    }

    /// Тест проверяет, что недоставленные сообщения остаются в буфере и
    /// не дублируются при повторной попытке.
    #[test]
    fn test_undeliverable_buffer_stays() {
        let f = fixture(IpcSettings::default());
        f.queue_for(5, 1);
        let id = {
            let _g = f.tasks.enter(1);
            let id = f.channels.create_channel("slow", false, true).unwrap();
            for body in ["a", "b"] {
                f.channels
                    .send_to_channel(id, Message::new(body), MessageFlags::empty())
                    .unwrap();
            }
            id
        };

        assert_eq!(f.channels.subscribe_channel(id, 5), Ok(1));
        assert_eq!(f.channels.channel_info(id).unwrap().buffered, 1);
        assert_eq!(f.recv(5).unwrap().payload, "a");

        f.channels.unsubscribe_channel(id, 5).unwrap();
        assert_eq!(f.channels.subscribe_channel(id, 5), Ok(1));
        assert_eq!(f.recv(5).unwrap().payload, "b");
        assert_eq!(f.recv(5), Err(IpcError::QueueEmpty));
    }

    /// Тест проверяет, что медленный подписчик не нарушает порядок для
    /// остальных: новое сообщение не обгоняет старые записи буфера.
    #[test]
    fn test_slow_subscriber_keeps_order_for_others() {
        let f = fixture(IpcSettings::default());
        let (slow, fast) = (5, 6);
        f.queue_for(slow, 1);
        f.queue_for(fast, 8);
        let id = {
            let _g = f.tasks.enter(1);
            f.channels.create_channel("ordered", false, true).unwrap()
        };
        let publish = |body: &'static str| {
            let _g = f.tasks.enter(1);
            f.channels
                .send_to_channel(id, Message::new(body), MessageFlags::empty())
                .unwrap()
        };

        for body in ["e1", "e2", "e3"] {
            assert!(publish(body).buffered);
        }

        assert_eq!(f.channels.subscribe_channel(id, slow), Ok(1));
        assert_eq!(f.channels.subscribe_channel(id, fast), Ok(2));

        let report = publish("c");
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 0);
        assert!(report.buffered);

        assert_eq!(f.recv(slow).unwrap().payload, "e1");
        publish("d");

        let mut fast_order = Vec::new();
        while let Ok(msg) = f.recv(fast) {
            fast_order.push(msg.payload);
        }
        assert_eq!(fast_order, vec!["e2", "e3", "c", "d"]);

        assert_eq!(f.recv(slow).unwrap().payload, "e2");
        assert_eq!(f.channels.channel_info(id).unwrap().buffered, 3);

        let mut slow_order = Vec::new();
        for _ in 0..3 {
            publish("tick");
            slow_order.push(f.recv(slow).unwrap().payload);
        }
        assert_eq!(slow_order, vec!["e3", "c", "d"]);
    }

    #[test]
    fn test_size_override() {
        let f = fixture(IpcSettings::default());
        let _g = f.tasks.enter(1);
        let id = f
            .channels
            .create_channel_with(
                "small",
                ChannelOptions {
                    max_message_size: Some(4),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            f.channels
                .send_to_channel(id, Message::new("12345"), MessageFlags::empty()),
            Err(IpcError::InvalidSize)
        );
        assert_eq!(
            f.channels.create_channel_with(
                "huge",
                ChannelOptions {
                    max_message_size: Some(4097),
                    ..Default::default()
                }
            ),
            Err(IpcError::InvalidSize)
        );
    }

    /// Тест проверяет, что уничтожить канал может только создатель, а имя
    /// освобождается.
    #[test]
    fn test_destroy_channel() {
        let f = fixture(IpcSettings::default());
        let id = {
            let _g = f.tasks.enter(1);
            f.channels.create_channel("gone", false, true).unwrap()
        };
        f.channels.subscribe_channel(id, 2).unwrap();

        {
            let _g = f.tasks.enter(2);
            assert_eq!(f.channels.destroy_channel(id), Err(IpcError::Permission));
        }
        let _g = f.tasks.enter(1);
        f.channels.destroy_channel(id).unwrap();
        assert_eq!(f.channels.find_channel("gone"), None);
        assert_eq!(
            f.channels
                .send_to_channel(id, Message::new("x"), MessageFlags::empty()),
            Err(IpcError::ChannelNotFound)
        );
        assert!(f.channels.subscriptions_of(2).is_empty());
        assert!(f.channels.create_channel("gone", false, false).is_ok());
    }

    #[test]
    fn test_list_and_subscriptions() {
        let f = fixture(IpcSettings::default());
        let (a, b) = {
            let _g = f.tasks.enter(1);
            (
                f.channels.create_channel("a", false, false).unwrap(),
                f.channels.create_channel("b", true, true).unwrap(),
            )
        };
        f.channels.subscribe_channel(b, 3).unwrap();

        let names: Vec<String> = f.channels.list_channels().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(f.channels.subscriptions_of(3), vec![b]);
        assert_ne!(a, b);
        assert!(f.channels.memory_usage() > 0);
    }
}
