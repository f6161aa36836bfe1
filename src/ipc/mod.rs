pub mod broadcast;
pub mod channel;
pub mod correlator;
pub mod handle;
pub mod message;
pub mod queue;
pub mod queue_manager;
pub mod scheduler;
pub mod stats;
pub mod syscall;

use std::{mem, sync::Arc, time::Duration};

pub use broadcast::{BroadcastReport, Dispatcher};
pub use channel::{ChannelDelivery, ChannelInfo, ChannelManager, ChannelOptions};
pub use correlator::{Correlator, ReplyOutcome};
pub use message::{
    ChannelId, Message, MessageFlags, MessageType, MsgId, Permissions, Pid, Priority, QueueId,
};
pub use queue::{OverflowPolicy, QueueOptions, QueueStats, Wait};
pub use queue_manager::QueueManager;
pub use scheduler::{Scheduler, TaskGuard, TaskTable};
pub use stats::{IpcStats, IpcStatsSnapshot, ProcessInfo};
pub use syscall::{AddressSpace, Operation, RawSyscall, SyscallNumber};

use kipc_error::IpcResult;

use crate::config::IpcSettings;

/// Единый реестр подсистемы IPC.
///
/// Владеет менеджерами очередей и каналов, коррелятором запросов и
/// диспетчером рассылки. Все операции идут через этот объект; очереди и
/// каналы адресуются непрозрачными дескрипторами.
pub struct Ipc {
    settings: Arc<IpcSettings>,
    stats: Arc<IpcStats>,
    queues: Arc<QueueManager>,
    channels: Arc<ChannelManager>,
    correlator: Correlator,
    dispatcher: Dispatcher,
}

impl Ipc {
    pub fn new(
        settings: IpcSettings,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let settings = Arc::new(settings);
        let stats = Arc::new(IpcStats::new());
        let queues = Arc::new(QueueManager::new(
            Arc::clone(&settings),
            scheduler,
            Arc::clone(&stats),
        ));
        let channels = Arc::new(ChannelManager::new(Arc::clone(&queues)));
        let correlator = Correlator::new(Arc::clone(&queues));
        let dispatcher = Dispatcher::new(Arc::clone(&queues), Arc::clone(&channels));

        tracing::info!(
            max_queues = settings.max_queues,
            max_channels = settings.max_channels,
            max_message_size = settings.max_message_size,
            "IPC subsystem initialized"
        );

        Self {
            settings,
            stats,
            queues,
            channels,
            correlator,
            dispatcher,
        }
    }

    pub fn settings(&self) -> &IpcSettings {
        &self.settings
    }

    pub fn current_pid(&self) -> IpcResult<Pid> {
        self.queues.current_pid()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Очереди
    ////////////////////////////////////////////////////////////////////////////

    pub fn create_queue(
        &self,
        max_messages: usize,
        permissions: Permissions,
    ) -> IpcResult<QueueId> {
        self.queues.create_queue(max_messages, permissions)
    }

    pub fn create_queue_with(
        &self,
        options: QueueOptions,
    ) -> IpcResult<QueueId> {
        self.queues.create_queue_with(options)
    }

    pub fn destroy_queue(
        &self,
        queue: QueueId,
    ) -> IpcResult<()> {
        self.queues.destroy_queue(queue)
    }

    pub fn send_message(
        &self,
        queue: QueueId,
        msg: Message,
        flags: MessageFlags,
    ) -> IpcResult<MsgId> {
        self.queues.send_message(queue, msg, flags)
    }

    pub fn receive_message(
        &self,
        queue: QueueId,
        flags: MessageFlags,
    ) -> IpcResult<Message> {
        self.queues.receive_message(queue, flags)
    }

    pub fn peek_message(
        &self,
        queue: QueueId,
    ) -> IpcResult<Message> {
        self.queues.peek_message(queue)
    }

    pub fn flush_queue(
        &self,
        queue: QueueId,
    ) -> IpcResult<usize> {
        self.queues.flush_queue(queue)
    }

    pub fn queue_count(
        &self,
        queue: QueueId,
    ) -> IpcResult<usize> {
        self.queues.queue_count(queue)
    }

    pub fn queue_stats(
        &self,
        queue: QueueId,
    ) -> IpcResult<QueueStats> {
        self.queues.queue_stats(queue)
    }

    pub fn process_queue(
        &self,
        pid: Pid,
    ) -> Option<QueueId> {
        self.queues.process_queue(pid)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Каналы
    ////////////////////////////////////////////////////////////////////////////

    pub fn create_channel(
        &self,
        name: &str,
        is_broadcast: bool,
        is_persistent: bool,
    ) -> IpcResult<ChannelId> {
        self.channels
            .create_channel(name, is_broadcast, is_persistent)
    }

    pub fn create_channel_with(
        &self,
        name: &str,
        options: ChannelOptions,
    ) -> IpcResult<ChannelId> {
        self.channels.create_channel_with(name, options)
    }

    pub fn destroy_channel(
        &self,
        channel: ChannelId,
    ) -> IpcResult<()> {
        self.channels.destroy_channel(channel)
    }

    pub fn subscribe_channel(
        &self,
        channel: ChannelId,
        pid: Pid,
    ) -> IpcResult<usize> {
        self.channels.subscribe_channel(channel, pid)
    }

    pub fn unsubscribe_channel(
        &self,
        channel: ChannelId,
        pid: Pid,
    ) -> IpcResult<()> {
        self.channels.unsubscribe_channel(channel, pid)
    }

    pub fn send_to_channel(
        &self,
        channel: ChannelId,
        msg: Message,
        flags: MessageFlags,
    ) -> IpcResult<ChannelDelivery> {
        self.channels.send_to_channel(channel, msg, flags)
    }

    pub fn find_channel(
        &self,
        name: &str,
    ) -> Option<ChannelId> {
        self.channels.find_channel(name)
    }

    pub fn channel_info(
        &self,
        channel: ChannelId,
    ) -> IpcResult<ChannelInfo> {
        self.channels.channel_info(channel)
    }

    pub fn list_channels(&self) -> Vec<ChannelInfo> {
        self.channels.list_channels()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Запрос/ответ
    ////////////////////////////////////////////////////////////////////////////

    pub fn send_request(
        &self,
        target: Pid,
        request: Message,
        timeout: Duration,
    ) -> IpcResult<Message> {
        self.correlator.send_request(target, request, timeout)
    }

    pub fn send_reply(
        &self,
        target: Pid,
        reply: Message,
    ) -> IpcResult<ReplyOutcome> {
        self.correlator.send_reply(target, reply)
    }

    pub fn send_async(
        &self,
        target: Pid,
        msg: Message,
    ) -> IpcResult<MsgId> {
        self.correlator.send_async(target, msg)
    }

    pub fn receive_async(
        &self,
        timeout: Duration,
    ) -> IpcResult<Message> {
        self.correlator.receive_async(timeout)
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_requests()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Рассылка
    ////////////////////////////////////////////////////////////////////////////

    pub fn broadcast(
        &self,
        msg: Message,
        targets: &[Pid],
    ) -> IpcResult<BroadcastReport> {
        self.dispatcher.broadcast(msg, targets)
    }

    pub fn multicast_channel(
        &self,
        channel: ChannelId,
        msg: Message,
    ) -> IpcResult<ChannelDelivery> {
        self.dispatcher.multicast_channel(channel, msg)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Статистика
    ////////////////////////////////////////////////////////////////////////////

    /// Снимок системных счётчиков с оценкой занятой памяти.
    pub fn stats(&self) -> IpcStatsSnapshot {
        let memory = mem::size_of::<Self>()
            + self.queues.memory_usage()
            + self.channels.memory_usage();
        self.stats.snapshot(memory)
    }

    pub fn process_info(
        &self,
        pid: Pid,
    ) -> ProcessInfo {
        let process_queue = self.queues.process_queue(pid);
        let pending_messages = process_queue
            .and_then(|queue| self.queues.queue_count(queue).ok())
            .unwrap_or(0);

        ProcessInfo {
            pid,
            owned_queues: self.queues.owned_by(pid),
            process_queue,
            subscriptions: self.channels.subscriptions_of(pid),
            pending_messages,
        }
    }
}
