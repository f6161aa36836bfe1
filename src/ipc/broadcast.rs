use std::sync::Arc;

use kipc_error::{IpcError, IpcResult};
use serde::Serialize;
use tracing::debug;

use super::{
    channel::{ChannelDelivery, ChannelManager},
    message::{validate_message, ChannelId, Message, MessageFlags, Pid},
    queue::Wait,
    queue_manager::QueueManager,
};

/// Итог рассылки по списку PID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Цели, которым доставить не удалось, с причиной.
    pub failures: Vec<(Pid, i32)>,
}

/// Рассылка копий по списку задач и по подписчикам канала.
pub struct Dispatcher {
    queues: Arc<QueueManager>,
    channels: Arc<ChannelManager>,
}

impl Dispatcher {
    pub fn new(
        queues: Arc<QueueManager>,
        channels: Arc<ChannelManager>,
    ) -> Self {
        Self { queues, channels }
    }

    /// Неблокирующая доставка независимой копии каждой цели.
    ///
    /// Успех, если доставлена хотя бы одна копия; иначе первая ошибка по
    /// целям (`InvalidPid` для пустого списка).
    pub fn broadcast(
        &self,
        mut msg: Message,
        targets: &[Pid],
    ) -> IpcResult<BroadcastReport> {
        let sender = self.queues.current_pid()?;
        let settings = self.queues.settings();
        if targets.len() > settings.max_broadcast_targets {
            return Err(IpcError::InvalidSize);
        }
        validate_message(&msg, settings.max_message_size)?;

        msg.flags |= MessageFlags::BROADCAST;
        self.queues.ids().stamp(&mut msg, sender);

        let mut report = BroadcastReport::default();
        let mut first_error = None;
        for &pid in targets {
            match self
                .queues
                .deliver(pid, msg.fanout_copy(pid), Wait::NonBlocking)
            {
                Ok(_) => report.delivered += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                    report.failures.push((pid, e.code()));
                }
            }
        }

        self.queues
            .stats()
            .record_broadcast_deliveries(report.delivered as u64);
        debug!(
            sender,
            targets = targets.len(),
            delivered = report.delivered,
            failed = report.failures.len(),
            "Broadcast finished"
        );

        if report.delivered == 0 {
            return Err(first_error.unwrap_or(IpcError::InvalidPid));
        }
        Ok(report)
    }

    /// Рассылка подписчикам канала: то же, что публикация в канал. Пометку
    /// `BROADCAST` или `MULTICAST` выбирает канал.
    pub fn multicast_channel(
        &self,
        channel: ChannelId,
        msg: Message,
    ) -> IpcResult<ChannelDelivery> {
        let report =
            self.channels
                .send_to_channel(channel, msg, MessageFlags::NON_BLOCKING)?;
        self.queues
            .stats()
            .record_broadcast_deliveries(report.delivered as u64);
        Ok(report)
    }
}
