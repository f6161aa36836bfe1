use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use super::message::{ChannelId, Pid, QueueId};

/// Системные счётчики подсистемы IPC.
///
/// Обновляются без блокировок; снимок не атомарен относительно всех полей
/// сразу, но каждое поле согласовано.
#[derive(Debug, Default)]
pub struct IpcStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    queues_created: AtomicU64,
    channels_created: AtomicU64,
    active_queues: AtomicUsize,
    active_channels: AtomicUsize,
    requests: AtomicU64,
    replies: AtomicU64,
    timeouts: AtomicU64,
    broadcast_deliveries: AtomicU64,
}

/// Снимок счётчиков вместе с оценкой занятой памяти.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IpcStatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub queues_created: u64,
    pub channels_created: u64,
    pub active_queues: usize,
    pub active_channels: usize,
    pub requests: u64,
    pub replies: u64,
    pub timeouts: u64,
    pub broadcast_deliveries: u64,
    pub memory_used: usize,
}

/// Сведения о задаче с точки зрения IPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub owned_queues: Vec<QueueId>,
    pub process_queue: Option<QueueId>,
    pub subscriptions: Vec<ChannelId>,
    /// Сообщений, ожидающих в очереди процесса.
    pub pending_messages: usize,
}

impl IpcStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(
        &self,
        count: u64,
    ) {
        self.messages_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_queue_created(&self) {
        self.queues_created.fetch_add(1, Ordering::Relaxed);
        self.active_queues.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_destroyed(&self) {
        self.active_queues.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_channel_created(&self) {
        self.channels_created.fetch_add(1, Ordering::Relaxed);
        self.active_channels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_channel_destroyed(&self) {
        self.active_channels.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply(&self) {
        self.replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast_deliveries(
        &self,
        count: u64,
    ) {
        self.broadcast_deliveries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Снимок счётчиков; оценку памяти считает вызывающий.
    pub fn snapshot(
        &self,
        memory_used: usize,
    ) -> IpcStatsSnapshot {
        IpcStatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            queues_created: self.queues_created.load(Ordering::Relaxed),
            channels_created: self.channels_created.load(Ordering::Relaxed),
            active_queues: self.active_queues.load(Ordering::Relaxed),
            active_channels: self.active_channels.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            broadcast_deliveries: self.broadcast_deliveries.load(Ordering::Relaxed),
            memory_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = IpcStats::new();
        stats.record_sent();
        stats.record_sent();
        stats.record_received();
        stats.record_dropped(3);
        stats.record_queue_created();
        stats.record_queue_created();
        stats.record_queue_destroyed();
        stats.record_broadcast_deliveries(5);

        let snap = stats.snapshot(1024);
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.messages_dropped, 3);
        assert_eq!(snap.queues_created, 2);
        assert_eq!(snap.active_queues, 1);
        assert_eq!(snap.broadcast_deliveries, 5);
        assert_eq!(snap.memory_used, 1024);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snap = IpcStats::new().snapshot(0);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["timeouts"], 0);
    }
}
