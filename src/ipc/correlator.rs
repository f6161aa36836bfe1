use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use kipc_error::{IpcError, IpcResult};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::{
    message::{validate_message, validate_pid, Message, MessageFlags, MessageType, MsgId, Pid},
    queue::Wait,
    queue_manager::QueueManager,
};

/// Что стало с ответом после `send_reply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Передан напрямую ожидающему `send_request`.
    Matched,
    /// Ожидающего нет: доставлен как обычное сообщение в очередь процесса.
    Delivered(MsgId),
    /// Запрос недавно истёк по таймауту; ответ отброшен.
    Discarded,
}

/// Сопоставление запросов и ответов.
///
/// Слот ожидания регистрируется до постановки запроса в очередь и
/// удаляется ровно один раз: либо ожидающим (успех или таймаут), либо никем
/// другим. Ответ и таймаут соревнуются за блокировку таблицы, кто первым
/// её взял, тот и определил исход.
pub struct Correlator {
    queues: Arc<QueueManager>,
    pending: Mutex<CorrelationTable>,
}

#[derive(Debug, Default)]
struct CorrelationTable {
    slots: HashMap<MsgId, PendingSlot>,
    /// Недавно истёкшие запросы, в порядке истечения.
    expired: VecDeque<MsgId>,
    expired_index: HashSet<MsgId>,
}

#[derive(Debug)]
struct PendingSlot {
    waiter: Pid,
    reply: Option<Message>,
    signal: Arc<Condvar>,
}

impl Correlator {
    pub fn new(queues: Arc<QueueManager>) -> Self {
        Self {
            queues,
            pending: Mutex::new(CorrelationTable::default()),
        }
    }

    /// Синхронный запрос: ставит `REQUEST` в очередь процесса `target` и
    /// ждёт ответа не дольше `timeout`.
    pub fn send_request(
        &self,
        target: Pid,
        mut request: Message,
        timeout: Duration,
    ) -> IpcResult<Message> {
        let caller = self.queues.current_pid()?;
        validate_pid(target)?;
        if !self.queues.is_valid_pid(target) {
            return Err(IpcError::InvalidPid);
        }
        request.kind = MessageType::Request;
        validate_message(&request, self.queues.settings().max_message_size)?;

        request.receiver_pid = target;
        let request_id = self.queues.ids().stamp(&mut request, caller);
        let signal = Arc::new(Condvar::new());
        self.pending.lock().slots.insert(
            request_id,
            PendingSlot {
                waiter: caller,
                reply: None,
                signal: Arc::clone(&signal),
            },
        );

        if let Err(e) = self.queues.deliver(target, request, Wait::NonBlocking) {
            self.pending.lock().slots.remove(&request_id);
            return Err(e);
        }
        self.queues.stats().record_request();
        debug!(request_id, caller, target, ?timeout, "Request sent, waiting for reply");

        let deadline = Instant::now().checked_add(timeout);
        let mut table = self.pending.lock();
        loop {
            let answered = table
                .slots
                .get(&request_id)
                .is_some_and(|slot| slot.reply.is_some());
            if answered {
                break;
            }
            match deadline {
                Some(deadline) => {
                    if signal.wait_until(&mut table, deadline).timed_out() {
                        break;
                    }
                }
                None => signal.wait(&mut table),
            }
        }

        let reply = table
            .slots
            .remove(&request_id)
            .and_then(|slot| slot.reply);
        match reply {
            Some(reply) => Ok(reply),
            None => {
                table.remember_expired(request_id, self.queues.settings().expired_reply_memory);
                drop(table);
                self.queues.stats().record_timeout();
                warn!(request_id, caller, target, ?timeout, "Request timed out");
                Err(IpcError::Timeout)
            }
        }
    }

    /// Ответ на запрос `reply.reply_to`, адресованный задаче `target`.
    ///
    /// Ответ без ожидающего не является ошибкой.
    pub fn send_reply(
        &self,
        target: Pid,
        mut reply: Message,
    ) -> IpcResult<ReplyOutcome> {
        let caller = self.queues.current_pid()?;
        if reply.reply_to == 0 {
            return Err(IpcError::InvalidMsg);
        }
        validate_pid(target)?;
        if !self.queues.is_valid_pid(target) {
            return Err(IpcError::InvalidPid);
        }
        reply.kind = MessageType::Reply;
        validate_message(&reply, self.queues.settings().max_message_size)?;

        reply.receiver_pid = target;
        let request_id = reply.reply_to;
        self.queues.ids().stamp(&mut reply, caller);
        self.queues.stats().record_reply();

        {
            let mut table = self.pending.lock();
            if let Some(slot) = table.slots.get_mut(&request_id) {
                if slot.waiter == target && slot.reply.is_none() {
                    slot.reply = Some(reply);
                    slot.signal.notify_one();
                    drop(table);
                    self.queues.record_direct_delivery();
                    debug!(request_id, caller, target, "Reply matched a waiting request");
                    return Ok(ReplyOutcome::Matched);
                }
            }
            if table.expired_index.contains(&request_id) {
                drop(table);
                self.queues.stats().record_dropped(1);
                debug!(request_id, caller, target, "Late reply to expired request discarded");
                return Ok(ReplyOutcome::Discarded);
            }
        }

        let msg_id = self.queues.deliver(target, reply, Wait::NonBlocking)?;
        Ok(ReplyOutcome::Delivered(msg_id))
    }

    /// Асинхронное уведомление без ожидания ответа.
    pub fn send_async(
        &self,
        target: Pid,
        mut msg: Message,
    ) -> IpcResult<MsgId> {
        let caller = self.queues.current_pid()?;
        validate_pid(target)?;
        if !self.queues.is_valid_pid(target) {
            return Err(IpcError::InvalidPid);
        }
        msg.kind = MessageType::Notification;
        msg.flags |= MessageFlags::NON_BLOCKING;
        validate_message(&msg, self.queues.settings().max_message_size)?;

        self.queues.ids().stamp(&mut msg, caller);
        self.queues.deliver(target, msg, Wait::NonBlocking)
    }

    /// Приём из очереди процесса вызывающей задачи с таймаутом.
    pub fn receive_async(
        &self,
        timeout: Duration,
    ) -> IpcResult<Message> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.queues.receive_own_until(deadline),
            None => {
                let caller = self.queues.current_pid()?;
                let id = self
                    .queues
                    .process_queue(caller)
                    .ok_or(IpcError::InvalidQueue)?;
                self.queues.receive_with(id, Wait::Blocking)
            }
        }
    }

    /// Число запросов, ожидающих ответа.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().slots.len()
    }
}

impl CorrelationTable {
    fn remember_expired(
        &mut self,
        request_id: MsgId,
        capacity: usize,
    ) {
        if capacity == 0 || !self.expired_index.insert(request_id) {
            return;
        }
        self.expired.push_back(request_id);
        while self.expired.len() > capacity {
            if let Some(oldest) = self.expired.pop_front() {
                self.expired_index.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{
        config::IpcSettings,
        ipc::{message::Permissions, scheduler::TaskTable, stats::IpcStats},
    };

    fn setup() -> (Arc<TaskTable>, Arc<QueueManager>, Arc<Correlator>) {
        let tasks = Arc::new(TaskTable::new());
        for pid in [1, 2, 3] {
            tasks.register(pid, "t").unwrap();
        }
        let queues = Arc::new(QueueManager::new(
            Arc::new(IpcSettings::default()),
            tasks.clone(),
            Arc::new(IpcStats::new()),
        ));
        for pid in [1, 2] {
            let _g = tasks.enter(pid);
            queues.create_queue(8, Permissions::empty()).unwrap();
        }
        let correlator = Arc::new(Correlator::new(queues.clone()));
        (tasks, queues, correlator)
    }

    fn take(
        tasks: &TaskTable,
        queues: &QueueManager,
        pid: Pid,
    ) -> IpcResult<Message> {
        let _g = tasks.enter(pid);
        let q = queues.process_queue(pid).ok_or(IpcError::InvalidQueue)?;
        queues.receive_message(q, MessageFlags::NON_BLOCKING)
    }

    /// Тест проверяет, что без ответа запрос завершается таймаутом, слот
    /// удаляется, а сам запрос остаётся в очереди получателя.
    #[test]
    fn test_request_times_out() {
        let (tasks, queues, corr) = setup();
        let started = Instant::now();
        let result = {
            let _g = tasks.enter(1);
            corr.send_request(2, Message::new("ping"), Duration::from_millis(50))
        };
        assert_eq!(result, Err(IpcError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(corr.pending_requests(), 0);

        let req = take(&tasks, &queues, 2).unwrap();
        assert_eq!(req.kind, MessageType::Request);
        assert_eq!(req.payload, "ping");
    }

    /// Тест проверяет полный цикл запрос/ответ между двумя потоками.
    #[test]
    fn test_request_reply_round_trip() {
        let (tasks, queues, corr) = setup();

        let server = {
            let (tasks, queues, corr) = (tasks.clone(), queues.clone(), corr.clone());
            thread::spawn(move || {
                let _g = tasks.enter(2);
                let q = queues.process_queue(2).unwrap();
                let req = queues.receive_message(q, MessageFlags::BLOCKING).unwrap();
                let reply = Message::new(b"pong".to_vec()).in_reply_to(req.msg_id);
                corr.send_reply(req.sender_pid, reply).unwrap()
            })
        };

        let reply = {
            let _g = tasks.enter(1);
            corr.send_request(2, Message::new("ping"), Duration::from_secs(5))
                .unwrap()
        };
        assert_eq!(server.join().unwrap(), ReplyOutcome::Matched);
        assert_eq!(reply.payload, "pong");
        assert_eq!(reply.kind, MessageType::Reply);
        assert_eq!(reply.sender_pid, 2);
        assert_eq!(corr.pending_requests(), 0);
        assert_eq!(take(&tasks, &queues, 1), Err(IpcError::QueueEmpty));
    }

    /// Тест проверяет, что поздний ответ на истёкший запрос отбрасывается.
    #[test]
    fn test_late_reply_is_discarded() {
        let (tasks, queues, corr) = setup();
        {
            let _g = tasks.enter(1);
            assert_eq!(
                corr.send_request(2, Message::new("q"), Duration::from_millis(10)),
                Err(IpcError::Timeout)
            );
        }
        let req = take(&tasks, &queues, 2).unwrap();

        let _g = tasks.enter(2);
        let outcome = corr
            .send_reply(1, Message::new("late").in_reply_to(req.msg_id))
            .unwrap();
        assert_eq!(outcome, ReplyOutcome::Discarded);
        assert_eq!(take(&tasks, &queues, 1), Err(IpcError::QueueEmpty));
    }

    #[test]
    fn test_unmatched_reply_is_delivered() {
        let (tasks, queues, corr) = setup();
        {
            let _g = tasks.enter(2);
            let outcome = corr
                .send_reply(1, Message::new("unsolicited").in_reply_to(12345))
                .unwrap();
            assert!(matches!(outcome, ReplyOutcome::Delivered(_)));
        }
        let got = take(&tasks, &queues, 1).unwrap();
        assert_eq!(got.kind, MessageType::Reply);
        assert_eq!(got.reply_to, 12345);
    }

    #[test]
    fn test_reply_validation() {
        let (tasks, _queues, corr) = setup();
        let _g = tasks.enter(2);
        assert_eq!(
            corr.send_reply(1, Message::new("x")),
            Err(IpcError::InvalidMsg)
        );
        assert_eq!(
            corr.send_reply(77, Message::new("x").in_reply_to(1)),
            Err(IpcError::InvalidPid)
        );
        assert_eq!(
            corr.send_reply(0, Message::new("x").in_reply_to(1)),
            Err(IpcError::InvalidPid)
        );
        assert_eq!(corr.send_async(0, Message::new("x")), Err(IpcError::InvalidPid));
    }

    /// Тест проверяет, что неудачная постановка запроса не оставляет слот.
    #[test]
    fn test_request_to_task_without_queue() {
        let (tasks, _queues, corr) = setup();
        let _g = tasks.enter(1);
        assert_eq!(
            corr.send_request(3, Message::new("x"), Duration::from_secs(1)),
            Err(IpcError::InvalidQueue)
        );
        assert_eq!(
            corr.send_request(0, Message::new("x"), Duration::from_secs(1)),
            Err(IpcError::InvalidPid)
        );
        assert_eq!(corr.pending_requests(), 0);
    }

    #[test]
    fn test_async_send_and_receive() {
        let (tasks, _queues, corr) = setup();
        let id = {
            let _g = tasks.enter(1);
            corr.send_async(2, Message::new("note")).unwrap()
        };

        let _g = tasks.enter(2);
        let got = corr.receive_async(Duration::from_millis(100)).unwrap();
        assert_eq!(got.msg_id, id);
        assert_eq!(got.kind, MessageType::Notification);
        assert_eq!(
            corr.receive_async(Duration::from_millis(10)),
            Err(IpcError::Timeout)
        );
    }

    #[test]
    fn test_expired_memory_is_bounded() {
        let mut table = CorrelationTable::default();
        for id in 1..=5 {
            table.remember_expired(id, 3);
        }
        assert_eq!(table.expired.len(), 3);
        assert!(!table.expired_index.contains(&1));
        assert!(table.expired_index.contains(&5));
    }
}
