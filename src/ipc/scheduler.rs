use std::cell::Cell;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kipc_error::{IpcError, IpcResult};
use tracing::debug;

use super::message::Pid;

/// Сведения о задаче, которые подсистеме IPC нужны от планировщика.
///
/// Приостановка и пробуждение выполняются очередями ожидания внутри самих
/// очередей сообщений, поэтому здесь только идентификация.
pub trait Scheduler: Send + Sync {
    /// PID задачи, выполняющей вызов, если вызов идёт из контекста задачи.
    fn current_task_id(&self) -> Option<Pid>;

    fn is_valid_pid(
        &self,
        pid: Pid,
    ) -> bool;
}

thread_local! {
    static CURRENT_TASK: Cell<Option<Pid>> = const { Cell::new(None) };
}

/// Таблица задач для размещённого (hosted) режима: задача — это поток ОС,
/// привязанный к PID через [`TaskTable::enter`].
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: DashMap<Pid, TaskInfo>,
}

#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub name: String,
    pub registered_at: DateTime<Utc>,
}

/// Привязка текущего потока к PID. При удалении восстанавливает прежнюю
/// привязку.
#[derive(Debug)]
#[must_use = "the thread is unbound from the task when the guard is dropped"]
pub struct TaskGuard {
    previous: Option<Pid>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        pid: Pid,
        name: impl Into<String>,
    ) -> IpcResult<()> {
        if pid == 0 {
            return Err(IpcError::InvalidPid);
        }
        let name = name.into();
        debug!(pid, name = %name, "task registered");
        self.tasks.insert(
            pid,
            TaskInfo {
                name,
                registered_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn unregister(
        &self,
        pid: Pid,
    ) -> Option<TaskInfo> {
        self.tasks.remove(&pid).map(|(_, info)| info)
    }

    pub fn info(
        &self,
        pid: Pid,
    ) -> Option<TaskInfo> {
        self.tasks.get(&pid).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Выполняет текущий поток от имени задачи `pid`.
    pub fn enter(
        &self,
        pid: Pid,
    ) -> TaskGuard {
        let previous = CURRENT_TASK.with(|current| current.replace(Some(pid)));
        TaskGuard { previous }
    }
}

impl Scheduler for TaskTable {
    fn current_task_id(&self) -> Option<Pid> {
        CURRENT_TASK
            .with(Cell::get)
            .filter(|pid| self.tasks.contains_key(pid))
    }

    fn is_valid_pid(
        &self,
        pid: Pid,
    ) -> bool {
        pid != 0 && self.tasks.contains_key(&pid)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        CURRENT_TASK.with(|current| current.set(self.previous));
    }
}
