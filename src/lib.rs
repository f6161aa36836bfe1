/// IPC limits and their loading (defaults, TOML file, `KIPC_` environment).
pub mod config;
/// Message-passing core: queues, channels, request/reply, broadcast, syscalls.
pub mod ipc;
/// Logging setup (filters, formats, file sink).
pub mod logging;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings.
pub use config::IpcSettings;
/// The registry and the types that flow through it.
pub use ipc::{
    AddressSpace, BroadcastReport, ChannelDelivery, ChannelId, ChannelInfo, ChannelOptions, Ipc,
    IpcStatsSnapshot, Message, MessageFlags, MessageType, MsgId, Operation, OverflowPolicy,
    Permissions, Pid, Priority, ProcessInfo, QueueId, QueueOptions, QueueStats, RawSyscall,
    ReplyOutcome, Scheduler, SyscallNumber, TaskGuard, TaskTable,
};
/// Error taxonomy and result aliases.
pub use kipc_error::{IpcError, IpcResult, KipcResult, StackError, StatusCode};
/// Logging API.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
