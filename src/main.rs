//! Демонстрационный бинарник kipc
//!
//! Поднимает подсистему IPC в размещённом режиме (задачи — потоки ОС),
//! прогоняет типовые сценарии обмена сообщениями и печатает статистику.

use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, ensure, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kipc::{
    init_logging, Ipc, IpcError, IpcSettings, IpcStatsSnapshot, Message, MessageFlags,
    MessageType, Permissions, Pid, Priority, TaskTable,
};
use tracing::{debug, info};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("KIPC_GIT_COMMIT"),
    "\nbuilt:  ",
    env!("KIPC_BUILD_TIME"),
);

/// Аргументы командной строки.
#[derive(Parser)]
#[command(name = "kipc")]
#[command(version = env!("CARGO_PKG_VERSION"), long_version = LONG_VERSION)]
#[command(about = "kipc - kernel IPC subsystem running on hosted tasks", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Путь к TOML-файлу настроек
    #[arg(
        short,
        long,
        env = "KIPC_CONFIG",
        help = "TOML-файл с лимитами IPC и настройками логирования"
    )]
    config: Option<PathBuf>,
    /// Включить подробный вывод (debug)
    #[arg(short, long, help = "Включить подробный вывод для отладки")]
    verbose: bool,
    /// Подавить большинство логов (только warn/error)
    #[arg(short = 'q', long, help = "Подавить логирование (только warn/error)")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Формат вывода статистики
#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Человекочитаемый формат
    Text,
    /// JSON формат
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Прогнать демонстрационные сценарии
    Demo {
        /// Таймаут запроса без ответа (мс)
        #[arg(
            long,
            default_value = "1000",
            help = "Таймаут сценария запроса, на который никто не отвечает"
        )]
        timeout_ms: u64,
        #[arg(long, value_enum, default_value = "text", help = "Формат вывода статистики")]
        output: OutputFormat,
    },
    /// Напечатать действующие настройки
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        IpcSettings::load(cli.config.as_deref()).context("failed to load settings")?;
    if cli.verbose {
        settings.logging.level = "debug".into();
    } else if cli.quiet {
        settings.logging.level = "warn".into();
    }

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Demo { timeout_ms, output } => {
            let logging = init_logging(&settings.logging).context("failed to init logging")?;
            let snapshot = run_demo(settings, Duration::from_millis(timeout_ms))?;
            print_stats(&snapshot, output)?;
            logging.shutdown();
            Ok(())
        }
    }
}

/// Участники сценариев.
const SERVER: Pid = 1;
const CLIENT: Pid = 2;
const LOGGER: Pid = 7;

fn run_demo(
    settings: IpcSettings,
    timeout: Duration,
) -> Result<IpcStatsSnapshot> {
    let tasks = Arc::new(TaskTable::new());
    tasks.register(SERVER, "server")?;
    tasks.register(CLIENT, "client")?;
    tasks.register(LOGGER, "logger")?;
    let ipc = Ipc::new(settings, tasks.clone());

    for pid in [SERVER, CLIENT, LOGGER] {
        let _task = tasks.enter(pid);
        ipc.create_queue(0, Permissions::empty())?;
    }

    bounded_queue(&tasks, &ipc)?;
    persistent_channel(&tasks, &ipc)?;
    request_timeout(&tasks, &ipc, timeout)?;
    request_reply(&tasks, &ipc)?;

    Ok(ipc.stats())
}

/// Очередь на два сообщения: третье отклоняется, после приёма место есть.
fn bounded_queue(
    tasks: &TaskTable,
    ipc: &Ipc,
) -> Result<()> {
    let _task = tasks.enter(SERVER);
    let queue = ipc.create_queue(2, Permissions::empty())?;

    ipc.send_message(queue, Message::new("m1"), MessageFlags::NON_BLOCKING)?;
    ipc.send_message(queue, Message::new("m2"), MessageFlags::NON_BLOCKING)?;
    let third = ipc.send_message(queue, Message::new("m3"), MessageFlags::NON_BLOCKING);
    ensure!(
        third == Err(IpcError::QueueFull),
        "third send returned {third:?}"
    );

    let first = ipc.receive_message(queue, MessageFlags::NON_BLOCKING)?;
    ensure!(first.payload.as_ref() == b"m1", "FIFO order broken");
    ipc.send_message(
        queue,
        Message::new("m3").with_priority(Priority::High),
        MessageFlags::NON_BLOCKING,
    )?;
    let next = ipc.receive_message(queue, MessageFlags::NON_BLOCKING)?;
    ensure!(next.payload.as_ref() == b"m3", "priority order broken");

    ipc.destroy_queue(queue)?;
    info!("scenario 1: bounded queue ok");
    Ok(())
}

/// Постоянный канал без подписчиков копит сообщение до первой подписки.
fn persistent_channel(
    tasks: &TaskTable,
    ipc: &Ipc,
) -> Result<()> {
    let channel = {
        let _task = tasks.enter(SERVER);
        let channel = ipc.create_channel("log", true, true)?;
        let report =
            ipc.send_to_channel(channel, Message::new("boot"), MessageFlags::NON_BLOCKING)?;
        ensure!(report.buffered, "message was not buffered");
        channel
    };

    let _task = tasks.enter(LOGGER);
    let flushed = ipc.subscribe_channel(channel, LOGGER)?;
    let queue = ipc
        .process_queue(LOGGER)
        .context("logger has no process queue")?;
    let msg = ipc.receive_message(queue, MessageFlags::NON_BLOCKING)?;
    ensure!(msg.payload.as_ref() == b"boot", "buffered payload changed");
    ensure!(msg.flags.contains(MessageFlags::BROADCAST), "copy is not marked");

    info!(flushed, "scenario 2: persistent channel ok");
    Ok(())
}

/// Запрос, на который никто не отвечает, завершается таймаутом.
fn request_timeout(
    tasks: &TaskTable,
    ipc: &Ipc,
    timeout: Duration,
) -> Result<()> {
    let _task = tasks.enter(CLIENT);
    let started = Instant::now();
    match ipc.send_request(SERVER, Message::new("status?"), timeout) {
        Err(IpcError::Timeout) => {}
        other => bail!("unanswered request returned {other:?}"),
    }
    ensure!(ipc.pending_requests() == 0, "correlation slot leaked");

    // Запрос остаётся в очереди сервера и забирается отдельно.
    let server_queue = ipc
        .process_queue(SERVER)
        .context("server has no process queue")?;
    let _server = tasks.enter(SERVER);
    ipc.receive_message(server_queue, MessageFlags::NON_BLOCKING)?;

    info!(elapsed = ?started.elapsed(), "scenario 3: request timeout ok");
    Ok(())
}

/// Запрос с ответом из другого потока.
fn request_reply(
    tasks: &TaskTable,
    ipc: &Ipc,
) -> Result<()> {
    let server_queue = ipc
        .process_queue(SERVER)
        .context("server has no process queue")?;

    thread::scope(|scope| -> Result<()> {
        let server = scope.spawn(|| -> Result<()> {
            let _task = tasks.enter(SERVER);
            let request = ipc.receive_message(server_queue, MessageFlags::empty())?;
            ensure!(request.kind == MessageType::Request, "unexpected {:?}", request.kind);
            debug!(request_id = request.msg_id, "server got request");

            let mut body = request.payload.to_vec();
            body.reverse();
            ipc.send_reply(
                request.sender_pid,
                Message::new(body).in_reply_to(request.msg_id),
            )?;
            Ok(())
        });

        let _task = tasks.enter(CLIENT);
        let reply = ipc.send_request(SERVER, Message::new("ping"), Duration::from_secs(5))?;
        ensure!(reply.payload.as_ref() == b"gnip", "reply payload changed");

        match server.join() {
            Ok(result) => result,
            Err(_) => bail!("server thread panicked"),
        }
    })?;

    info!("scenario 4: request/reply ok");
    Ok(())
}

fn print_stats(
    snapshot: &IpcStatsSnapshot,
    output: OutputFormat,
) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(snapshot)?),
        OutputFormat::Text => {
            println!("messages sent:        {}", snapshot.messages_sent);
            println!("messages received:    {}", snapshot.messages_received);
            println!("messages dropped:     {}", snapshot.messages_dropped);
            println!("queues created:       {}", snapshot.queues_created);
            println!("channels created:     {}", snapshot.channels_created);
            println!("active queues:        {}", snapshot.active_queues);
            println!("active channels:      {}", snapshot.active_channels);
            println!("requests / replies:   {} / {}", snapshot.requests, snapshot.replies);
            println!("timeouts:             {}", snapshot.timeouts);
            println!("broadcast deliveries: {}", snapshot.broadcast_deliveries);
            println!("memory used:          {} bytes", snapshot.memory_used);
        }
    }
    Ok(())
}
