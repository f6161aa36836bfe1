use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kipc::{Ipc, IpcSettings, Message, MessageFlags, Permissions, Pid, TaskTable};

const PUBLISHER: Pid = 1;

/// Издатель и `subscribers` задач с очередями процесса.
fn setup(subscribers: u32) -> (Arc<TaskTable>, Ipc, Vec<Pid>) {
    let tasks = Arc::new(TaskTable::new());
    let pids: Vec<Pid> = (100..100 + subscribers).collect();
    tasks.register(PUBLISHER, "publisher").unwrap();
    for &pid in &pids {
        tasks.register(pid, "subscriber").unwrap();
    }
    let ipc = Ipc::new(IpcSettings::default(), tasks.clone());
    for &pid in &pids {
        let _g = tasks.enter(pid);
        ipc.create_queue(64, Permissions::empty()).unwrap();
    }
    (tasks, ipc, pids)
}

fn drain(
    tasks: &TaskTable,
    ipc: &Ipc,
    pids: &[Pid],
) {
    for &pid in pids {
        let _g = tasks.enter(pid);
        let q = ipc.process_queue(pid).unwrap();
        while let Ok(msg) = ipc.receive_message(q, MessageFlags::NON_BLOCKING) {
            black_box(msg);
        }
    }
}

/// Публикация в канал с разным числом подписчиков.
fn bench_channel_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_fanout");
    for subscribers in [1u32, 8, 32] {
        let (tasks, ipc, pids) = setup(subscribers);
        let ch = {
            let _g = tasks.enter(PUBLISHER);
            ipc.create_channel("bench", false, false).unwrap()
        };
        for &pid in &pids {
            ipc.subscribe_channel(ch, pid).unwrap();
        }

        group.throughput(Throughput::Elements(u64::from(subscribers)));
        group.bench_function(BenchmarkId::from_parameter(subscribers), |b| {
            b.iter(|| {
                {
                    let _g = tasks.enter(PUBLISHER);
                    for _ in 0..32 {
                        black_box(
                            ipc.send_to_channel(
                                ch,
                                Message::new("tick"),
                                MessageFlags::NON_BLOCKING,
                            )
                            .unwrap(),
                        );
                    }
                }
                drain(&tasks, &ipc, &pids);
            })
        });
    }
    group.finish();
}

/// Рассылка по списку PID.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    for targets in [4u32, 16, 64] {
        let (tasks, ipc, pids) = setup(targets);

        group.throughput(Throughput::Elements(u64::from(targets)));
        group.bench_function(BenchmarkId::from_parameter(targets), |b| {
            b.iter(|| {
                {
                    let _g = tasks.enter(PUBLISHER);
                    black_box(ipc.broadcast(Message::new("all"), &pids).unwrap());
                }
                drain(&tasks, &ipc, &pids);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_channel_fanout, bench_broadcast);
criterion_main!(benches);
