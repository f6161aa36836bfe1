use std::{
    hint::black_box,
    sync::Arc,
    thread,
};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kipc::{Ipc, IpcSettings, Message, MessageFlags, Permissions, Priority, TaskTable};
use rand::{rngs::SmallRng, Rng, SeedableRng};

const NB: MessageFlags = MessageFlags::NON_BLOCKING;

fn setup(pids: &[u32]) -> (Arc<TaskTable>, Arc<Ipc>) {
    let tasks = Arc::new(TaskTable::new());
    for &pid in pids {
        tasks.register(pid, "bench").unwrap();
    }
    let ipc = Arc::new(Ipc::new(IpcSettings::default(), tasks.clone()));
    (tasks, ipc)
}

/// Отправка и приём одного сообщения разного размера.
fn bench_send_receive(c: &mut Criterion) {
    let (tasks, ipc) = setup(&[1]);
    let _g = tasks.enter(1);
    let q = ipc.create_queue(64, Permissions::empty()).unwrap();

    let mut group = c.benchmark_group("queue_send_receive");
    for size in [16usize, 256, 4096] {
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                ipc.send_message(q, Message::new(payload.clone()), NB).unwrap();
                black_box(ipc.receive_message(q, NB).unwrap());
            })
        });
    }
    group.finish();
}

/// Заполнение очереди сообщениями случайных приоритетов и полный разбор.
fn bench_priority_mix(c: &mut Criterion) {
    let (tasks, ipc) = setup(&[1]);
    let _g = tasks.enter(1);
    let q = ipc.create_queue(64, Permissions::empty()).unwrap();
    let mut rng = SmallRng::seed_from_u64(42);
    let priorities: Vec<Priority> = (0..64)
        .map(|_| match rng.gen_range(0..4) {
            0 => Priority::Low,
            1 => Priority::Normal,
            2 => Priority::High,
            _ => Priority::Urgent,
        })
        .collect();

    c.bench_function("queue_fill_drain_64_mixed_priority", |b| {
        b.iter(|| {
            for &p in &priorities {
                ipc.send_message(q, Message::new("p").with_priority(p), NB)
                    .unwrap();
            }
            while let Ok(msg) = ipc.receive_message(q, NB) {
                black_box(msg);
            }
        })
    });
}

/// Передача между двумя потоками с блокирующим приёмом.
fn bench_cross_thread(c: &mut Criterion) {
    let (tasks, ipc) = setup(&[1, 2]);
    let q = {
        let _g = tasks.enter(2);
        ipc.create_queue(64, Permissions::WRITE).unwrap()
    };
    let batch = 1_000u64;

    let mut group = c.benchmark_group("queue_cross_thread");
    group.throughput(Throughput::Elements(batch));
    group.bench_function("blocking_1000", |b| {
        b.iter(|| {
            let consumer = {
                let (tasks, ipc) = (tasks.clone(), ipc.clone());
                thread::spawn(move || {
                    let _g = tasks.enter(2);
                    for _ in 0..batch {
                        black_box(ipc.receive_message(q, MessageFlags::empty()).unwrap());
                    }
                })
            };
            let _g = tasks.enter(1);
            for _ in 0..batch {
                ipc.send_message(q, Message::new("x"), MessageFlags::empty())
                    .unwrap();
            }
            consumer.join().unwrap();
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_send_receive,
    bench_priority_mix,
    bench_cross_thread
);
criterion_main!(benches);
