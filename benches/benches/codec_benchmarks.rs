use std::hint::black_box;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use kipc::{
    ipc::syscall::{decode_user_message, encode_user_message},
    Message, MessageFlags, MessageType, Priority,
};

fn sample() -> Message {
    Message::new(Bytes::from(vec![7u8; 1024]))
        .with_kind(MessageType::Request)
        .with_priority(Priority::High)
        .with_flags(MessageFlags::RELIABLE)
}

fn bench_encode(c: &mut Criterion) {
    let msg = sample();
    c.bench_function("user_message_encode_1k", |b| {
        b.iter(|| black_box(encode_user_message(black_box(&msg))))
    });
}

fn bench_decode(c: &mut Criterion) {
    let raw = encode_user_message(&sample()).freeze();
    c.bench_function("user_message_decode_1k", |b| {
        b.iter(|| black_box(decode_user_message(black_box(&raw)).unwrap()))
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
