#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use kipc::{AddressSpace, Ipc, IpcSettings, RawSyscall, TaskTable};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzCall {
    number: u8,
    args: [u64; 5],
    /// Аргументы-указатели как смещения внутри пространства задачи.
    relative: [bool; 5],
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    memory: Vec<u8>,
    calls: Vec<FuzzCall>,
}

fuzz_target!(|input: FuzzInput| {
    let tasks = Arc::new(TaskTable::new());
    tasks.register(1, "fuzz").unwrap();
    tasks.register(2, "peer").unwrap();
    let ipc = Ipc::new(IpcSettings::default(), tasks.clone());
    let _g = tasks.enter(1);

    let mut space = AddressSpace::new(input.memory.len().max(1));
    let base = space.base();
    if !input.memory.is_empty() {
        space.copy_to_user(base, &input.memory).unwrap();
    }

    for call in input.calls.iter().take(32) {
        let mut args = call.args;
        for (arg, relative) in args.iter_mut().zip(call.relative) {
            if relative {
                *arg = base.wrapping_add(*arg % space.size() as u64);
            }
        }
        // Номера 50..=60 и немного вокруг; ожидание ограничено, чтобы
        // блокирующие вызовы не зависали.
        let number = 48 + u64::from(call.number % 16);
        if number == 57 {
            args[3] %= 5;
        }
        args[2] |= if matches!(number, 52 | 53 | 56) { 0x02 } else { 0 };

        let code = ipc.syscall(&RawSyscall { number, args }, &mut space);
        assert!(code >= -12);
    }
});
