#![no_main]

use kipc::ipc::syscall::{decode_user_message, encode_user_message, USER_MESSAGE_HEADER};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = decode_user_message(data) {
        // Успешно разобранный заголовок кодируется обратно без изменений.
        let encoded = encode_user_message(&msg);
        assert_eq!(&encoded[..USER_MESSAGE_HEADER], &data[..USER_MESSAGE_HEADER]);
        assert_eq!(decode_user_message(&encoded).ok(), Some(msg));
    }
});
