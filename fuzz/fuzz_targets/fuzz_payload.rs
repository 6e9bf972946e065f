#![no_main]

use ghost_core::cipher::HEADER_SIZE;
use ghost_core::{EncryptedPayload, PayloadCipher};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parse - should not panic
    let Ok(payload) = EncryptedPayload::from_bytes(data) else {
        assert!(data.len() < HEADER_SIZE);
        return;
    };

    // Framing round-trips byte for byte
    assert_eq!(payload.to_bytes(), data);

    // Arbitrary bytes never authenticate under a fixed key
    let cipher = PayloadCipher::new(&[0x42; 32]);
    assert!(cipher.open(&payload, b"fuzz").is_err());
});
