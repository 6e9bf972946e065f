#![no_main]

use arbitrary::Arbitrary;
use ghost_core::{shamir, Share};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    secret: Vec<u8>,
    first: u8,
    second: u8,
    garbage: Vec<(u8, Vec<u8>)>,
}

fuzz_target!(|input: Input| {
    // Any two distinct shares of a split recover the secret
    if !input.secret.is_empty() {
        let shares = shamir::split(&input.secret);
        let a = (input.first % 3) as usize;
        let b = (input.second % 3) as usize;
        if a != b {
            let pair = [shares[a].clone(), shares[b].clone()];
            let recovered = shamir::reconstruct(&pair).unwrap();
            assert_eq!(recovered.as_bytes(), input.secret.as_slice());
        }
    }

    // Arbitrary share sets are rejected or reconstructed, never a panic
    let garbage: Vec<Share> = input
        .garbage
        .into_iter()
        .filter_map(|(index, data)| Share::new(index, data).ok())
        .collect();
    let _ = shamir::reconstruct(&garbage);
});
