#![no_main]

use ghost_core::{DeviceManifest, RootKey};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };

    // Parse - should not panic
    if let Ok(manifest) = DeviceManifest::from_json(json) {
        let _ = manifest.validate_policy();

        // Untrusted input must not verify under a key it never saw
        let key = RootKey::from_bytes([0x5a; 32]);
        assert!(!manifest.verify(&key));

        if let Ok(reserialized) = manifest.to_json() {
            let manifest2 = DeviceManifest::from_json(&reserialized).unwrap();
            assert_eq!(manifest, manifest2);
        }
    }
});
