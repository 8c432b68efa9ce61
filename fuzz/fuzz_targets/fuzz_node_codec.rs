#![no_main]

use libfuzzer_sys::fuzz_target;
use vmtrie::merkle::{decode_node, encode_node};

fuzz_target!(|data: &[u8]| {
    if data.len() > 4096 {
        return;
    }

    // Decoding arbitrary bytes must never panic, and anything that decodes
    // must re-encode to exactly the input (the encoding is a bijection).
    if let Ok(node) = decode_node(data) {
        let reencoded = encode_node(&node);
        assert_eq!(reencoded, data);

        // Hashing a decoded node is total.
        let _ = node.hash();
    }
});
