#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vmtrie::data::NibblePath;

#[derive(Arbitrary, Debug)]
struct NibblePathInput {
    bytes: Vec<u8>,
    operations: Vec<NibbleOp>,
}

#[derive(Arbitrary, Debug)]
enum NibbleOp {
    Get(usize),
    Push(u8),
    Pop,
    FromPacked(usize),
    Compare(Vec<u8>),
    Iterate,
}

fuzz_target!(|input: NibblePathInput| {
    // Limit input size
    if input.bytes.len() > 1000 || input.operations.len() > 100 {
        return;
    }

    let mut path = NibblePath::from_key_hash(&input.bytes);

    for op in input.operations {
        match op {
            NibbleOp::Get(idx) => {
                let len = path.len();
                if len > 0 {
                    let nibble = path.get(idx % len).unwrap();
                    assert!(nibble < 16);
                }
                // Out-of-bounds must error, never panic.
                assert!(path.get(len).is_err());
            }
            NibbleOp::Push(nibble) => {
                let before = path.len();
                if path.push(nibble).is_ok() {
                    assert!(nibble < 16);
                    assert_eq!(path.len(), before + 1);
                    assert_eq!(path.get(before).unwrap(), nibble);
                } else {
                    assert!(nibble >= 16);
                    assert_eq!(path.len(), before);
                }
            }
            NibbleOp::Pop => {
                let before = path.len();
                path.pop();
                assert_eq!(path.len(), before.saturating_sub(1));
                // Odd-length paths keep a zero padding nibble.
                if path.len() % 2 != 0 {
                    assert_eq!(path.bytes().last().unwrap() & 0x0F, 0);
                }
            }
            NibbleOp::FromPacked(count) => {
                let rebuilt = NibblePath::from_packed(path.bytes(), path.len());
                assert_eq!(rebuilt, path);

                // Arbitrary counts must stay in bounds.
                let clamped = NibblePath::from_packed(path.bytes(), count % 4096);
                for i in 0..clamped.len() {
                    assert!(clamped.get(i).unwrap() < 16);
                }
            }
            NibbleOp::Compare(other_bytes) => {
                if other_bytes.len() > 1000 {
                    continue;
                }
                let other = NibblePath::from_key_hash(&other_bytes);
                // Ordering is total and consistent with equality.
                let ord = path.cmp(&other);
                assert_eq!(ord.reverse(), other.cmp(&path));
                assert_eq!(ord.is_eq(), path == other);
            }
            NibbleOp::Iterate => {
                let collected: Vec<u8> = path.iter().collect();
                assert_eq!(collected.len(), path.len());
                for nibble in collected {
                    assert!(nibble < 16);
                }
            }
        }
    }
});
