#![no_main]
use std::ptr::{self, NonNull};

use brkheap::{Heap, HeapConfig, ReservedSegment};
use libfuzzer_sys::fuzz_target;

const THRESHOLD: usize = 16 * 1024;

fuzz_target!(|data: &[u8]| {
    // Each 4-byte chunk is one operation: opcode, slot, little-endian size.
    if data.len() < 4 {
        return;
    }

    let config = HeapConfig::DEFAULT
        .with_large_threshold(THRESHOLD)
        .without_journal();
    let Ok(segment) = ReservedSegment::new(64 << 20) else {
        return;
    };
    let Ok(heap) = Heap::<ReservedSegment>::try_with_config(segment, config) else {
        return;
    };
    let mut slots: [Option<(NonNull<u8>, usize, u8)>; 16] = [None; 16];

    for (step, chunk) in data.chunks_exact(4).enumerate() {
        let slot = (chunk[1] % 16) as usize;
        let size = u16::from_le_bytes([chunk[2], chunk[3]]) as usize * 2;
        let byte = step as u8;

        match chunk[0] % 5 {
            0 | 1 => {
                if let Some((p, len, fill)) = slots[slot].take() {
                    check(p, len, fill);
                    unsafe { heap.release(Some(p)).unwrap() };
                }
                let acquired = if chunk[0] % 5 == 0 && chunk[0] >= 128 {
                    let align = 32 << (chunk[0] % 8);
                    let aligned = heap.acquire_aligned(align, size);
                    if let Ok(Some(p)) = aligned {
                        assert_eq!(p.as_ptr() as usize % align, 0);
                    }
                    aligned
                } else if chunk[0] % 5 == 0 {
                    heap.acquire(size)
                } else {
                    heap.zero_allocate(1, size)
                };
                if let Ok(Some(p)) = acquired {
                    if chunk[0] % 5 == 1 {
                        check(p, size, 0);
                    }
                    unsafe { ptr::write_bytes(p.as_ptr(), byte, size) };
                    slots[slot] = Some((p, size, byte));
                }
            }
            2 => {
                if let Some((p, len, fill)) = slots[slot].take() {
                    check(p, len, fill);
                    unsafe { heap.release(Some(p)).unwrap() };
                    // A second release must be rejected, never honoured.
                    assert!(unsafe { heap.release(Some(p)) }.is_err());
                }
            }
            3 => {
                if let Some((p, len, fill)) = slots[slot].take() {
                    match unsafe { heap.reallocate(Some(p), size) } {
                        Ok(Some(q)) => {
                            let kept = len.min(size);
                            check(q, kept, fill);
                            slots[slot] = Some((q, kept, fill));
                        }
                        Ok(None) => assert_eq!(size, 0),
                        Err(_) => slots[slot] = Some((p, len, fill)),
                    }
                }
            }
            _ => {
                heap.check_integrity().unwrap();
            }
        }
    }

    for (p, len, fill) in slots.into_iter().flatten() {
        check(p, len, fill);
        unsafe { heap.release(Some(p)).unwrap() };
    }
    let stats = heap.check_integrity().unwrap();
    assert_eq!(stats.blocks, stats.free_blocks);
    assert_eq!(heap.stats().large.regions, 0);
});

fn check(p: NonNull<u8>, len: usize, fill: u8) {
    let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), len) };
    assert!(bytes.iter().all(|&b| b == fill));
}
