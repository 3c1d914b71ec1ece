//! Installs the heap on the real data segment as this test binary's global
//! allocator, so the test harness itself runs on it too.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use brkheap::{DataSegment, SpinHeap};

#[global_allocator]
static GLOBAL: SpinHeap<DataSegment> = SpinHeap::new(DataSegment::new());

#[repr(align(128))]
struct CacheLine([u8; 128]);

#[repr(align(4096))]
struct PageAligned([u8; 64]);

#[test]
fn collections_work() {
    let mut words: Vec<String> = Vec::new();
    for i in 0..5_000 {
        words.push(format!("word-{i}"));
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for w in &words {
        *counts.entry(w.as_str()).or_default() += w.len();
    }
    assert_eq!(counts.len(), 5_000);
    assert_eq!(counts["word-4999"], 9);

    words.truncate(10);
    words.shrink_to_fit();
    assert_eq!(words[9], "word-9");
}

#[test]
fn large_buffers_are_mapped() {
    let buf = vec![7u8; 1 << 20];
    assert!(GLOBAL.stats().large.regions >= 1);
    assert!(buf.iter().all(|&b| b == 7));

    let zeroed = vec![0u64; 64 * 1024];
    assert!(zeroed.iter().all(|&w| w == 0));
}

#[test]
fn over_aligned_boxes() {
    let lines: Vec<Box<CacheLine>> = (0..64).map(|i| Box::new(CacheLine([i as u8; 128]))).collect();
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(&**line as *const CacheLine as usize % 128, 0);
        assert!(line.0.iter().all(|&b| b == i as u8));
    }

    let page = Box::new(PageAligned([3; 64]));
    assert_eq!(&*page as *const PageAligned as usize % 4096, 0);
    assert_eq!(page.0[63], 3);
}

#[test]
fn growing_vec_keeps_contents() {
    let mut v: Vec<u32> = Vec::new();
    for i in 0..200_000u32 {
        v.push(i);
    }
    assert!(v.iter().enumerate().all(|(i, &x)| x == i as u32));
}

#[test]
fn threads_and_channels() {
    let shared = Arc::new((0..1000).collect::<Vec<u64>>());
    let (tx, rx) = mpsc::channel();
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let shared = Arc::clone(&shared);
            let tx = tx.clone();
            thread::spawn(move || {
                let local: Vec<String> = (0..500).map(|i| format!("{t}:{i}")).collect();
                let sum: u64 = shared.iter().sum();
                tx.send((local.len(), sum)).unwrap();
            })
        })
        .collect();
    drop(tx);
    for h in handles {
        h.join().unwrap();
    }
    let results: Vec<_> = rx.iter().collect();
    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|&(n, sum)| n == 500 && sum == 499_500));
}

#[test]
fn integrity_holds_after_traffic() {
    let junk: Vec<Vec<u8>> = (1..200).map(|n| vec![n as u8; n * 37]).collect();
    drop(junk);
    GLOBAL.check_integrity().unwrap();
    assert!(!GLOBAL.lifecycle_records().is_empty());
}
