use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use logroll::{RotatingWriter, SinkConfig};
use tempfile::tempdir;

const THREADS: usize = 8;
const RECORDS_PER_THREAD: usize = 200;
const MAX_SIZE: u64 = 4096;

fn record(thread: usize, seq: usize) -> String {
    format!("worker-{thread:02} seq-{seq:05} payload-abcdefghij\n")
}

#[test]
fn concurrent_appends_stay_whole_across_rotations() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("app.log");
    let mut config = SinkConfig::new(&path);
    config.max_size = MAX_SIZE;
    config.compress = false;
    config.max_age = Duration::ZERO;
    let writer = Arc::new(RotatingWriter::new(config).expect("writer"));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let writer = Arc::clone(&writer);
            thread::spawn(move || {
                for seq in 0..RECORDS_PER_THREAD {
                    writer.append(record(t, seq).as_bytes()).expect("append");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }
    writer.close().expect("close");

    let record_len = record(0, 0).len() as u64;
    let mut expected: HashSet<String> = (0..THREADS)
        .flat_map(|t| (0..RECORDS_PER_THREAD).map(move |seq| record(t, seq)))
        .map(|line| line.trim_end().to_string())
        .collect();
    let mut total = 0u64;
    let mut rotated = 0u64;

    for entry in fs::read_dir(dir.path()).expect("read dir") {
        let file = entry.expect("entry").path();
        let content = fs::read_to_string(&file).expect("read");
        let len = content.len() as u64;
        total += len;
        if file != path {
            rotated += 1;
            assert!(len > MAX_SIZE, "{} is only {len} bytes", file.display());
            assert!(len <= MAX_SIZE + record_len);
        }
        for line in content.lines() {
            assert!(expected.remove(line), "unexpected or duplicate line {line:?}");
        }
    }

    assert!(expected.is_empty(), "{} records missing", expected.len());
    assert_eq!(total, (THREADS * RECORDS_PER_THREAD) as u64 * record_len);
    assert_eq!(rotated, writer.rotations());
    assert!(rotated >= 1);
}
