//! Integration tests for ObservationWindow.

use chrono::Utc;
use proptest::prelude::*;
use stepwise_window::{ObservationWindow, WindowRecord};

fn record(task_id: &str, step_index: u32, similarity: f64) -> WindowRecord {
    WindowRecord::new(Utc::now(), task_id, step_index, similarity)
}

#[test]
fn test_append_and_read_back() {
    let mut w = ObservationWindow::new(10, 1024 * 1024);
    w.append(record("coffee", 1, 0.9));
    w.append(record("coffee", 2, 0.8));
    assert_eq!(w.len(), 2);
    let steps: Vec<u32> = w.records().map(|r| r.step_index).collect();
    assert_eq!(steps, vec![1, 2]);
    assert_eq!(w.newest().map(|r| r.step_index), Some(2));
}

#[test]
fn test_count_cap_truncates_head() {
    let mut w = ObservationWindow::new(3, 1024 * 1024);
    for i in 0..5 {
        w.append(record("coffee", i, 0.9));
    }
    assert_eq!(w.len(), 3);
    let steps: Vec<u32> = w.records().map(|r| r.step_index).collect();
    assert_eq!(steps, vec![2, 3, 4]);
    assert_eq!(w.stats().cleanup_count, 2);
}

#[test]
fn test_byte_cap_drops_fifth_of_window() {
    // Each record with a 6-char task id is 170 estimated bytes; cap at
    // 10 records' worth so the 11th append overflows the byte budget.
    let mut w = ObservationWindow::new(100, 1700);
    for i in 0..10 {
        w.append(record("coffee", i, 0.9));
    }
    assert_eq!(w.len(), 10);
    assert_eq!(w.estimated_bytes(), 1700);
    let evicted = w.append(record("coffee", 10, 0.9));
    // ceil(11/5) = 3 oldest records dropped.
    assert_eq!(evicted, 3);
    assert_eq!(w.len(), 8);
    assert_eq!(w.records().next().map(|r| r.step_index), Some(3));
    assert_eq!(w.stats().cleanup_count, 3);
}

#[test]
fn test_stats_accounting() {
    let mut w = ObservationWindow::new(2, 1024 * 1024);
    for i in 0..4 {
        w.append(record("tea", i, 0.5));
    }
    let stats = w.stats();
    assert_eq!(stats.record_count, 2);
    assert_eq!(stats.cleanup_count, 2);
    assert_eq!(stats.max_size_reached, 2);
    assert_eq!(stats.estimated_bytes, 2 * (56 + 24 + 2 * 3 + 28 + 50));
    assert!((stats.avg_record_bytes - 164.0).abs() < f64::EPSILON);
}

#[test]
fn test_last_for_task_scans_recent_entries_only() {
    let mut w = ObservationWindow::new(50, 1024 * 1024);
    w.append(record("coffee", 1, 0.9));
    for i in 0..5 {
        w.append(record("tea", i, 0.9));
    }
    // "coffee" is six entries back, outside a scan of 5.
    assert!(w.last_for_task("coffee", 5).is_none());
    assert_eq!(w.last_for_task("tea", 5).map(|r| r.step_index), Some(4));
    assert_eq!(w.last_for_task("coffee", 6).map(|r| r.step_index), Some(1));
}

proptest! {
    // Both caps hold after any sequence of appends, and cleanup_count
    // accounts for exactly the records that left the window.
    #[test]
    fn prop_caps_hold_after_any_append_sequence(
        max_records in 1usize..20,
        max_bytes in 150usize..4000,
        tasks in prop::collection::vec(("[a-z]{1,12}", 0u32..30), 1..120),
    ) {
        let mut w = ObservationWindow::new(max_records, max_bytes);
        let mut appended = 0u64;
        for (task_id, step) in tasks {
            w.append(record(&task_id, step, 0.5));
            appended += 1;
            prop_assert!(w.len() <= max_records);
            prop_assert!(w.estimated_bytes() <= max_bytes);
            let by_hand: usize = w.records().map(WindowRecord::estimated_bytes).sum();
            prop_assert_eq!(w.estimated_bytes(), by_hand);
        }
        prop_assert_eq!(w.stats().cleanup_count, appended - w.len() as u64);
    }
}
