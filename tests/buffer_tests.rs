use hygrostat::config::MAX_BUFFER_CAPACITY;
use hygrostat::{EstimateBuffer, FilteredEstimate};
use std::time::SystemTime;

fn estimate(humidity: f64) -> FilteredEstimate {
    FilteredEstimate {
        sensor_id: 9,
        temperature: 20.0,
        humidity,
        samples_used: 10,
        produced_at: SystemTime::now(),
    }
}

#[test]
fn test_full_buffer_evicts_oldest() {
    let buffer = EstimateBuffer::new(2);
    assert_eq!(buffer.capacity(), 2);

    buffer.push(estimate(1.0));
    buffer.push(estimate(2.0));
    buffer.push(estimate(3.0));

    assert_eq!(buffer.len(), 2);
    assert_eq!(buffer.pop_latest().map(|e| e.humidity), Some(3.0));
    assert!(buffer.is_empty());
}

#[test]
fn test_eviction_keeps_newest_entries_in_order() {
    let buffer = EstimateBuffer::new(3);
    for h in 1..=10 {
        buffer.push(estimate(f64::from(h)));
        assert!(buffer.len() <= 3);
    }
    assert_eq!(buffer.pop_latest().map(|e| e.humidity), Some(10.0));
}

#[test]
fn test_capacity_is_clamped() {
    assert_eq!(EstimateBuffer::new(0).capacity(), 1);
    assert_eq!(EstimateBuffer::new(MAX_BUFFER_CAPACITY + 50).capacity(), MAX_BUFFER_CAPACITY);

    let buffer = EstimateBuffer::new(MAX_BUFFER_CAPACITY + 50);
    for h in 0..(MAX_BUFFER_CAPACITY + 5) {
        buffer.push(estimate(h as f64));
    }
    assert_eq!(buffer.len(), MAX_BUFFER_CAPACITY);
}

#[test]
fn test_clones_share_one_queue() {
    let producer = EstimateBuffer::new(4);
    let consumer = producer.clone();
    producer.push(estimate(61.0));
    assert_eq!(consumer.len(), 1);
    assert_eq!(consumer.pop_latest().map(|e| e.humidity), Some(61.0));
    assert!(producer.is_empty());
}
