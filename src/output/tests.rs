//! Output Buffer Tests
//!
//! ## Test Scopes
//! - **Drain semantics**: batches are disjoint and keep emission order.
//! - **Concurrency**: an emitter and a drainer interleaving freely lose and duplicate
//!   nothing.
//! - **Addressed emit**: rejected by `OutputBuffer`, routed by `RoutedOutputBuffer`.

#[cfg(test)]
mod tests {
    use crate::error::RuntimeError;
    use crate::output::OutputCollector;
    use crate::output::buffer::{OutputBuffer, RoutedOutputBuffer};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    // ============================================================
    // DRAIN SEMANTICS
    // ============================================================

    #[test]
    fn test_drain_returns_emitted_records_in_order() {
        let buffer: OutputBuffer<u32> = OutputBuffer::new();
        for i in 0..5 {
            buffer.emit(i);
        }

        assert_eq!(buffer.drain_and_reset(), vec![0, 1, 2, 3, 4]);
        assert!(buffer.is_empty());
        assert!(buffer.drain_and_reset().is_empty());
    }

    #[test]
    fn test_consecutive_drains_are_disjoint() {
        let buffer: OutputBuffer<&str> = OutputBuffer::new();
        buffer.emit("a");
        buffer.emit("b");
        let first = buffer.drain_and_reset();
        buffer.emit("c");
        let second = buffer.drain_and_reset();

        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(second, vec!["c"]);
    }

    // ============================================================
    // CONCURRENCY
    // ============================================================

    #[test]
    fn test_interleaved_emit_and_drain_lose_nothing() {
        const TOTAL: u64 = 200_000;
        let buffer: Arc<OutputBuffer<u64>> = Arc::new(OutputBuffer::new());
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let buffer = buffer.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for i in 0..TOTAL {
                    buffer.emit(i);
                }
                done.store(true, Ordering::SeqCst);
            })
        };
        let drainer = {
            let buffer = buffer.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut batches = Vec::new();
                while !done.load(Ordering::SeqCst) {
                    batches.push(buffer.drain_and_reset());
                }
                batches.push(buffer.drain_and_reset());
                batches
            })
        };

        producer.join().unwrap();
        let batches = drainer.join().unwrap();

        let seen: Vec<u64> = batches.into_iter().flatten().collect();
        assert_eq!(seen.len() as u64, TOTAL, "Nothing lost or duplicated");
        assert!(
            seen.windows(2).all(|pair| pair[0] + 1 == pair[1]),
            "Emission order preserved across batches"
        );
    }

    // ============================================================
    // ADDRESSED EMIT
    // ============================================================

    #[test]
    fn test_addressed_emit_is_not_supported() {
        let buffer: OutputBuffer<i32> = OutputBuffer::new();

        let result = buffer.emit_to("sink", 1);

        assert!(!buffer.supports_addressed_emit());
        assert!(matches!(
            result,
            Err(RuntimeError::CapabilityNotSupported(_))
        ));
        assert!(buffer.is_empty(), "Rejected record must not be buffered");
    }

    #[test]
    fn test_routed_buffer_keeps_destinations_apart() {
        let buffer: RoutedOutputBuffer<i32> = RoutedOutputBuffer::new(["left", "right"]);

        buffer.emit(0);
        buffer.emit_to("left", 1).unwrap();
        buffer.emit_to("right", 2).unwrap();
        buffer.emit_to("left", 3).unwrap();

        assert!(buffer.supports_addressed_emit());
        assert_eq!(buffer.drain_destination("left").unwrap(), vec![1, 3]);
        assert_eq!(buffer.drain_and_reset(), vec![0]);

        let rest = buffer.drain_all();
        assert_eq!(rest["left"], Vec::<i32>::new());
        assert_eq!(rest["right"], vec![2]);
    }

    #[test]
    fn test_routed_buffer_rejects_undeclared_destination() {
        let buffer: RoutedOutputBuffer<u8> = RoutedOutputBuffer::new(["left"]);

        assert!(buffer.emit_to("nowhere", 1).is_err());
        assert!(buffer.drain_destination("nowhere").is_err());
        assert_eq!(buffer.destinations().collect::<Vec<_>>(), vec!["left"]);
    }

    #[test]
    fn test_collector_is_usable_as_trait_object() {
        let buffer: Arc<OutputBuffer<String>> = Arc::new(OutputBuffer::new());
        let collector: Arc<dyn OutputCollector<String>> = buffer.clone();

        collector.emit("x".to_string());

        assert_eq!(buffer.drain_and_reset(), vec!["x".to_string()]);
    }
}
