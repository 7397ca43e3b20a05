//! Lock-free ring buffers between real-time callbacks and other threads
//!
//! Both rings are single-producer/single-consumer and preallocated, so the
//! producing side never allocates or blocks. A full ring rejects new data;
//! callers count the drop instead of waiting.
//!
//! # Example
//!
//! ```
//! use pickbeat::audio::buffer::AudioRingBuffer;
//!
//! let (mut producer, mut consumer) = AudioRingBuffer::new(4096);
//!
//! let block = vec![0.5f32; 256];
//! producer.push_slice(&block);
//!
//! let mut output = vec![0.0f32; 256];
//! assert_eq!(consumer.pop_slice(&mut output), 256);
//! ```

use ringbuf::{
    HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};

use crate::audio::onset::OnsetEvent;

/// Number of blocks the monitoring ring can hold
pub const MONITOR_RING_BLOCKS: usize = 4;

/// Default capacity of the onset event queue
pub const ONSET_QUEUE_CAPACITY: usize = 64;

/// Sample ring carrying captured mono audio to the monitoring output
pub struct AudioRingBuffer;

/// Writing half of an [`AudioRingBuffer`]
pub struct AudioBufferProducer {
    producer: ringbuf::HeapProd<f32>,
}

/// Reading half of an [`AudioRingBuffer`]
pub struct AudioBufferConsumer {
    consumer: ringbuf::HeapCons<f32>,
}

impl AudioRingBuffer {
    /// Create a ring holding `capacity` samples
    pub fn new(capacity: usize) -> (AudioBufferProducer, AudioBufferConsumer) {
        let rb = HeapRb::<f32>::new(capacity.max(1));
        let (producer, consumer) = rb.split();

        (
            AudioBufferProducer { producer },
            AudioBufferConsumer { consumer },
        )
    }

    /// Ring sized for monitoring with the given block size
    pub fn for_monitoring(block_size: usize) -> (AudioBufferProducer, AudioBufferConsumer) {
        Self::new(block_size.max(1) * MONITOR_RING_BLOCKS)
    }
}

impl AudioBufferProducer {
    /// Write as many samples as fit, returning the number written
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.producer.push_slice(samples)
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }
}

impl AudioBufferConsumer {
    /// Read into `output`, returning the number of samples read
    pub fn pop_slice(&mut self, output: &mut [f32]) -> usize {
        self.consumer.pop_slice(output)
    }

    pub fn available_samples(&self) -> usize {
        self.consumer.occupied_len()
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.consumer.capacity().get()
    }

    /// Discard up to `count` of the oldest samples
    pub fn skip(&mut self, count: usize) -> usize {
        self.consumer.skip(count)
    }
}

/// Bounded queue of onset events from the capture callback to the dispatcher
pub struct OnsetQueue;

/// Real-time side of an [`OnsetQueue`]
pub struct OnsetProducer {
    producer: ringbuf::HeapProd<OnsetEvent>,
}

/// Dispatcher side of an [`OnsetQueue`]
pub struct OnsetConsumer {
    consumer: ringbuf::HeapCons<OnsetEvent>,
}

impl OnsetQueue {
    pub fn new(capacity: usize) -> (OnsetProducer, OnsetConsumer) {
        let rb = HeapRb::<OnsetEvent>::new(capacity.max(1));
        let (producer, consumer) = rb.split();
        (OnsetProducer { producer }, OnsetConsumer { consumer })
    }

    pub fn with_default_capacity() -> (OnsetProducer, OnsetConsumer) {
        Self::new(ONSET_QUEUE_CAPACITY)
    }
}

impl OnsetProducer {
    /// Enqueue an event; returns `false` (and drops the event) when full
    pub fn try_push(&mut self, event: OnsetEvent) -> bool {
        self.producer.try_push(event).is_ok()
    }
}

impl OnsetConsumer {
    pub fn pop(&mut self) -> Option<OnsetEvent> {
        self.consumer.try_pop()
    }
}
