//! Lock-free SPSC ring buffer between the device callback and the capture pump,
//! plus the chunk and framing types built on top of it.
//!
//! Uses `ringbuf::HeapRb<f32>` whose `push_slice` is wait-free and safe to call
//! from the real-time audio callback.

pub mod chunk;
pub mod frame;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the device callback.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the capture pump.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^18 = 262 144 f32 samples ≈ 5.4 s at 48 kHz.
/// The pump drains every few milliseconds; this only absorbs scheduling stalls.
pub const RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
