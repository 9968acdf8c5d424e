mod queue_slots;
pub use queue_slots::QueueSlots;
