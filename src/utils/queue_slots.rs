/// Busy/free table for the hardware queues of one queue family.
///
/// Slots are addressed by queue index. Acquisition always picks the lowest free
/// index, so a released slot is handed out again before any higher free one.
#[derive(Debug, Clone, Default)]
pub struct QueueSlots {
    busy: Vec<bool>,
}

impl QueueSlots {
    /// Create a table of `count` free slots.
    pub fn new(count: usize) -> Self {
        Self {
            busy: vec![false; count],
        }
    }

    /// Total number of slots.
    pub fn len(&self) -> usize {
        self.busy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.busy.is_empty()
    }

    /// Lowest-indexed free slot, if any.
    pub fn next_free(&self) -> Option<u32> {
        self.busy.iter().position(|b| !*b).map(|i| i as u32)
    }

    /// Find the lowest free slot and mark it busy.
    pub fn acquire(&mut self) -> Option<u32> {
        let idx = self.next_free()?;
        self.busy[idx as usize] = true;
        Some(idx)
    }

    /// Returns `false` if `index` is out of range.
    pub fn mark_busy(&mut self, index: u32) -> bool {
        self.set(index, true)
    }

    /// Returns `false` if `index` is out of range.
    pub fn mark_free(&mut self, index: u32) -> bool {
        self.set(index, false)
    }

    pub fn is_busy(&self, index: u32) -> bool {
        self.busy.get(index as usize).copied().unwrap_or(false)
    }

    /// Mark every slot free, keeping the table size.
    pub fn free_all(&mut self) {
        self.busy.iter_mut().for_each(|b| *b = false);
    }

    /// Drop every slot.
    pub fn clear(&mut self) {
        self.busy.clear();
    }

    pub fn busy_count(&self) -> usize {
        self.busy.iter().filter(|b| **b).count()
    }

    fn set(&mut self, index: u32, value: bool) -> bool {
        match self.busy.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}
