use crate::frame::VideoFrame;

/// Fixed ring of recently sent frames handed to the frame callback.
///
/// Slots are overwritten cyclically, so a reference obtained from [`FramePool::store`]
/// is only meaningful until the ring wraps around.
pub struct FramePool {
    slots: Vec<Option<VideoFrame>>,
    next: usize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            next: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn store(&mut self, frame: &VideoFrame) -> &VideoFrame {
        let index = self.next;
        self.next = (self.next + 1) % self.slots.len();
        self.slots[index].insert(frame.clone())
    }
}
