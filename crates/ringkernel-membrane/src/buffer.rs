//! Fixed-capacity cursor buffer used to stage one audio block.

/// Block-sized sample buffer with a single advancing cursor.
///
/// The buffer never grows and never wraps: once the cursor reaches capacity,
/// [`next`](Self::next) returns `None` until [`reset_index`](Self::reset_index).
#[derive(Debug, Clone)]
pub struct StreamingBuffer<T> {
    data: Vec<T>,
    index: usize,
}

impl<T: Copy + Default> StreamingBuffer<T> {
    /// Create a zero-filled buffer of `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity],
            index: 0,
        }
    }

    /// Copy `block` into the start of the buffer. The cursor is untouched.
    /// Returns the number of samples copied.
    pub fn load(&mut self, block: &[T]) -> usize {
        let n = block.len().min(self.data.len());
        self.data[..n].copy_from_slice(&block[..n]);
        n
    }

    /// Set every slot to `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T> StreamingBuffer<T> {
    /// Slot at the cursor, advancing the cursor.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&mut T> {
        let slot = self.data.get_mut(self.index)?;
        self.index += 1;
        Some(slot)
    }

    /// Rewind the cursor to 0.
    pub fn reset_index(&mut self) {
        self.index = 0;
    }

    /// Cursor position.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Whether the cursor has reached capacity.
    pub fn is_exhausted(&self) -> bool {
        self.index >= self.data.len()
    }

    /// All slots.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// All slots, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_advances_and_stops() {
        let mut buf: StreamingBuffer<f32> = StreamingBuffer::new(3);
        for i in 0..3 {
            *buf.next().unwrap() = i as f32;
        }
        assert!(buf.is_exhausted());
        assert!(buf.next().is_none());
        assert_eq!(buf.index(), 3);
        assert_eq!(buf.as_slice(), &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_reset_rewinds() {
        let mut buf: StreamingBuffer<f32> = StreamingBuffer::new(2);
        buf.next();
        buf.next();
        buf.reset_index();
        assert_eq!(buf.index(), 0);
        assert!(!buf.is_exhausted());
        assert!(buf.next().is_some());
    }

    #[test]
    fn test_load_keeps_cursor() {
        let mut buf: StreamingBuffer<f32> = StreamingBuffer::new(4);
        buf.next();
        let copied = buf.load(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(copied, 4);
        assert_eq!(buf.index(), 1);
        assert_eq!(buf.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_zero_capacity() {
        let mut buf: StreamingBuffer<f32> = StreamingBuffer::new(0);
        assert!(buf.is_exhausted());
        assert!(buf.next().is_none());
    }
}
