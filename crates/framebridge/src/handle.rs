//! Owned references on driver handles.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use framebridge_driver::{AudioInputPacket, RefCounted, VideoInputFrame};

/// A driver handle this side holds a reference on.
///
/// Creating a `Retained` adds a reference; dropping it releases that
/// reference exactly once.
pub struct Retained<T: ?Sized + RefCounted> {
    inner: Arc<T>,
}

pub type RetainedVideo = Retained<dyn VideoInputFrame>;
pub type RetainedAudio = Retained<dyn AudioInputPacket>;

impl<T: ?Sized + RefCounted> Retained<T> {
    /// Take a reference on a handle borrowed from the driver.
    pub fn retain(handle: &Arc<T>) -> Self {
        handle.add_ref();
        Self {
            inner: Arc::clone(handle),
        }
    }
}

impl<T: ?Sized + RefCounted> Deref for Retained<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: ?Sized + RefCounted> Drop for Retained<T> {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl<T: ?Sized + RefCounted> fmt::Debug for Retained<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retained")
            .field("handle", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framebridge_driver::synthetic::SyntheticInput;

    #[test]
    fn test_retain_and_drop_balance() {
        let input = SyntheticInput::manual();
        let frame = input.make_video_frame(8, 2, 0);
        let handle: Arc<dyn VideoInputFrame> = frame.clone();

        let retained = Retained::retain(&handle);
        assert_eq!(frame.ref_count(), 2);
        assert_eq!(retained.row_bytes(), 8);

        drop(retained);
        assert_eq!(frame.ref_count(), 1);

        frame.release();
        assert_eq!(input.ledger().live(), 0);
        assert_eq!(input.ledger().over_released(), 0);
    }
}
