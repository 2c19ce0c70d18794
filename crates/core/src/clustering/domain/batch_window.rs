use std::ops::Range;

/// One comparison window over the ordered face list.
///
/// Faces in `start..new_start` were already handled by an earlier window
/// and act only as references. Faces in `new_start..end` are matched here,
/// each against every face before it in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    pub start: usize,
    pub new_start: usize,
    pub end: usize,
}

impl BatchWindow {
    pub fn new_faces(&self) -> Range<usize> {
        self.new_start..self.end
    }

    /// Reference candidates for the face at `index`.
    pub fn references_for(&self, index: usize) -> Range<usize> {
        self.start..index
    }
}

/// Splits `count` faces into windows of `batch_size` whose starts advance by
/// `offset_increment`. Every face is new in exactly one window.
///
/// Two similar faces more than `batch_size` apart are never compared
/// directly; they only end up together through intermediate faces.
pub fn batch_windows(count: usize, batch_size: usize, offset_increment: usize) -> Vec<BatchWindow> {
    let mut windows = Vec::new();
    if batch_size == 0 || offset_increment == 0 {
        return windows;
    }

    let mut start = 0;
    let mut covered = 0;
    while covered < count {
        let end = (start + batch_size).min(count);
        windows.push(BatchWindow {
            start,
            new_start: covered.max(start),
            end,
        });
        covered = end;
        start += offset_increment;
    }
    windows
}
