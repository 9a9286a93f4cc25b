use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Session-wide abort flag. Once raised it stays raised.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    raised: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_is_visible_to_clones() {
        let signal = AbortSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_raised());

        signal.raise();
        assert!(observer.is_raised());
    }
}
