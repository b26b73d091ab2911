/// Shared configuration handle with atomic reload

use std::sync::{Arc, RwLock};

use super::AppConfig;

/// Readers hold an `Arc` to a frozen config; a reload swaps the pointer so
/// nothing is ever mutated in place.
#[derive(Debug)]
pub struct ConfigHandle {
    current: RwLock<Arc<AppConfig>>,
}

impl ConfigHandle {
    pub fn new(config: AppConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn get(&self) -> Arc<AppConfig> {
        self.current
            .read()
            .expect("config lock poisoned")
            .clone()
    }

    pub fn replace(&self, config: AppConfig) {
        let mut guard = self.current.write().expect("config lock poisoned");
        *guard = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_swaps_without_touching_existing_handles() {
        let handle = ConfigHandle::new(AppConfig::default());
        let before = handle.get();

        let mut updated = AppConfig::default();
        updated.thresholds.margin_min = 1;
        handle.replace(updated);

        assert_eq!(before.thresholds.margin_min, 100_000);
        assert_eq!(handle.get().thresholds.margin_min, 1);
    }
}
