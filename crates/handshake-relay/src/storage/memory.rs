//! In-process store

use parking_lot::Mutex;

use super::{Store, StorageError};

/// Mutex-guarded state living only in this process
#[derive(Debug, Default)]
pub struct MemoryStore<S> {
    state: Mutex<S>,
}

impl<S> MemoryStore<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl<S> Store<S> for MemoryStore<S>
where
    S: Clone + Send,
{
    fn read(&self) -> Result<S, StorageError> {
        Ok(self.state.lock().clone())
    }

    fn update(&self, f: &mut dyn FnMut(&mut S)) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        f(&mut state);
        Ok(())
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
