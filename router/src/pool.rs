use std::sync::Mutex;

/// Per-worker store, constructed on demand from an exemplar.
///
/// Slot 0 belongs to threads outside the rayon pool (the controller thread);
/// slots 1..=N belong to the N workers. Each slot is only ever touched by its
/// owning thread during an iteration, so the mutexes are uncontended; they
/// exist to let the controller reset and reduce the slots between iterations.
pub struct WorkerPool<T> {
    slots: Vec<Mutex<Option<T>>>,
    exemplar: T,
}

impl<T: Clone> WorkerPool<T> {
    pub fn new(exemplar: T, num_workers: usize) -> Self {
        let mut slots = Vec::with_capacity(num_workers + 1);
        for _ in 0..num_workers + 1 {
            slots.push(Mutex::new(None));
        }
        Self { slots, exemplar }
    }

    fn slot_index(&self) -> usize {
        match rayon::current_thread_index() {
            Some(i) if i + 1 < self.slots.len() => i + 1,
            _ => 0,
        }
    }

    /// Run `f` on the calling worker's instance, cloning the exemplar on
    /// first touch.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut slot = self.slots[self.slot_index()].lock().unwrap();
        let value = slot.get_or_insert_with(|| self.exemplar.clone());
        f(value)
    }

    /// Visit every instantiated slot. Controller-side only.
    pub fn for_each(&self, mut f: impl FnMut(&mut T)) {
        for slot in &self.slots {
            if let Some(value) = slot.lock().unwrap().as_mut() {
                f(value);
            }
        }
    }

    /// Apply `f` to the exemplar and every instantiated slot, so instances
    /// created later pick the change up too.
    pub fn update_all(&mut self, f: impl Fn(&mut T)) {
        f(&mut self.exemplar);
        self.for_each(|value| f(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazily_instantiates_from_exemplar() {
        let pool = WorkerPool::new(7u32, 2);
        assert_eq!(pool.with(|v| *v), 7);
        pool.with(|v| *v += 1);
        assert_eq!(pool.with(|v| *v), 8);
    }

    #[test]
    fn for_each_skips_untouched_slots() {
        let pool = WorkerPool::new(0u32, 4);
        pool.with(|v| *v = 5);
        let mut seen = Vec::new();
        pool.for_each(|v| seen.push(*v));
        assert_eq!(seen, vec![5]);
    }

    #[test]
    fn update_all_reaches_future_instances() {
        let mut pool = WorkerPool::new(1u32, 2);
        pool.update_all(|v| *v = 9);
        assert_eq!(pool.with(|v| *v), 9);
    }

    #[test]
    fn workers_get_distinct_slots() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let store = WorkerPool::new(0usize, 2);
        pool.install(|| {
            rayon::join(
                || store.with(|v| *v += 1),
                || store.with(|v| *v += 1),
            );
        });
        let mut total = 0;
        store.for_each(|v| total += *v);
        assert_eq!(total, 2);
    }
}
