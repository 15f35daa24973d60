//! Randomized check of the registry's eviction order against a simple model.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

use meshtun::FlowRegistry;

/// Recency model: front is least recently used.
struct Model {
    order: Vec<u16>,
    capacity: usize,
}

impl Model {
    fn touch(&mut self, key: u16) {
        self.order.retain(|k| *k != key);
        self.order.push(key);
    }

    fn put(&mut self, key: u16) -> Option<u16> {
        let existed = self.order.contains(&key);
        self.touch(key);
        if !existed && self.order.len() > self.capacity {
            return Some(self.order.remove(0));
        }
        None
    }
}

#[test]
fn test_eviction_matches_recency_model() {
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let capacity = rng.gen_range(1..16);
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = evicted.clone();

        let mut reg = FlowRegistry::new(capacity).unwrap();
        reg.attach_cleanup(move |k: u16, v: u16| {
            assert_eq!(k, v);
            sink.lock().unwrap().push(k);
        });
        let mut model = Model {
            order: Vec::new(),
            capacity,
        };
        let mut expected = Vec::new();

        for _ in 0..2000 {
            let key = rng.gen_range(0..32u16);
            if rng.gen_bool(0.6) {
                reg.put(key, key);
                expected.extend(model.put(key));
            } else if reg.get(&key).is_ok() {
                model.touch(key);
            } else {
                assert!(!model.order.contains(&key));
            }
            assert_eq!(reg.len(), model.order.len());
        }

        assert_eq!(*evicted.lock().unwrap(), expected, "seed {}", seed);
    }
}

#[test]
fn test_cleanup_fires_once_per_eviction() {
    let count = Arc::new(Mutex::new(0usize));
    let sink = count.clone();
    let mut reg = FlowRegistry::new(10).unwrap();
    reg.attach_cleanup(move |_k: u32, _v: ()| *sink.lock().unwrap() += 1);

    for k in 0..1000u32 {
        reg.put(k, ());
    }
    assert_eq!(*count.lock().unwrap(), 990);
    assert_eq!(reg.len(), 10);
}
