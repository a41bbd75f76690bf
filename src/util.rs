use std::hash::{Hash, Hasher};
use std::{collections::hash_map::DefaultHasher, ops::Range};

pub fn get_decay_factor(t_diff: f32, tau: f32) -> f32 {
    (-t_diff / tau).exp()
}

pub fn calculate_hash<T: Hash>(t: &T) -> u64 {
    let mut s = DefaultHasher::new();
    t.hash(&mut s);
    s.finish()
}

pub fn in_window(t: usize, window: &Range<usize>) -> bool {
    t >= window.start && t < window.end
}

pub fn ms_to_seconds(num_time_steps: usize, ms_per_time_step: f32) -> f32 {
    num_time_steps as f32 * ms_per_time_step / 1000.0
}
