use std::collections::HashMap;

/// Per-context cache of GPU-style object names, keyed by an opaque
/// application identity.
pub trait ResourceCache {
    /// Allocate a buffer object for `key`. `None` if one already exists.
    fn new_buffer_object(&mut self, key: u64) -> Option<u32>;
    fn buffer_object(&self, key: u64) -> Option<u32>;

    /// Allocate a display list for `key`. `None` if one already exists.
    fn new_display_list(&mut self, key: u64) -> Option<u32>;
    fn display_list(&self, key: u64) -> Option<u32>;

    /// Release everything. Called on context teardown.
    fn delete_all(&mut self);
}

/// In-memory [`ResourceCache`] handing out sequential names.
#[derive(Debug, Default)]
pub struct IdCache {
    next_name: u32,
    buffers: HashMap<u64, u32>,
    lists: HashMap<u64, u32>,
}

impl IdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffers.len() + self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn allocate(next_name: &mut u32, map: &mut HashMap<u64, u32>, key: u64) -> Option<u32> {
        if map.contains_key(&key) {
            return None;
        }
        *next_name += 1;
        map.insert(key, *next_name);
        Some(*next_name)
    }
}

impl ResourceCache for IdCache {
    fn new_buffer_object(&mut self, key: u64) -> Option<u32> {
        Self::allocate(&mut self.next_name, &mut self.buffers, key)
    }

    fn buffer_object(&self, key: u64) -> Option<u32> {
        self.buffers.get(&key).copied()
    }

    fn new_display_list(&mut self, key: u64) -> Option<u32> {
        Self::allocate(&mut self.next_name, &mut self.lists, key)
    }

    fn display_list(&self, key: u64) -> Option<u32> {
        self.lists.get(&key).copied()
    }

    fn delete_all(&mut self) {
        self.buffers.clear();
        self.lists.clear();
    }
}
