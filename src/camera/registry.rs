//! Ordered camera list with a positional current pointer

use super::CameraConfig;

/// Ordered cameras plus the index of the current one.
///
/// Invariant: when the list is non-empty, `current < cameras.len()`.
/// When it is empty no camera is current.
///
/// Selection is positional. Removing a camera that sits before the current
/// one shifts which camera is current; callers rely on this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraRegistry {
    cameras: Vec<CameraConfig>,
    current: usize,
}

impl CameraRegistry {
    /// Build a registry, repairing an out-of-range index
    pub fn new(cameras: Vec<CameraConfig>, current: usize) -> Self {
        let mut registry = Self { cameras, current };
        registry.clamp();
        registry
    }

    pub fn cameras(&self) -> &[CameraConfig] {
        &self.cameras
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Index of the current camera, `None` when the registry is empty
    pub fn current_index(&self) -> Option<usize> {
        (!self.cameras.is_empty()).then_some(self.current)
    }

    pub fn current(&self) -> Option<&CameraConfig> {
        self.cameras.get(self.current)
    }

    /// URL of the current camera
    pub fn current_url(&self) -> Option<&str> {
        self.current().map(|c| c.url.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.cameras.iter().position(|c| c.id == id)
    }

    /// Append a camera. The current index is left alone.
    pub fn add(&mut self, camera: CameraConfig) {
        self.cameras.push(camera);
    }

    /// Remove the camera with `id`, clamping the current index afterwards
    pub fn remove(&mut self, id: &str) -> Option<CameraConfig> {
        let pos = self.position(id)?;
        let removed = self.cameras.remove(pos);
        self.clamp();
        Some(removed)
    }

    /// Replace the camera with the same id. Returns false if it is unknown.
    pub fn update(&mut self, camera: CameraConfig) -> bool {
        match self.cameras.iter_mut().find(|c| c.id == camera.id) {
            Some(slot) => {
                *slot = camera;
                true
            }
            None => false,
        }
    }

    /// Make `index` current. Out-of-range indices are ignored.
    pub fn select(&mut self, index: usize) -> bool {
        if index < self.cameras.len() {
            self.current = index;
            true
        } else {
            false
        }
    }

    /// Step forward, wrapping around
    pub fn next(&mut self) {
        if self.cameras.len() > 1 {
            self.current = (self.current + 1) % self.cameras.len();
        }
    }

    /// Step backward, wrapping around
    pub fn previous(&mut self) {
        let len = self.cameras.len();
        if len > 1 {
            self.current = (self.current + len - 1) % len;
        }
    }

    /// Split back into the stored representation
    pub fn into_parts(self) -> (Vec<CameraConfig>, usize) {
        (self.cameras, self.current)
    }

    fn clamp(&mut self) {
        if self.cameras.is_empty() {
            self.current = 0;
        } else if self.current >= self.cameras.len() {
            self.current = self.cameras.len() - 1;
        }
    }
}
