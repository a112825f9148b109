//! Named tensor store shared by the operators of a graph run.

use std::collections::HashMap;

use kiln_core::{Device, Tensor};

/// Owns every tensor of a run, addressed by name.
#[derive(Debug, Default)]
pub struct Workspace {
    tensors: HashMap<String, Tensor>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `tensor` under `name`, returning the tensor it replaces.
    pub fn feed(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name.into(), tensor)
    }

    pub fn fetch(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        self.tensors.remove(name)
    }

    /// Move a tensor out for writing. A missing tensor, or one living on
    /// another device, is replaced by an empty tensor on `device`.
    pub fn take_output(&mut self, name: &str, device: Device) -> Tensor {
        match self.tensors.remove(name) {
            Some(t) if t.device() == device => t,
            _ => Tensor::empty(device),
        }
    }

    /// Names of all stored tensors, sorted.
    pub fn tensor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tensors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn clear(&mut self) {
        self.tensors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_fetch_remove() {
        let mut ws = Workspace::new();
        assert!(ws.feed("b", Tensor::from_f32(&[1.0], &[1])).is_none());
        ws.feed("a", Tensor::from_f32(&[2.0], &[1]));
        assert!(ws.feed("a", Tensor::from_f32(&[3.0], &[1])).is_some());

        assert_eq!(ws.tensor_names(), vec!["a", "b"]);
        assert_eq!(ws.fetch("a").unwrap().data::<f32>().unwrap(), &[3.0]);
        assert!(ws.has("b"));
        assert!(ws.remove("b").is_some());
        assert!(!ws.has("b"));
        assert_eq!(ws.len(), 1);
    }

    #[test]
    fn test_take_output() {
        let mut ws = Workspace::new();
        ws.feed("y", Tensor::from_f32(&[1.0, 2.0], &[2]));
        let y = ws.take_output("y", Device::Cpu);
        assert!(y.is_allocated());
        assert!(!ws.has("y"));

        let fresh = ws.take_output("z", Device::Cpu);
        assert!(!fresh.is_allocated());

        ws.feed("y", y);
        let moved = ws.take_output("y", Device::Cuda(0));
        assert_eq!(moved.device(), Device::Cuda(0));
        assert!(!moved.is_allocated());
    }
}
