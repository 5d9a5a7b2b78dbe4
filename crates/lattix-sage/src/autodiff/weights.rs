use crate::tensor::{Shape, Tensor};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_WEIGHTS_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a [`Weights`] instance. Two instances never share an id,
/// even when their values are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeightsId(u64);

/// Trainable parameter tensor, shared by every batch that reads it.
///
/// Forward passes take a snapshot under a read lock; optimizer steps mutate
/// in place under the write lock. The shape never changes.
#[derive(Debug)]
pub struct Weights {
    id: WeightsId,
    shape: Shape,
    data: RwLock<Tensor>,
}

impl Weights {
    pub fn new(data: Tensor) -> Arc<Self> {
        Arc::new(Self {
            id: WeightsId(NEXT_WEIGHTS_ID.fetch_add(1, Ordering::Relaxed)),
            shape: data.shape(),
            data: RwLock::new(data),
        })
    }

    pub fn id(&self) -> WeightsId {
        self.id
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Copy of the current values.
    pub fn snapshot(&self) -> Tensor {
        self.data.read().clone()
    }

    /// Mutate the values in place under the write lock.
    ///
    /// The closure must not change the tensor's shape.
    pub fn update<R>(&self, f: impl FnOnce(&mut Tensor) -> R) -> R {
        let mut guard = self.data.write();
        let out = f(&mut guard);
        assert_eq!(guard.shape(), self.shape, "weights shape changed during update");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_not_value() {
        let a = Weights::new(Tensor::zeros(Shape::Vector(2)));
        let b = Weights::new(Tensor::zeros(Shape::Vector(2)));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn test_update_in_place() {
        let w = Weights::new(Tensor::vector(vec![1.0, 2.0]));
        w.update(|t| t.data_mut()[1] = 5.0);
        assert_eq!(w.snapshot().data(), &[1.0, 5.0]);
    }
}
