use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// A feature id with its value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Feature id in the model's feature alphabet
    pub id: u32,
    /// Value of the feature
    pub value: f64,
}

/// An item consists of the features firing on one token
pub type Item = Vec<Observation>;

/// An instance consists of a sequence of items and, when labeled, the
/// matching label ids
#[derive(Debug, Clone)]
pub struct Instance {
    /// Array of the item sequence
    pub items: Vec<Item>,
    /// Array of the label sequence, empty for unlabeled input
    pub labels: Vec<u32>,
    /// Instance weight
    pub weight: f64,
}

impl Observation {
    pub fn new(id: u32, value: f64) -> Self {
        Self { id, value }
    }
}

impl Instance {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            items: Vec::with_capacity(cap),
            labels: Vec::with_capacity(cap),
            weight: 1.0,
        }
    }

    /// Append a labeled item.
    pub fn push(&mut self, item: Item, label: u32) {
        self.items.push(item);
        self.labels.push(label);
    }

    /// Append an unlabeled item.
    pub fn push_item(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_labeled(&self) -> bool {
        !self.items.is_empty() && self.labels.len() == self.items.len()
    }
}

/// Randomly partition `len` instance indices into a training part holding
/// `proportion` of them and a testing part with the rest.
///
/// The shuffle is seeded, so the same arguments always give the same split.
pub fn split(len: usize, proportion: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let cut = ((len as f64) * proportion.clamp(0.0, 1.0)).round() as usize;
    let test = indices.split_off(cut.min(len));
    (indices, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_push() {
        let mut inst = Instance::with_capacity(2);
        assert!(inst.is_empty());
        inst.push(vec![Observation::new(0, 1.0)], 1);
        inst.push(vec![], 0);
        assert_eq!(inst.len(), 2);
        assert!(inst.is_labeled());

        let mut unlabeled = Instance::with_capacity(1);
        unlabeled.push_item(vec![Observation::new(3, 0.5)]);
        assert!(!unlabeled.is_labeled());
    }

    #[test]
    fn test_split_is_partition_and_reproducible() {
        let (train, test) = split(10, 0.7, 42);
        assert_eq!(train.len(), 7);
        assert_eq!(test.len(), 3);

        let mut all: Vec<usize> = train.iter().chain(test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());

        assert_eq!(split(10, 0.7, 42), (train, test));
    }

    #[test]
    fn test_split_extremes() {
        let (train, test) = split(4, 1.0, 0);
        assert_eq!((train.len(), test.len()), (4, 0));
        let (train, test) = split(4, 0.0, 0);
        assert_eq!((train.len(), test.len()), (0, 4));
    }
}
