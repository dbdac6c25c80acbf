use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// One tokenised text. Ids are truncated but not padded;
/// the batcher pads each mini-batch to its own longest row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSample {
    pub input_ids: Vec<u32>,
    /// 1 = relevant, 0 = not relevant
    pub label:     u8,
}

pub struct TextDataset {
    samples: Vec<TextSample>,
}

impl TextDataset {
    pub fn new(samples: Vec<TextSample>) -> Self { Self { samples } }

    pub fn from_encoded(ids: Vec<Vec<u32>>, labels: &[bool]) -> Self {
        let samples = ids
            .into_iter()
            .zip(labels)
            .map(|(input_ids, &l)| TextSample { input_ids, label: l as u8 })
            .collect();
        Self { samples }
    }

    pub fn positives(&self) -> usize {
        self.samples.iter().filter(|s| s.label == 1).count()
    }
}

impl Dataset<TextSample> for TextDataset {
    fn get(&self, index: usize) -> Option<TextSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
