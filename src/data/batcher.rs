// ============================================================
// Layer 4 — Text Batcher
// ============================================================
// Implements Burn's Batcher trait: Vec<TextSample> in, one
// TextBatch of tensors out.
//
// Samples arrive unpadded. Each batch is padded to the longest
// sequence it contains (dynamic padding), with PAD_ID in the
// gaps and a 0 in the attention mask:
//
//   ids  [5, 9, 2]      →  [5, 9, 2]
//   ids  [7]            →  [7, 0, 0]   mask [1, 0, 0]
//
// The same batcher serves training (autodiff backend) and
// inference (inner backend); B decides which.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::dataset::TextSample;

pub const PAD_ID: u32 = 0;

// ─── TextBatch ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TextBatch<B: Backend> {
    /// [batch_size, seq_len]
    pub input_ids:      Tensor<B, 2, Int>,
    /// [batch_size, seq_len], 1 = real token, 0 = padding
    pub attention_mask: Tensor<B, 2, Int>,
    /// [batch_size]
    pub labels:         Tensor<B, 1, Int>,
}

// ─── TextBatcher ──────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct TextBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> TextBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<TextSample, TextBatch<B>> for TextBatcher<B> {
    fn batch(&self, items: Vec<TextSample>) -> TextBatch<B> {
        let batch_size = items.len();
        // An all-empty batch still gets one (padded) column so shapes stay valid.
        let seq_len = items.iter().map(|s| s.input_ids.len()).max().unwrap_or(0).max(1);

        let mut ids  = Vec::with_capacity(batch_size * seq_len);
        let mut mask = Vec::with_capacity(batch_size * seq_len);
        for sample in &items {
            let n = sample.input_ids.len();
            ids.extend(sample.input_ids.iter().map(|&t| t as i64));
            ids.extend(std::iter::repeat(PAD_ID as i64).take(seq_len - n));
            mask.extend(std::iter::repeat(1i64).take(n));
            mask.extend(std::iter::repeat(0i64).take(seq_len - n));
        }
        let labels: Vec<i64> = items.iter().map(|s| s.label as i64).collect();

        let input_ids = Tensor::<B, 2, Int>::from_data(
            TensorData::new(ids, [batch_size, seq_len]), &self.device,
        );
        let attention_mask = Tensor::<B, 2, Int>::from_data(
            TensorData::new(mask, [batch_size, seq_len]), &self.device,
        );
        let labels = Tensor::<B, 1, Int>::from_data(
            TensorData::new(labels, [batch_size]), &self.device,
        );

        TextBatch { input_ids, attention_mask, labels }
    }
}
