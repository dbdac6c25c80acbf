use burn::{
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{gelu, relu},
};

use crate::ml::trainer::{masked_mean, SequenceClassifier};

// #[derive(Config)] already provides Clone and serde impls.
#[derive(Config, Debug)]
pub struct TransformerClassifierConfig {
    pub vocab_size:  usize,
    pub max_seq_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    pub d_ff:        usize,
    pub dense_units: usize,
    pub dropout:     f64,
}

impl TransformerClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransformerClassifier<B> {
        let token_embedding    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device);
        let layers: Vec<EncoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.d_model).init(device);
        let dense      = LinearConfig::new(self.d_model, self.dense_units).init(device);
        let output     = LinearConfig::new(self.dense_units, 2).init(device);
        let dropout    = DropoutConfig::new(self.dropout).init();
        TransformerClassifier {
            token_embedding, position_embedding, layers,
            final_norm, dense, output, dropout,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `pad_mask` is true at padded positions, which attention ignores.
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let attn_output = self
            .self_attn
            .forward(MhaInput::self_attn(x.clone()).mask_pad(pad_mask))
            .context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(gelu(self.ffn_linear1.forward(x.clone())));
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

/// Encoder stack → masked mean pooling → dense head → 2 logits.
#[derive(Module, Debug)]
pub struct TransformerClassifier<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub dense:              Linear<B>,
    pub output:             Linear<B>,
    pub dropout:            Dropout,
}

impl<B: Backend> SequenceClassifier<B> for TransformerClassifier<B> {
    /// input_ids, attention_mask: [batch, seq_len] → logits: [batch, 2]
    fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let [batch_size, seq_len] = input_ids.dims();

        let tok_emb = self.token_embedding.forward(input_ids);

        // Self-attention is permutation-invariant, so position must be injected explicitly.
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &tok_emb.device())
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        let pad_mask = attention_mask.clone().equal_elem(0);
        let mut x = self.dropout.forward(tok_emb + pos_emb);
        for layer in &self.layers {
            x = layer.forward(x, pad_mask.clone());
        }
        let x = self.final_norm.forward(x); // [batch, seq_len, d_model]

        let pooled = masked_mean(x, attention_mask);
        let hidden = relu(self.dense.forward(self.dropout.forward(pooled)));
        self.output.forward(self.dropout.forward(hidden))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    #[test]
    fn test_forward_shape_with_padding() {
        let device = Default::default();
        let cfg = TransformerClassifierConfig::new(20, 8, 16, 2, 1, 32, 8, 0.0);
        let model: TransformerClassifier<NdArray> = cfg.init(&device);

        let ids  = Tensor::<NdArray, 2, Int>::from_data(TensorData::new(vec![3i64, 4, 5, 6, 0, 0], [2, 3]), &device);
        let mask = Tensor::<NdArray, 2, Int>::from_data(TensorData::new(vec![1i64, 1, 1, 1, 0, 0], [2, 3]), &device);
        let logits = model.forward(ids, mask);
        assert_eq!(logits.dims(), [2, 2]);
    }
}
