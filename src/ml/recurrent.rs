use burn::{
    nn::{
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        Linear, LinearConfig,
        Lstm, LstmConfig,
    },
    prelude::*,
};

use crate::ml::trainer::{masked_mean, SequenceClassifier};

/// Architecture plus the truncation length, saved as `lstm_config.json`.
///
/// `sequence_length` travels with the weights: a reloaded model must
/// see inputs cut exactly where they were cut during training, no
/// matter what the loading trainer's own parameters say.
#[derive(Config, Debug)]
pub struct LstmClassifierConfig {
    pub vocab_size:    usize,
    pub embedding_dim: usize,
    pub hidden_units:  usize,
    pub dropout:       f64,
    #[config(default = 100)]
    pub sequence_length: usize,
}

impl LstmClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LstmClassifier<B> {
        LstmClassifier {
            embedding: EmbeddingConfig::new(self.vocab_size, self.embedding_dim).init(device),
            lstm:      LstmConfig::new(self.embedding_dim, self.hidden_units, true).init(device),
            output:    LinearConfig::new(self.hidden_units, 2).init(device),
            dropout:   DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Embedding → LSTM → masked mean over time → 2 logits.
///
/// Padding sits at the end of each row, so the LSTM reads every real
/// token before any padding and the pooling only averages real steps.
#[derive(Module, Debug)]
pub struct LstmClassifier<B: Backend> {
    pub embedding: Embedding<B>,
    pub lstm:      Lstm<B>,
    pub output:    Linear<B>,
    pub dropout:   Dropout,
}

impl<B: Backend> SequenceClassifier<B> for LstmClassifier<B> {
    fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let x = self.dropout.forward(self.embedding.forward(input_ids));
        let (hidden, _state) = self.lstm.forward(x, None); // [batch, seq_len, hidden]
        let pooled = masked_mean(hidden, attention_mask);
        self.output.forward(self.dropout.forward(pooled))
    }
}
