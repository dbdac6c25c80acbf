// ============================================================
// Layer 5 — Neural Training Loop
// ============================================================
// One train + validation loop shared by the transformer and
// LSTM trainers, using Burn's DataLoader and Adam.
//
//   - Training runs on TrainBackend (Autodiff<NdArray>)
//   - model.valid() gives the same model on InferBackend with
//     dropout disabled; validation and prediction use that
//   - After every epoch the validation loss feeds EarlyStopping;
//     the best epoch's weights are what fit() returns
//
// Weights are written with NamedMpkFileRecorder at full
// precision so a save/load round trip reproduces predictions
// exactly.

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::activation::softmax,
};

use crate::data::{
    batcher::TextBatcher,
    dataset::{TextDataset, TextSample},
};
use crate::domain::{
    error::{PipelineError, PipelineResult},
    report::{EpochRecord, TrainingHistory},
};
use crate::infra::metrics::{EarlyStopping, Observation};

pub type TrainBackend = Autodiff<NdArray>;
pub type InferBackend = NdArray;

pub fn device() -> NdArrayDevice {
    NdArrayDevice::default()
}

/// Seed parameter initialisation, dropout masks and shuffling.
pub fn seed_backend(seed: u64) {
    TrainBackend::seed(seed);
}

/// A model mapping padded token ids to two class logits.
pub trait SequenceClassifier<B: Backend>: Module<B> {
    fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2>;
}

/// Mean over the sequence axis counting only unmasked positions.
/// x: [batch, seq_len, d], mask: [batch, seq_len] → [batch, d]
pub fn masked_mean<B: Backend>(x: Tensor<B, 3>, mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
    let [batch, seq_len, d] = x.dims();
    let weights = mask.float().reshape([batch, seq_len, 1]);
    let summed  = (x * weights.clone().expand([batch, seq_len, d]))
        .sum_dim(1)
        .reshape([batch, d]);
    let counts  = weights.sum_dim(1).reshape([batch, 1]).clamp_min(1.0);
    summed / counts.expand([batch, d])
}

/// Rejects empty or whitespace-only texts.
///
/// The neural trainers would fail later in the tokenizer, but the
/// TF-IDF path turns a blank text into an all-zero row and happily
/// scores it at the base rate, so every trainer checks up front.
pub fn check_texts(texts: &[String]) -> PipelineResult<()> {
    match texts.iter().position(|t| t.trim().is_empty()) {
        Some(i) => Err(PipelineError::data(format!("text {i} is empty"))),
        None => Ok(()),
    }
}

/// Shape and content checks every trainer runs before fitting.
pub fn check_inputs(
    train_texts:  &[String],
    train_labels: &[bool],
    val_texts:    &[String],
    val_labels:   &[bool],
) -> PipelineResult<()> {
    if train_texts.len() != train_labels.len() || val_texts.len() != val_labels.len() {
        return Err(PipelineError::data(format!(
            "texts/labels length mismatch: train {}/{}, validation {}/{}",
            train_texts.len(), train_labels.len(), val_texts.len(), val_labels.len()
        )));
    }
    if train_texts.is_empty() {
        return Err(PipelineError::data("training set is empty"));
    }
    if val_texts.is_empty() {
        return Err(PipelineError::data("validation set is empty"));
    }
    check_texts(train_texts)?;
    check_texts(val_texts)
}

#[derive(Debug, Clone)]
pub struct FitConfig {
    pub epochs:        usize,
    pub batch_size:    usize,
    pub learning_rate: f64,
    pub patience:      usize,
    pub seed:          u64,
}

/// Train `model`, returning the best-validation-loss weights on the
/// inference backend together with the per-epoch history.
pub fn fit<M>(
    mut model: M,
    train:     TextDataset,
    val:       TextDataset,
    cfg:       &FitConfig,
) -> PipelineResult<(M::InnerModule, TrainingHistory)>
where
    M: SequenceClassifier<TrainBackend> + AutodiffModule<TrainBackend>,
    M::InnerModule: SequenceClassifier<InferBackend>,
{
    if train.len() == 0 {
        return Err(PipelineError::data("training set is empty"));
    }
    if val.len() == 0 {
        return Err(PipelineError::data("validation set is empty"));
    }

    let device     = device();
    let started    = Instant::now();
    let batch_size = cfg.batch_size.max(1);

    // ── Adam optimiser ────────────────────────────────────────────────────────
    let mut optim = AdamConfig::new().with_epsilon(1e-8).init();

    // ── Data loaders ──────────────────────────────────────────────────────────
    let train_loader = DataLoaderBuilder::new(TextBatcher::<TrainBackend>::new(device.clone()))
        .batch_size(batch_size)
        .shuffle(cfg.seed)
        .build(train);
    let val_loader = DataLoaderBuilder::new(TextBatcher::<InferBackend>::new(device.clone()))
        .batch_size(batch_size)
        .build(val);

    let mut stopper = EarlyStopping::new(cfg.patience);
    let mut best: Option<M::InnerModule> = None;
    let mut history = TrainingHistory::default();

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.epochs {

        // ── Training phase ────────────────────────────────────────────────────
        let mut train_loss_sum = 0.0f64;
        let mut train_batches  = 0usize;

        for batch in train_loader.iter() {
            let logits = model.forward(batch.input_ids, batch.attention_mask);
            let loss   = CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits, batch.labels);

            train_loss_sum += loss.clone().into_scalar().elem::<f64>();
            train_batches  += 1;

            // backward() walks the tape; from_grads keys them by parameter id
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.learning_rate, model, grads);
        }
        let train_loss = train_loss_sum / train_batches.max(1) as f64;

        // ── Validation phase (dropout off) ────────────────────────────────────
        // model.valid() strips the autodiff wrapper: same weights, no
        // gradient tape, dropout layers become identity. This copy is
        // also what gets kept as `best`, so the returned model is
        // already on InferBackend.
        let model_valid = model.valid();

        let mut val_loss_sum = 0.0f64;
        let mut val_batches  = 0usize;
        let mut correct      = 0usize;
        let mut seen         = 0usize;

        for batch in val_loader.iter() {
            let logits = model_valid.forward(batch.input_ids, batch.attention_mask);
            let loss   = CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits.clone(), batch.labels.clone());
            val_loss_sum += loss.into_scalar().elem::<f64>();
            val_batches  += 1;

            // argmax(1) returns [batch, 1]
            seen    += batch.labels.dims()[0];
            correct += logits
                .argmax(1)
                .flatten::<1>(0, 1)
                .equal(batch.labels)
                .int()
                .sum()
                .into_scalar()
                .elem::<i64>() as usize;
        }
        let val_loss     = val_loss_sum / val_batches.max(1) as f64;
        let val_accuracy = correct as f64 / seen.max(1) as f64;

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | val_acc={:.1}%",
            epoch, cfg.epochs, train_loss, val_loss, val_accuracy * 100.0,
        );
        history.epochs.push(EpochRecord { epoch, train_loss, val_loss, val_accuracy });

        match stopper.observe(epoch, val_loss) {
            Observation::Improved      => best = Some(model_valid),
            Observation::NoImprovement => {}
            Observation::Stop => {
                tracing::info!(
                    "Early stopping at epoch {}; restoring epoch {} (val_loss={:.4})",
                    epoch, stopper.best_epoch(), stopper.best_loss(),
                );
                history.stopped_early = true;
                break;
            }
        }
    }

    history.best_epoch       = stopper.best_epoch();
    history.training_seconds = started.elapsed().as_secs_f64();

    let best = best.unwrap_or_else(|| model.valid());
    Ok((best, history))
}

/// Positive-class probability for each encoded text, in input order.
pub fn predict_probabilities<M>(model: &M, encoded: &[Vec<u32>], batch_size: usize) -> PipelineResult<Vec<f32>>
where
    M: SequenceClassifier<InferBackend>,
{
    let batcher = TextBatcher::<InferBackend>::new(device());
    let mut out = Vec::with_capacity(encoded.len());

    for chunk in encoded.chunks(batch_size.max(1)) {
        let n = chunk.len();
        let items = chunk
            .iter()
            .map(|ids| TextSample { input_ids: ids.clone(), label: 0 })
            .collect();
        let batch  = batcher.batch(items);
        let logits = model.forward(batch.input_ids, batch.attention_mask);
        // Column 1 of the softmax is P(relevant): [n, 2] → [n, 1] → [n]
        let probs  = softmax(logits, 1).slice([0..n, 1..2]).reshape([n]);
        let values = probs
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| PipelineError::Backend(format!("cannot read probabilities: {e:?}")))?;
        out.extend(values);
    }
    Ok(out)
}

// ─── Weights on disk ──────────────────────────────────────────────────────────

/// Write `<stem>.mpk` and return its path.
pub fn save_weights<B: Backend, M: Module<B>>(model: &M, stem: &Path) -> PipelineResult<PathBuf> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
        .record(model.clone().into_record(), stem.to_path_buf())
        .map_err(|e| PipelineError::Backend(format!("cannot save weights to '{}': {e:?}", stem.display())))?;
    Ok(stem.with_extension("mpk"))
}

/// Load `<stem>.mpk` into a freshly initialised `model`.
pub fn load_weights<B: Backend, M: Module<B>>(model: M, stem: &Path, device: &B::Device) -> PipelineResult<M> {
    let file = stem.with_extension("mpk");
    if !file.is_file() {
        return Err(PipelineError::model_load(file));
    }
    let record = NamedMpkFileRecorder::<FullPrecisionSettings>::new()
        .load(stem.to_path_buf(), device)
        .map_err(|e| {
            tracing::error!("Cannot decode weights '{}': {:?}", file.display(), e);
            PipelineError::model_load(file.clone())
        })?;
    Ok(model.load_record(record))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;

    #[test]
    fn test_masked_mean_ignores_padding() {
        let device = device();
        // batch 1, seq 3, d 2; last position is padding
        let x = Tensor::<InferBackend, 3>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0, 100.0, 100.0], [1, 3, 2]), &device,
        );
        let mask = Tensor::<InferBackend, 2, Int>::from_data(TensorData::new(vec![1i64, 1, 0], [1, 3]), &device);
        let out: Vec<f32> = masked_mean(x, mask).into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(out, vec![2.0, 3.0]);
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_check_inputs_rejects_blank_text() {
        let good = texts(&["sclerosis cohort", "parking permits"]);
        let bad  = texts(&["sclerosis cohort", " \t\n"]);
        let labels = [true, false];

        assert!(check_inputs(&good, &labels, &good, &labels).is_ok());
        let err = check_inputs(&bad, &labels, &good, &labels).unwrap_err();
        assert!(matches!(err, PipelineError::Data(ref m) if m.contains("text 1")));
        let err = check_inputs(&good, &labels, &texts(&["", "x"]), &labels).unwrap_err();
        assert!(matches!(err, PipelineError::Data(_)));
    }
}
