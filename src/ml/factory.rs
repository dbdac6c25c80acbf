use crate::domain::{
    algorithm::Algorithm,
    error::PipelineResult,
    traits::{TextClassifier, TrainerFactory},
};
use crate::ml::{
    gbdt_trainer::GbdtTrainer,
    params::TrainerParams,
    recurrent_trainer::RecurrentTrainer,
    transformer_trainer::TransformerTrainer,
};

/// Creates untrained classifiers configured from one `TrainerParams`.
#[derive(Debug, Clone, Default)]
pub struct DefaultTrainerFactory {
    pub params: TrainerParams,
}

impl DefaultTrainerFactory {
    pub fn new(params: TrainerParams) -> Self {
        Self { params }
    }
}

impl TrainerFactory for DefaultTrainerFactory {
    fn create(&self, algorithm: Algorithm) -> PipelineResult<Box<dyn TextClassifier>> {
        let p = &self.params;
        Ok(match algorithm {
            Algorithm::Transformer => Box::new(TransformerTrainer::new(p.transformer.clone(), p.seed)),
            Algorithm::Recurrent   => Box::new(RecurrentTrainer::new(p.recurrent.clone(), p.seed)),
            Algorithm::GbdtTfidf   => Box::new(GbdtTrainer::new(p.tfidf.clone(), p.gbdt.clone(), p.seed)),
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_matching_family() {
        let factory = DefaultTrainerFactory::default();
        for algo in Algorithm::ALL {
            assert_eq!(factory.create(algo).unwrap().algorithm(), algo);
        }
    }

    #[test]
    fn test_hyperparameters_carry_seed() {
        let mut params = TrainerParams::default();
        params.seed = 7;
        let t = DefaultTrainerFactory::new(params).create(Algorithm::GbdtTfidf).unwrap();
        assert_eq!(t.hyperparameters()["seed"], 7);
        assert_eq!(t.hyperparameters()["gbdt"]["num_leaves"], 31);
    }
}
