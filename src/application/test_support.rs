//! Fixtures shared by the use-case tests.

use std::{fs, path::Path};

use chrono::{Duration, Utc};

use crate::data::loader::ARTICLES_FILE;
use crate::domain::{
    algorithm::Algorithm,
    article::ArticleRow,
    error::PipelineResult,
    traits::{TextClassifier, TrainerFactory},
};
use crate::ml::{
    gbdt::GbdtParams,
    gbdt_trainer::GbdtTrainer,
    tfidf::TfidfParams,
};

const RELEVANT: [&str; 5] = [
    "Ocrelizumab reduced annualized relapse rate in relapsing multiple sclerosis patients over two years of follow up",
    "Multiple sclerosis lesion activity on brain MRI decreased after anti CD20 antibody therapy in a phase three trial",
    "Serum neurofilament light chain predicts relapse and disability progression in early multiple sclerosis cohorts",
    "Natalizumab extended interval dosing preserved efficacy against relapses and new MRI lesions in multiple sclerosis",
    "Remyelination therapy candidate improved visual evoked potential latency in chronic multiple sclerosis optic neuritis",
];

const OTHER: [&str; 5] = [
    "Hospital parking garage on the north campus will close for resurfacing work during the first two weeks of June",
    "Cafeteria menu adds vegetarian lunch options and extended opening hours for night shift staff starting next month",
    "Annual staff picnic moved to the riverside park pavilion with games music and food trucks for families",
    "New visitor badge printers installed at every main entrance lobby to shorten check in queues on weekdays",
    "Facilities team schedules elevator maintenance in building C so staff should use stairs or the east elevators",
];

/// `positives` + `negatives` annotated rows and `unlabeled` pool rows,
/// all discovered yesterday so every lookback window includes them.
pub struct Corpus {
    positives: usize,
    negatives: usize,
    unlabeled: usize,
}

impl Corpus {
    pub fn new(positives: usize, negatives: usize, unlabeled: usize) -> Self {
        Self { positives, negatives, unlabeled }
    }

    pub fn rows(&self) -> Vec<ArticleRow> {
        let date = Utc::now() - Duration::days(1);
        let row = |id: u64, text: &str, label: Option<bool>| ArticleRow {
            id,
            title: format!("Report {id}"),
            summary: Some(text.to_string()),
            discovery_date: date,
            label,
        };

        let mut rows = Vec::new();
        for i in 0..self.positives {
            rows.push(row(i as u64 + 1, RELEVANT[i % RELEVANT.len()], Some(true)));
        }
        for i in 0..self.negatives {
            rows.push(row(i as u64 + 101, OTHER[i % OTHER.len()], Some(false)));
        }
        for i in 0..self.unlabeled {
            let text = if i % 2 == 0 { RELEVANT[i % RELEVANT.len()] } else { OTHER[i % OTHER.len()] };
            rows.push(row(i as u64 + 1001, text, None));
        }
        rows
    }
}

pub fn write_subject(data_dir: &Path, team: &str, subject: &str, rows: &[ArticleRow]) {
    let dir = data_dir.join(team).join(subject);
    fs::create_dir_all(&dir).unwrap();
    let body: Vec<String> = rows.iter().map(|r| serde_json::to_string(r).unwrap()).collect();
    fs::write(dir.join(ARTICLES_FILE), body.join("\n") + "\n").unwrap();
}

/// GBDT trainers sized for a handful of rows.
pub fn gbdt_factory() -> Box<dyn TrainerFactory> {
    Box::new(|_: Algorithm| -> PipelineResult<Box<dyn TextClassifier>> {
        let gbdt = GbdtParams { num_rounds: 20, learning_rate: 0.3, min_data_in_leaf: 1, ..GbdtParams::default() };
        Ok(Box::new(GbdtTrainer::new(TfidfParams::default(), gbdt, 69)))
    })
}
