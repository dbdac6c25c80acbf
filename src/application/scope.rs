// ============================================================
// Layer 2 — Scope Resolution
// ============================================================
// Expands the team / subject / algorithm selection given on
// the command line into the list of units a batch will run.
// One unit is one (team, subject, algorithm) triple.

use std::fmt;

use anyhow::{bail, Context, Result};

use crate::domain::{algorithm::Algorithm, traits::ArticleSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub team:      String,
    pub subject:   String,
    pub algorithm: Algorithm,
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.team, self.subject, self.algorithm)
    }
}

/// No team means every team; no subject means every subject of each
/// selected team. Naming a team or subject that does not exist is an
/// error, while a team with no subjects only logs a warning.
pub fn resolve_units(
    source:     &dyn ArticleSource,
    team:       Option<&str>,
    subject:    Option<&str>,
    algorithms: &[Algorithm],
) -> Result<Vec<WorkUnit>> {
    if algorithms.is_empty() {
        bail!("no algorithms selected");
    }

    let all_teams = source.teams().context("listing teams")?;
    let teams = match team {
        Some(t) if all_teams.iter().any(|x| x == t) => vec![t.to_string()],
        Some(t) => bail!("unknown team '{t}'"),
        None => all_teams,
    };

    let mut units = Vec::new();
    for team in teams {
        let all_subjects = source
            .subjects(&team)
            .with_context(|| format!("listing subjects of team '{team}'"))?;
        let subjects = match subject {
            Some(s) if all_subjects.iter().any(|x| x == s) => vec![s.to_string()],
            Some(s) => bail!("team '{team}' has no subject '{s}'"),
            None => all_subjects,
        };
        if subjects.is_empty() {
            tracing::warn!("Team '{}' has no subjects, skipping", team);
        }
        for subject in subjects {
            for &algorithm in algorithms {
                units.push(WorkUnit { team: team.clone(), subject: subject.clone(), algorithm });
            }
        }
    }
    Ok(units)
}
