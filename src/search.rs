use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::SearchConfig;
use crate::reference::ReferenceProvider;
use crate::store::{ElementSymbol, Project, SampleKind};
use crate::{CorrectionError, Result};

/// Best blank/scale pair found for one element, with how many reference
/// readings it brings inside the acceptance window.
#[derive(Clone, Debug)]
pub struct ElementSearch {
    pub element: ElementSymbol,
    pub blank: f64,
    pub scale: f64,
    pub passed: usize,
    pub total: usize,
}

#[derive(Clone, Debug, Default)]
pub struct SearchOutcome {
    pub elements: Vec<ElementSearch>,
    /// Elements with no certified-reference reading to score against.
    pub skipped: Vec<ElementSymbol>,
}

/// Search for the blank/scale pair that maximises the number of
/// certified-reference readings landing inside the configured
/// relative-difference window after `(measured - blank) * scale`.
///
/// The objective counts passing readings, so it is a step function with no
/// useful gradient; a differential-evolution population search over the
/// bounded (blank, scale) plane handles it well. The search never mutates
/// the project; feed the winning pair to
/// [`apply_manual_blank_scale`](crate::blank_scale::apply_manual_blank_scale)
/// to commit it.
///
/// # Errors
/// Fails when no element has a scoreable reference reading, or when `token`
/// is cancelled between generations.
pub fn search_blank_scale<P: ReferenceProvider>(
    project: &Project,
    reference: &P,
    config: &SearchConfig,
    token: &CancelToken,
) -> Result<SearchOutcome> {
    let mut rng = match config.seed {
        Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
        None => rand::rngs::StdRng::from_entropy(),
    };

    let mut outcome = SearchOutcome::default();
    for element in project.active_elements().map(|e| e.symbol.clone()).collect::<Vec<_>>() {
        token.checkpoint()?;

        let pairs = reference_pairs(project, &element, reference);
        if pairs.is_empty() {
            warn!(element = %element, "blank/scale search skipped element: no scoreable references");
            outcome.skipped.push(element);
            continue;
        }

        let best = evolve(&pairs, config, token, &mut rng)?;
        info!(
            element = %element,
            blank = best.0,
            scale = best.1,
            passed = best.2,
            total = pairs.len(),
            "blank/scale search finished"
        );
        outcome.elements.push(ElementSearch {
            element,
            blank: best.0,
            scale: best.1,
            passed: best.2,
            total: pairs.len(),
        });
    }

    if outcome.elements.is_empty() {
        return Err(CorrectionError::InsufficientData(
            "no element has certified-reference readings to search against".to_owned(),
        ));
    }
    Ok(outcome)
}

/// `(measured, certified)` pairs for the certified-reference samples of one
/// element. Certificates of zero are unusable as a relative-difference base.
fn reference_pairs<P: ReferenceProvider>(
    project: &Project,
    element: &ElementSymbol,
    reference: &P,
) -> Vec<(f64, f64)> {
    project
        .samples_of_kind(SampleKind::CertifiedReference)
        .filter_map(|sample| {
            let certified = reference.certified(&sample.label, &element.0)?;
            if certified == 0.0 {
                return None;
            }
            let measured = project
                .measurement_for(sample.id, element)?
                .concentration?;
            Some((measured, certified))
        })
        .collect()
}

fn fitness(pairs: &[(f64, f64)], blank: f64, scale: f64, config: &SearchConfig) -> usize {
    pairs
        .iter()
        .filter(|&&(measured, certified)| {
            let corrected = (measured - blank) * scale;
            let diff_percent = (corrected - certified) / certified * 100.0;
            diff_percent >= config.min_diff_percent && diff_percent <= config.max_diff_percent
        })
        .count()
}

/// Classic DE/rand/1/bin over the two-dimensional (blank, scale) box.
fn evolve<R: Rng>(
    pairs: &[(f64, f64)],
    config: &SearchConfig,
    token: &CancelToken,
    rng: &mut R,
) -> Result<(f64, f64, usize)> {
    // rand/1 mutation needs three donors distinct from the target.
    if config.population_size < 4 {
        return Err(CorrectionError::InsufficientData(
            "search population must hold at least four members".to_owned(),
        ));
    }

    let (blank_lo, blank_hi) = config.blank_bounds;
    let (scale_lo, scale_hi) = config.scale_bounds;

    let mut population: Vec<(f64, f64)> = (0..config.population_size)
        .map(|_| (rng.gen_range(blank_lo..=blank_hi), rng.gen_range(scale_lo..=scale_hi)))
        .collect();
    let mut scores: Vec<usize> = population
        .iter()
        .map(|&(blank, scale)| fitness(pairs, blank, scale, config))
        .collect();

    let indices: Vec<usize> = (0..config.population_size).collect();
    for _ in 0..config.max_iterations {
        token.checkpoint()?;

        for i in 0..config.population_size {
            let mut donors = indices
                .iter()
                .filter(|&&j| j != i)
                .copied()
                .collect::<Vec<_>>();
            donors.shuffle(rng);
            let (a, b, c) = (population[donors[0]], population[donors[1]], population[donors[2]]);

            let mutant_blank =
                (a.0 + config.mutation * (b.0 - c.0)).clamp(blank_lo, blank_hi);
            let mutant_scale =
                (a.1 + config.mutation * (b.1 - c.1)).clamp(scale_lo, scale_hi);

            let trial = (
                if rng.gen::<f64>() < config.crossover { mutant_blank } else { population[i].0 },
                if rng.gen::<f64>() < config.crossover { mutant_scale } else { population[i].1 },
            );

            let trial_score = fitness(pairs, trial.0, trial.1, config);
            if trial_score > scores[i] {
                population[i] = trial;
                scores[i] = trial_score;
            }
        }
    }

    let best = (0..scores.len())
        .max_by_key(|&i| scores[i])
        .ok_or_else(|| {
            CorrectionError::InsufficientData("search population is empty".to_owned())
        })?;
    Ok((population[best].0, population[best].1, scores[best]))
}
