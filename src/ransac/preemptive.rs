//! Preemptive RANSAC: a breadth-first elimination tournament over pose
//! hypotheses.
//!
//! Every surviving candidate is scored against the same growing evidence set;
//! after each round the worse half is eliminated, so the per-round cost
//! shrinks as the evidence grows. Candidates keep their full inlier history
//! across rounds, which also feeds the per-round pose refinement.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::{PreemptiveRansacConfig, RefinerConfig};
use crate::forest::PredictionImage;
use crate::frame::FeatureImage;
use crate::ransac::candidate::{InlierSample, PoseCandidate};
use crate::ransac::energy::compute_pose_energy;
use crate::ransac::refinement::PoseRefiner;

/// Runs the elimination tournament and the per-round pose updates.
pub struct PreemptiveRansac {
    config: PreemptiveRansacConfig,
    refiner: PoseRefiner,
}

impl PreemptiveRansac {
    pub fn new(config: PreemptiveRansacConfig, refiner_config: RefinerConfig) -> Self {
        Self {
            config,
            refiner: PoseRefiner::new(refiner_config),
        }
    }

    /// Minimum number of valid-depth pixels a frame must offer before a
    /// relocalization attempt is worthwhile.
    pub fn min_required_valid_pixels(&self) -> usize {
        self.config.batch_size
    }

    /// Run the tournament over `candidates` and return the winner.
    ///
    /// Returns `Ok(None)` only for an empty pool; any non-empty pool yields a
    /// winner, however poor its energy.
    pub fn select(
        &self,
        features: &FeatureImage,
        predictions: &PredictionImage,
        mut candidates: Vec<PoseCandidate>,
    ) -> Result<Option<PoseCandidate>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut sampled = vec![false; features.len()];

        if candidates.len() > self.config.trim_after_first_scoring {
            self.pre_trim(features, predictions, &mut candidates, &mut rng)?;
        }

        let mut round = 0;
        while candidates.len() > 1 {
            let batch = self.sample_batch(features, predictions, &mut rng, &mut sampled);
            if batch.is_empty() {
                warn!(
                    survivors = candidates.len(),
                    "ran out of fresh evidence pixels, ending tournament early"
                );
                break;
            }

            self.score_round(features, predictions, &mut candidates, &batch)?;

            candidates.sort_by(|a, b| a.energy.total_cmp(&b.energy));
            candidates.truncate(candidates.len() / 2);
            round += 1;
            debug!(
                round,
                survivors = candidates.len(),
                best_energy = candidates[0].energy,
                "elimination round complete"
            );
        }

        candidates.sort_by(|a, b| a.energy.total_cmp(&b.energy));
        Ok(candidates.into_iter().next())
    }

    /// A pool larger than the trim threshold gets one throwaway scoring round
    /// first: score everyone on a single batch, keep the best
    /// `trim_after_first_scoring`, then shrink the inlier lists back to the
    /// minimal sets so the throwaway evidence does not bias the tournament.
    fn pre_trim(
        &self,
        features: &FeatureImage,
        predictions: &PredictionImage,
        candidates: &mut Vec<PoseCandidate>,
        rng: &mut StdRng,
    ) -> Result<()> {
        let minimal_set_size = candidates[0].inliers.len();

        // Local mask only: the throwaway pixels stay available to the
        // tournament proper.
        let mut scratch_mask = vec![false; features.len()];
        let batch = self.sample_batch(features, predictions, rng, &mut scratch_mask);

        self.score_round(features, predictions, candidates, &batch)?;

        candidates.sort_by(|a, b| a.energy.total_cmp(&b.energy));
        candidates.truncate(self.config.trim_after_first_scoring);
        for candidate in candidates.iter_mut() {
            candidate.inliers.truncate(minimal_set_size);
        }

        debug!(
            survivors = candidates.len(),
            "trimmed hypothesis pool after first scoring"
        );
        Ok(())
    }

    /// Extend every candidate with the batch, optionally re-optimize its
    /// pose, then re-score it over its whole inlier history.
    fn score_round(
        &self,
        features: &FeatureImage,
        predictions: &PredictionImage,
        candidates: &mut [PoseCandidate],
        batch: &[usize],
    ) -> Result<()> {
        candidates.par_iter_mut().try_for_each(|candidate| {
            candidate
                .inliers
                .extend(batch.iter().map(|&pixel| InlierSample::unscored(pixel)));
            if self.config.pose_update {
                self.refiner.refine(candidate, features, predictions)?;
            }
            candidate.energy = compute_pose_energy(
                &candidate.pose,
                &mut candidate.inliers,
                features,
                predictions,
            )?;
            Ok(())
        })
    }

    /// Draw one batch of previously-unsampled, usable pixels.
    ///
    /// Each batch slot has its own draw budget; the first slot that exhausts
    /// it ends the batch, so a frame running out of fresh pixels degrades
    /// into shorter batches instead of spinning.
    fn sample_batch(
        &self,
        features: &FeatureImage,
        predictions: &PredictionImage,
        rng: &mut StdRng,
        sampled: &mut [bool],
    ) -> Vec<usize> {
        if features.is_empty() {
            return Vec::new();
        }

        let mut batch = Vec::with_capacity(self.config.batch_size);
        'slots: for _ in 0..self.config.batch_size {
            for _ in 0..self.config.max_draws_per_slot {
                let pixel_idx = rng.gen_range(0..features.len());
                if sampled[pixel_idx]
                    || !features.get(pixel_idx).is_valid()
                    || predictions.get(pixel_idx).is_empty()
                {
                    continue;
                }
                sampled[pixel_idx] = true;
                batch.push(pixel_idx);
                continue 'slots;
            }
            warn!(
                filled = batch.len(),
                requested = self.config.batch_size,
                "batch slot exhausted its draw budget"
            );
            break;
        }
        batch
    }
}
