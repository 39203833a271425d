//! Shared fixtures and stub samplers for pms-core integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ndarray::arr2;
use pms_config::{McmcSettings, PriorSettings};
use pms_core::inference::{
    InferenceError, MetropolisSampler, PosteriorDraws, PosteriorRequest, PosteriorSampler,
};
use pms_core::model::{Observations, PriorData};

pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// The 3x2 chain with all new tests aimed at trace (2, 0).
pub fn scenario_eight_observations() -> Observations {
    Observations::new(
        arr2(&[[6, 11], [12, 6], [2, 13]]),
        arr2(&[[3, 0], [6, 0], [0, 0]]),
    )
    .expect("valid observations")
}

pub fn fast_metropolis(num_post_samples: usize) -> MetropolisSampler {
    MetropolisSampler::new(
        McmcSettings {
            num_post_samples,
            burn_in: 200,
            thin: 1,
            step_size: 0.6,
            min_acceptance: 0.01,
        },
        PriorSettings::default(),
    )
}

/// Prior data for scenario eight with current-belief draws from `sampler`.
pub fn scenario_eight_prior(sampler: &dyn PosteriorSampler) -> PriorData {
    let obs = scenario_eight_observations();
    let request = PosteriorRequest {
        n: obs.n(),
        y: obs.y(),
        sens: 1.0,
        spec: 1.0,
        seed: 2024,
        deadline: None,
    };
    let draws = sampler.sample(&request).expect("prior draws");
    PriorData::new(obs, 1.0, 1.0, None, draws).expect("prior data")
}

/// Deterministic function of the counts it is given: each rate is set to
/// the smoothed overall positive share, jittered per draw.
pub struct CountingSampler {
    pub num_draws: usize,
}

impl PosteriorSampler for CountingSampler {
    fn name(&self) -> &str {
        "counting"
    }

    fn sample(&self, request: &PosteriorRequest<'_>) -> Result<PosteriorDraws, InferenceError> {
        let width = request.num_rates();
        let p = (request.y.sum() as f64 + 1.0) / (request.n.sum() as f64 + 2.0);
        let rows: Vec<Vec<f64>> = (0..self.num_draws)
            .map(|d| {
                let shift = 0.5 + d as f64 / (2.0 * self.num_draws as f64);
                (0..width).map(|k| p * shift * (1.0 + k as f64) / width as f64).collect()
            })
            .collect();
        PosteriorDraws::from_rows(&rows)
    }
}

/// Always fails.
pub struct FailingSampler;

impl PosteriorSampler for FailingSampler {
    fn name(&self) -> &str {
        "failing"
    }

    fn sample(&self, _request: &PosteriorRequest<'_>) -> Result<PosteriorDraws, InferenceError> {
        Err(InferenceError::NonConvergence {
            acceptance: 0.0,
            minimum: 0.01,
        })
    }
}

/// Fails the first `failures` calls, then delegates.
pub struct FailFirst<S> {
    pub failures: usize,
    pub calls: AtomicUsize,
    pub inner: S,
}

impl<S: PosteriorSampler> PosteriorSampler for FailFirst<S> {
    fn name(&self) -> &str {
        "fail-first"
    }

    fn sample(&self, request: &PosteriorRequest<'_>) -> Result<PosteriorDraws, InferenceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(InferenceError::Engine("injected failure".to_string()));
        }
        self.inner.sample(request)
    }
}

/// Sleeps past any reasonable deadline and ignores it.
pub struct SleepySampler {
    pub nap: Duration,
}

impl PosteriorSampler for SleepySampler {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn sample(&self, request: &PosteriorRequest<'_>) -> Result<PosteriorDraws, InferenceError> {
        std::thread::sleep(self.nap);
        CountingSampler { num_draws: 4 }.sample(request)
    }
}
