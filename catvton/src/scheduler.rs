use std::path::Path;

use anyhow::{Context, Result, bail};
use ndarray::{Array1, Array4, Zip};
use serde::Deserialize;

/// Subset of a diffusers `scheduler_config.json` that DDIM sampling needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub num_train_timesteps: usize,
    pub beta_start: f64,
    pub beta_end: f64,
    pub beta_schedule: String,
    pub set_alpha_to_one: bool,
    pub steps_offset: usize,
    pub prediction_type: String,
    pub timestep_spacing: String,
    pub clip_sample: bool,
    pub clip_sample_range: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_train_timesteps: 1000,
            beta_start: 0.00085,
            beta_end: 0.012,
            beta_schedule: "scaled_linear".to_string(),
            set_alpha_to_one: false,
            steps_offset: 1,
            prediction_type: "epsilon".to_string(),
            timestep_spacing: "leading".to_string(),
            clip_sample: false,
            clip_sample_range: 1.0,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open scheduler config at {:?}", path))?;
        serde_json::from_reader(file)
            .with_context(|| format!("Failed to parse scheduler config at {:?}", path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PredictionType {
    Epsilon,
    VPrediction,
}

/// Deterministic DDIM sampler (eta = 0).
#[derive(Debug, Clone)]
pub struct DdimScheduler {
    alphas_cumprod: Vec<f64>,
    final_alpha_cumprod: f64,
    timesteps: Vec<usize>,
    step_ratio: usize,
    prediction_type: PredictionType,
    config: SchedulerConfig,
}

impl DdimScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let n = config.num_train_timesteps;
        if n == 0 {
            bail!("num_train_timesteps must be positive");
        }

        let betas: Vec<f64> = match config.beta_schedule.as_str() {
            "linear" => Array1::linspace(config.beta_start, config.beta_end, n).to_vec(),
            "scaled_linear" => {
                Array1::linspace(config.beta_start.sqrt(), config.beta_end.sqrt(), n)
                    .mapv(|b| b * b)
                    .to_vec()
            }
            other => bail!("unsupported beta schedule: {other}"),
        };

        let mut alphas_cumprod = Vec::with_capacity(n);
        let mut acc = 1.0;
        for beta in betas {
            acc *= 1.0 - beta;
            alphas_cumprod.push(acc);
        }

        let final_alpha_cumprod = if config.set_alpha_to_one {
            1.0
        } else {
            alphas_cumprod[0]
        };

        let prediction_type = match config.prediction_type.as_str() {
            "epsilon" => PredictionType::Epsilon,
            "v_prediction" => PredictionType::VPrediction,
            other => bail!("unsupported prediction type: {other}"),
        };

        Ok(Self {
            alphas_cumprod,
            final_alpha_cumprod,
            timesteps: Vec::new(),
            step_ratio: 1,
            prediction_type,
            config,
        })
    }

    pub fn set_timesteps(&mut self, num_inference_steps: usize) -> Result<()> {
        let n = self.config.num_train_timesteps;
        if num_inference_steps == 0 || num_inference_steps > n {
            bail!("num_inference_steps must be in 1..={n}, got {num_inference_steps}");
        }

        self.step_ratio = n / num_inference_steps;
        let offset = self.config.steps_offset;
        self.timesteps = match self.config.timestep_spacing.as_str() {
            "leading" => (0..num_inference_steps)
                .rev()
                .map(|i| i * self.step_ratio + offset)
                .collect(),
            "trailing" => {
                let ratio = n as f64 / num_inference_steps as f64;
                let mut t = n as f64;
                let mut steps = Vec::with_capacity(num_inference_steps);
                while steps.len() < num_inference_steps {
                    steps.push((t.round() as usize).saturating_sub(1));
                    t -= ratio;
                }
                steps
            }
            "linspace" => Array1::linspace(0.0, (n - 1) as f64, num_inference_steps)
                .to_vec()
                .into_iter()
                .rev()
                .map(|t| t.round() as usize)
                .collect(),
            other => bail!("unsupported timestep spacing: {other}"),
        };
        // steps_offset can push the first timestep out of range
        for t in &mut self.timesteps {
            *t = (*t).min(n - 1);
        }

        Ok(())
    }

    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    pub fn init_noise_sigma(&self) -> f64 {
        1.0
    }

    pub fn scale_model_input(&self, sample: Array4<f32>, _timestep: usize) -> Array4<f32> {
        sample
    }

    /// One reverse step from `timestep` to the previous one.
    pub fn step(
        &self,
        model_output: &Array4<f32>,
        timestep: usize,
        sample: &Array4<f32>,
    ) -> Result<Array4<f32>> {
        if model_output.dim() != sample.dim() {
            bail!(
                "model output {:?} does not match sample {:?}",
                model_output.dim(),
                sample.dim()
            );
        }

        let alpha_prod_t = self.alphas_cumprod[timestep.min(self.alphas_cumprod.len() - 1)];
        let alpha_prod_t_prev = match timestep.checked_sub(self.step_ratio) {
            Some(prev) => self.alphas_cumprod[prev],
            None => self.final_alpha_cumprod,
        };
        let beta_prod_t = 1.0 - alpha_prod_t;

        let sqrt_alpha = alpha_prod_t.sqrt() as f32;
        let sqrt_beta = beta_prod_t.sqrt() as f32;
        let sqrt_alpha_prev = alpha_prod_t_prev.sqrt() as f32;
        let sqrt_beta_prev = (1.0 - alpha_prod_t_prev).sqrt() as f32;
        let clip = self.config.clip_sample.then_some(self.config.clip_sample_range);
        let prediction_type = self.prediction_type;

        let mut prev_sample = Array4::zeros(sample.dim());
        Zip::from(&mut prev_sample)
            .and(model_output)
            .and(sample)
            .for_each(|prev, &out, &x| {
                let (mut x0, eps) = match prediction_type {
                    PredictionType::Epsilon => ((x - sqrt_beta * out) / sqrt_alpha, out),
                    PredictionType::VPrediction => (
                        sqrt_alpha * x - sqrt_beta * out,
                        sqrt_alpha * out + sqrt_beta * x,
                    ),
                };
                if let Some(range) = clip {
                    x0 = x0.clamp(-range, range);
                }
                *prev = sqrt_alpha_prev * x0 + sqrt_beta_prev * eps;
            });

        Ok(prev_sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_timesteps() {
        let mut scheduler = DdimScheduler::new(SchedulerConfig::default()).unwrap();
        scheduler.set_timesteps(50).unwrap();
        let timesteps = scheduler.timesteps();
        assert_eq!(timesteps.len(), 50);
        assert_eq!(timesteps[0], 981);
        assert_eq!(timesteps[49], 1);
        assert!(timesteps.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_trailing_timesteps() {
        let config = SchedulerConfig {
            timestep_spacing: "trailing".to_string(),
            ..Default::default()
        };
        let mut scheduler = DdimScheduler::new(config).unwrap();
        scheduler.set_timesteps(10).unwrap();
        assert_eq!(scheduler.timesteps()[0], 999);
        assert_eq!(scheduler.timesteps().len(), 10);
    }

    #[test]
    fn test_linspace_timesteps() {
        let config = SchedulerConfig {
            timestep_spacing: "linspace".to_string(),
            ..Default::default()
        };
        let mut scheduler = DdimScheduler::new(config).unwrap();
        scheduler.set_timesteps(10).unwrap();
        assert_eq!(
            scheduler.timesteps(),
            &[999, 888, 777, 666, 555, 444, 333, 222, 111, 0]
        );

        scheduler.set_timesteps(1).unwrap();
        assert_eq!(scheduler.timesteps(), &[0]);
    }

    #[test]
    fn test_beta_schedule_endpoints() {
        for schedule in ["linear", "scaled_linear"] {
            let config = SchedulerConfig {
                beta_schedule: schedule.to_string(),
                ..Default::default()
            };
            let (beta_start, beta_end) = (config.beta_start, config.beta_end);
            let scheduler = DdimScheduler::new(config).unwrap();
            let a = &scheduler.alphas_cumprod;
            assert!((a[0] - (1.0 - beta_start)).abs() < 1e-12, "{schedule}");
            let last_beta = 1.0 - a[a.len() - 1] / a[a.len() - 2];
            assert!((last_beta - beta_end).abs() < 1e-9, "{schedule}");
        }
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = SchedulerConfig {
            beta_schedule: "squaredcos_cap_v3".to_string(),
            ..Default::default()
        };
        assert!(DdimScheduler::new(config).is_err());

        let mut scheduler = DdimScheduler::new(SchedulerConfig::default()).unwrap();
        assert!(scheduler.set_timesteps(0).is_err());
        assert!(scheduler.set_timesteps(1001).is_err());
    }

    #[test]
    fn test_alphas_cumprod_decreasing() {
        let scheduler = DdimScheduler::new(SchedulerConfig::default()).unwrap();
        assert!(scheduler.alphas_cumprod.windows(2).all(|w| w[0] > w[1]));
        assert!((scheduler.alphas_cumprod[0] - (1.0 - 0.00085)).abs() < 1e-9);
    }

    #[test]
    fn test_step_with_exact_noise_recovers_clean_sample() {
        let mut scheduler = DdimScheduler::new(SchedulerConfig::default()).unwrap();
        scheduler.set_timesteps(20).unwrap();

        let clean = Array4::from_elem((1, 4, 2, 2), 0.5f32);
        let noise = Array4::from_elem((1, 4, 2, 2), -0.25f32);

        // noise the clean sample to every timestep and step with the true noise
        for &t in scheduler.timesteps() {
            let a = scheduler.alphas_cumprod[t];
            let noisy = &clean * a.sqrt() as f32 + &noise * (1.0 - a).sqrt() as f32;
            let prev = scheduler.step(&noise, t, &noisy).unwrap();

            let a_prev = match t.checked_sub(scheduler.step_ratio) {
                Some(p) => scheduler.alphas_cumprod[p],
                None => scheduler.final_alpha_cumprod,
            };
            let expected = 0.5 * a_prev.sqrt() as f32 - 0.25 * (1.0 - a_prev).sqrt() as f32;
            assert!(prev.iter().all(|v| (v - expected).abs() < 1e-4));
        }
    }

    #[test]
    fn test_parse_diffusers_config() {
        let json = r#"{
            "_class_name": "DDIMScheduler",
            "beta_end": 0.012,
            "beta_schedule": "scaled_linear",
            "beta_start": 0.00085,
            "clip_sample": false,
            "num_train_timesteps": 1000,
            "set_alpha_to_one": false,
            "steps_offset": 1,
            "trained_betas": null
        }"#;
        let config: SchedulerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.num_train_timesteps, 1000);
        assert_eq!(config.prediction_type, "epsilon");
        assert_eq!(config.timestep_spacing, "leading");
    }

    #[test]
    fn test_step_shape_mismatch() {
        let mut scheduler = DdimScheduler::new(SchedulerConfig::default()).unwrap();
        scheduler.set_timesteps(10).unwrap();
        let a = Array4::<f32>::zeros((1, 4, 2, 2));
        let b = Array4::<f32>::zeros((1, 4, 2, 3));
        assert!(scheduler.step(&a, 901, &b).is_err());
    }
}
