use crate::error::ConfigError;
use crate::finder::FinderOptions;
use crate::fitting::PropagationOptions;
use crate::hits::DigitizerOptions;
use crate::seeding::{DedupTolerance, SeedOptions, SeedStrategy};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Flat reconstruction configuration, one key per option.
///
/// Stage option structs are resolved from it with [`RecoConfig::digitizer_options`],
/// [`RecoConfig::seed_options`] and [`RecoConfig::finder_options`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecoConfig {
    pub min_energy_deposit: f64,
    pub track_id_filter: i32,
    pub do_smearing: bool,
    #[serde(rename = "sigma_u")]
    pub sigma_u: f64,
    #[serde(rename = "sigma_v")]
    pub sigma_v: f64,
    pub merge_hits: bool,
    pub rng_seed: u64,
    pub surface_thickness: f64,

    pub pmin: f64,
    pub pmax: f64,
    pub d0min: Option<f64>,
    pub d0max: f64,
    pub z0max: f64,
    pub b_field: f64,
    pub perigee_location: Vector3<f64>,
    pub strategies: Vec<SeedStrategy>,
    pub max_combinations: usize,
    pub position_sigma: f64,
    pub covariance_inflation: f64,
    pub dedup_tolerance: DedupTolerance,

    pub min_hits: usize,
    pub single_track: bool,
    pub use_extrapolation_target: bool,
    pub extrapolation_location: Vector3<f64>,
    pub use_seed_perigee: bool,
    pub enable_refit_a: bool,
    pub enable_refit_b: bool,
    pub use_1d_measurements: bool,
    pub max_chi2: Option<f64>,
    pub max_measurements_per_surface: usize,
    /// Number of components of the Gaussian-sum refitter.
    pub max_components: usize,
    pub max_steps: usize,
    pub path_limit: Option<f64>,

    pub input_hit_collection_name: String,
    pub output_collection_name: String,
    pub seed_collection_name: String,
    pub track_collection_name: String,
}

impl Default for RecoConfig {
    fn default() -> Self {
        let digitizer = DigitizerOptions::default();
        let seeding = SeedOptions::default();
        let finder = FinderOptions::default();
        Self {
            min_energy_deposit: digitizer.min_energy_deposit,
            track_id_filter: digitizer.track_id_filter,
            do_smearing: digitizer.do_smearing,
            sigma_u: digitizer.sigma_u,
            sigma_v: digitizer.sigma_v,
            merge_hits: true,
            rng_seed: digitizer.rng_seed,
            surface_thickness: digitizer.surface_thickness,
            pmin: seeding.pmin,
            pmax: seeding.pmax,
            d0min: seeding.d0min,
            d0max: seeding.d0max,
            z0max: seeding.z0max,
            b_field: seeding.b_field,
            perigee_location: seeding.perigee_location,
            strategies: Vec::new(),
            max_combinations: seeding.max_combinations,
            position_sigma: seeding.position_sigma,
            covariance_inflation: seeding.covariance_inflation,
            dedup_tolerance: seeding.dedup,
            min_hits: finder.min_hits,
            single_track: finder.single_track,
            use_extrapolation_target: finder.use_extrapolation_target,
            extrapolation_location: finder.extrapolation_location,
            use_seed_perigee: finder.use_seed_perigee,
            enable_refit_a: finder.enable_refit_a,
            enable_refit_b: finder.enable_refit_b,
            use_1d_measurements: finder.use_1d_measurements,
            max_chi2: finder.max_chi2,
            max_measurements_per_surface: finder.max_measurements_per_surface,
            max_components: 4,
            max_steps: finder.propagation.max_steps,
            path_limit: finder.propagation.path_limit,
            input_hit_collection_name: "TaggerSimHits".to_string(),
            output_collection_name: "TaggerMeasurements".to_string(),
            seed_collection_name: "SeedTracks".to_string(),
            track_collection_name: "Tracks".to_string(),
        }
    }
}

impl RecoConfig {
    /// Rejects option values no stage can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("sigma_u", self.sigma_u)?;
        non_negative("sigma_v", self.sigma_v)?;
        non_negative("surfaceThickness", self.surface_thickness)?;
        if !self.min_energy_deposit.is_finite() {
            return Err(ConfigError::invalid("minEnergyDeposit", "must be finite"));
        }
        non_negative("pmin", self.pmin)?;
        if !(self.pmax > self.pmin) {
            return Err(ConfigError::invalid(
                "pmax",
                format!("{} must exceed pmin {}", self.pmax, self.pmin),
            ));
        }
        positive("d0max", self.d0max)?;
        if let Some(d0min) = self.d0min {
            non_negative("d0min", d0min)?;
            if d0min >= self.d0max {
                return Err(ConfigError::invalid(
                    "d0min",
                    format!("{d0min} must be below d0max {}", self.d0max),
                ));
            }
        }
        positive("z0max", self.z0max)?;
        if !self.b_field.is_finite() || self.b_field == 0.0 {
            return Err(ConfigError::invalid("bField", "must be finite and non-zero"));
        }
        positive("positionSigma", self.position_sigma)?;
        positive("covarianceInflation", self.covariance_inflation)?;
        at_least_one("maxCombinations", self.max_combinations)?;
        at_least_one("maxMeasurementsPerSurface", self.max_measurements_per_surface)?;
        at_least_one("maxComponents", self.max_components)?;
        at_least_one("maxSteps", self.max_steps)?;
        if let Some(limit) = self.path_limit {
            positive("pathLimit", limit)?;
        }
        if let Some(cut) = self.max_chi2 {
            positive("maxChi2", cut)?;
        }
        for (name, value) in [
            ("inputHitCollectionName", &self.input_hit_collection_name),
            ("outputCollectionName", &self.output_collection_name),
            ("seedCollectionName", &self.seed_collection_name),
            ("trackCollectionName", &self.track_collection_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(name, "collection name is empty"));
            }
        }
        Ok(())
    }

    pub fn digitizer_options(&self) -> DigitizerOptions {
        DigitizerOptions {
            min_energy_deposit: self.min_energy_deposit,
            track_id_filter: self.track_id_filter,
            do_smearing: self.do_smearing,
            sigma_u: self.sigma_u,
            sigma_v: self.sigma_v,
            surface_thickness: self.surface_thickness,
            rng_seed: self.rng_seed,
        }
    }

    pub fn seed_options(&self) -> SeedOptions {
        SeedOptions {
            pmin: self.pmin,
            pmax: self.pmax,
            d0max: self.d0max,
            d0min: self.d0min,
            z0max: self.z0max,
            perigee_location: self.perigee_location,
            b_field: self.b_field,
            max_combinations: self.max_combinations,
            position_sigma: self.position_sigma,
            covariance_inflation: self.covariance_inflation,
            dedup: self.dedup_tolerance.clone(),
        }
    }

    pub fn finder_options(&self) -> FinderOptions {
        FinderOptions {
            min_hits: self.min_hits,
            single_track: self.single_track,
            use_extrapolation_target: self.use_extrapolation_target,
            extrapolation_location: self.extrapolation_location,
            use_seed_perigee: self.use_seed_perigee,
            enable_refit_a: self.enable_refit_a,
            enable_refit_b: self.enable_refit_b,
            use_1d_measurements: self.use_1d_measurements,
            max_chi2: self.max_chi2,
            max_measurements_per_surface: self.max_measurements_per_surface,
            propagation: PropagationOptions {
                max_steps: self.max_steps,
                path_limit: self.path_limit,
                b_field: self.b_field,
            },
        }
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("{value} is not a finite non-negative number")))
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("{value} is not a finite positive number")))
    }
}

fn at_least_one(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(name, "must be at least 1"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stage_defaults() {
        let config = RecoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.digitizer_options(), DigitizerOptions::default());
        assert_eq!(config.seed_options(), SeedOptions::default());
        assert_eq!(config.finder_options(), FinderOptions::default());
        assert_eq!(config.input_hit_collection_name, "TaggerSimHits");
        assert_eq!(config.track_collection_name, "Tracks");
    }

    #[test]
    fn parses_flat_keys() {
        let json = r#"{
            "minEnergyDeposit": 0.1,
            "sigma_u": 0.02,
            "sigma_v": 0.03,
            "d0min": 1.5,
            "minHits": 3,
            "enableRefitA": true,
            "use1dMeasurements": true,
            "bField": 2.0,
            "extrapolationLocation": [1.0, 2.0, 3.0],
            "strategies": [[1, 3, 5]],
            "maxComponents": 6,
            "trackCollectionName": "Fitted"
        }"#;
        let config: RecoConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sigma_u, 0.02);
        assert_eq!(config.sigma_v, 0.03);
        assert_eq!(config.d0min, Some(1.5));
        assert_eq!(config.strategies, vec![SeedStrategy(vec![1, 3, 5])]);
        assert_eq!(config.max_components, 6);
        assert_eq!(config.pmax, 8.0);

        let finder = config.finder_options();
        assert_eq!(finder.min_hits, 3);
        assert!(finder.enable_refit_a);
        assert!(finder.use_1d_measurements);
        assert_eq!(finder.propagation.b_field, 2.0);
        assert_eq!(finder.extrapolation_location, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(config.seed_options().b_field, 2.0);
        assert_eq!(config.digitizer_options().min_energy_deposit, 0.1);
    }

    #[test]
    fn validation_names_the_offending_option() {
        let cases: Vec<(RecoConfig, &str)> = vec![
            (RecoConfig { sigma_u: -1.0, ..Default::default() }, "sigma_u"),
            (RecoConfig { pmax: 0.01, ..Default::default() }, "pmax"),
            (RecoConfig { d0min: Some(25.0), ..Default::default() }, "d0min"),
            (RecoConfig { b_field: 0.0, ..Default::default() }, "bField"),
            (RecoConfig { max_steps: 0, ..Default::default() }, "maxSteps"),
            (RecoConfig { max_chi2: Some(-2.0), ..Default::default() }, "maxChi2"),
            (
                RecoConfig {
                    seed_collection_name: " ".into(),
                    ..Default::default()
                },
                "seedCollectionName",
            ),
        ];
        for (config, expected) in cases {
            match config.validate() {
                Err(ConfigError::Invalid { name, .. }) => assert_eq!(name, expected),
                other => panic!("expected {expected} to fail, got {other:?}"),
            }
        }
    }
}
