//! Feature matrix construction from claim fact rows

use crate::error::{AppError, Result};
use crate::ml::models::ClaimFact;
use crate::ml::preprocessing::{LabelEncoder, MedianImputer};
use ndarray::Array2;
use tracing::debug;

/// Bucket assigned to values outside every interval
pub const UNBINNED: &str = "unbinned";

/// Category used for absent text values before encoding
pub const MISSING_CATEGORY: &str = "missing";

/// Numeric model inputs, in matrix order
pub const NUMERIC_FEATURES: [&str; 23] = [
    "age",
    "is_male",
    "is_married",
    "vehicle_age",
    "vehicle_year",
    "policy_annual_premium",
    "policy_deductible",
    "months_as_customer",
    "incident_month",
    "incident_day_of_week",
    "incident_hour",
    "is_weekend",
    "vehicles_involved",
    "bodily_injuries_count",
    "witnesses_count",
    "has_police_report",
    "has_property_damage",
    "prior_claim_count",
    "mvr_points",
    "license_revoked",
    "premium_to_coverage_ratio",
    "risk_score",
    "is_red_car",
];

/// Label-encoded model inputs, placed after the numeric ones
pub const CATEGORICAL_FEATURES: [&str; 6] = [
    "age_group",
    "vehicle_age_cat",
    "time_of_day",
    "tenure_category",
    "incident_type",
    "collision_type",
];

/// Fixed-edge bucketing over right-closed intervals `(lo, hi]`
#[derive(Debug, Clone, Copy)]
pub struct Buckets {
    edges: &'static [f64],
    labels: &'static [&'static str],
}

impl Buckets {
    pub const fn new(edges: &'static [f64], labels: &'static [&'static str]) -> Self {
        Self { edges, labels }
    }

    pub fn label(&self, value: f64) -> &'static str {
        self.edges
            .windows(2)
            .zip(self.labels)
            .find(|(bounds, _)| value > bounds[0] && value <= bounds[1])
            .map(|(_, label)| *label)
            .unwrap_or(UNBINNED)
    }
}

pub const AGE_BUCKETS: Buckets = Buckets::new(
    &[0.0, 25.0, 35.0, 45.0, 55.0, 65.0, 100.0],
    &["18-24", "25-34", "35-44", "45-54", "55-64", "65+"],
);

pub const VEHICLE_AGE_BUCKETS: Buckets = Buckets::new(
    &[-1.0, 3.0, 6.0, 11.0, 100.0],
    &["New", "Recent", "Older", "Very Old"],
);

pub const TIME_OF_DAY_BUCKETS: Buckets = Buckets::new(
    &[0.0, 6.0, 12.0, 18.0, 24.0],
    &["Night", "Morning", "Afternoon", "Evening"],
);

pub const TENURE_BUCKETS: Buckets = Buckets::new(
    &[-1.0, 6.0, 12.0, 24.0, 1000.0],
    &["New", "Short", "Medium", "Long"],
);

const DEFAULT_COVERAGE_LIMIT: f64 = 100_000.0;
const DEFAULT_INCIDENT_HOUR: f64 = 12.0;

/// Columns derived from one fact row
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFeatures {
    pub age_group: &'static str,
    pub vehicle_age_cat: &'static str,
    pub time_of_day: &'static str,
    pub tenure_category: &'static str,
    /// NaN when the premium is missing
    pub premium_to_coverage_ratio: f64,
    pub risk_score: f64,
    pub is_weekend: f64,
}

impl DerivedFeatures {
    pub fn from_fact(fact: &ClaimFact) -> Self {
        let premium = fact.policy_annual_premium.unwrap_or(f64::NAN);
        let coverage = fact.coverage_limit_bi.unwrap_or(DEFAULT_COVERAGE_LIMIT);

        // Missing risk inputs count as zero
        let risk_score = 2.0 * fact.prior_claim_count.unwrap_or(0.0)
            + fact.mvr_points.unwrap_or(0.0)
            + 5.0 * fact.license_revoked
            + 3.0 * fact.bodily_injuries_count.unwrap_or(0.0);

        Self {
            age_group: AGE_BUCKETS.label(fact.age.unwrap_or(f64::NAN)),
            vehicle_age_cat: VEHICLE_AGE_BUCKETS.label(fact.vehicle_age.unwrap_or(0.0)),
            time_of_day: TIME_OF_DAY_BUCKETS
                .label(fact.incident_hour.unwrap_or(DEFAULT_INCIDENT_HOUR)),
            tenure_category: TENURE_BUCKETS.label(fact.months_as_customer.unwrap_or(0.0)),
            premium_to_coverage_ratio: premium / (coverage + 1.0),
            risk_score,
            is_weekend: fact.is_weekend.unwrap_or(0.0),
        }
    }

    fn categories<'a>(&self, fact: &'a ClaimFact) -> [&'a str; 6] {
        [
            self.age_group,
            self.vehicle_age_cat,
            self.time_of_day,
            self.tenure_category,
            fact.incident_type.as_deref().unwrap_or(MISSING_CATEGORY),
            fact.collision_type.as_deref().unwrap_or(MISSING_CATEGORY),
        ]
    }
}

fn numeric_row(fact: &ClaimFact, derived: &DerivedFeatures) -> [f64; 23] {
    let opt = |v: Option<f64>| v.unwrap_or(f64::NAN);
    [
        opt(fact.age),
        fact.is_male,
        fact.is_married,
        opt(fact.vehicle_age),
        opt(fact.vehicle_year),
        opt(fact.policy_annual_premium),
        opt(fact.policy_deductible),
        opt(fact.months_as_customer),
        opt(fact.incident_month),
        opt(fact.incident_day_of_week),
        opt(fact.incident_hour),
        derived.is_weekend,
        opt(fact.vehicles_involved),
        opt(fact.bodily_injuries_count),
        opt(fact.witnesses_count),
        fact.has_police_report,
        fact.has_property_damage,
        opt(fact.prior_claim_count),
        opt(fact.mvr_points),
        fact.license_revoked,
        derived.premium_to_coverage_ratio,
        derived.risk_score,
        fact.is_red_car,
    ]
}

/// Fixed-width numeric matrix built from fact rows
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// Column names, numeric then categorical
    pub names: Vec<String>,
    pub values: Array2<f64>,
    /// Derived columns per input row
    pub derived: Vec<DerivedFeatures>,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }
}

/// Derives, encodes and imputes the model inputs
#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder;

impl FeatureBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn feature_names() -> Vec<String> {
        NUMERIC_FEATURES
            .iter()
            .chain(CATEGORICAL_FEATURES.iter())
            .map(|name| name.to_string())
            .collect()
    }

    /// One output row per fact, in input order
    pub fn build(&self, facts: &[ClaimFact]) -> Result<FeatureMatrix> {
        if facts.is_empty() {
            return Err(AppError::Model("no claim rows to build features from".to_string()));
        }

        let names = Self::feature_names();
        let n_numeric = NUMERIC_FEATURES.len();
        let derived: Vec<DerivedFeatures> = facts.iter().map(DerivedFeatures::from_fact).collect();

        let mut values = Array2::<f64>::zeros((facts.len(), names.len()));
        let mut categories: Vec<Vec<&str>> =
            vec![Vec::with_capacity(facts.len()); CATEGORICAL_FEATURES.len()];

        for (row, (fact, features)) in facts.iter().zip(derived.iter()).enumerate() {
            for (col, value) in numeric_row(fact, features).into_iter().enumerate() {
                values[[row, col]] = value;
            }
            for (col, category) in features.categories(fact).into_iter().enumerate() {
                categories[col].push(category);
            }
        }

        for (offset, (name, column)) in CATEGORICAL_FEATURES.iter().zip(&categories).enumerate() {
            let mut encoder = LabelEncoder::new();
            let codes = encoder.fit_transform(column.as_slice())?;
            for (row, code) in codes.into_iter().enumerate() {
                values[[row, n_numeric + offset]] = code;
            }
            debug!(
                feature = name,
                classes = ?encoder.classes(),
                "Categorical feature encoded"
            );
        }

        let mut imputer = MedianImputer::new();
        imputer.fit(&values);
        imputer.transform(&mut values)?;
        debug!(medians = ?imputer.medians(), "Missing values imputed");

        Ok(FeatureMatrix {
            names,
            values,
            derived,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(age: f64) -> ClaimFact {
        ClaimFact {
            total_claim_amount: 60_000.0,
            age: Some(age),
            policy_annual_premium: Some(1_000.0),
            incident_type: Some("Single Vehicle Collision".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_bucket_edges_are_right_closed() {
        assert_eq!(AGE_BUCKETS.label(25.0), "18-24");
        assert_eq!(AGE_BUCKETS.label(25.5), "25-34");
        assert_eq!(AGE_BUCKETS.label(65.0), "55-64");
        assert_eq!(AGE_BUCKETS.label(100.0), "65+");
        assert_eq!(TIME_OF_DAY_BUCKETS.label(0.0), UNBINNED);
        assert_eq!(VEHICLE_AGE_BUCKETS.label(0.0), "New");
    }

    #[test]
    fn test_out_of_range_values_are_unbinned() {
        assert_eq!(AGE_BUCKETS.label(-3.0), UNBINNED);
        assert_eq!(AGE_BUCKETS.label(0.0), UNBINNED);
        assert_eq!(AGE_BUCKETS.label(140.0), UNBINNED);
        assert_eq!(AGE_BUCKETS.label(f64::NAN), UNBINNED);
    }

    #[test]
    fn test_derived_defaults() {
        let derived = DerivedFeatures::from_fact(&fact(40.0));
        assert_eq!(derived.age_group, "35-44");
        assert_eq!(derived.vehicle_age_cat, "New");
        assert_eq!(derived.time_of_day, "Morning");
        assert_eq!(derived.tenure_category, "New");
        assert_eq!(derived.is_weekend, 0.0);
        assert_eq!(derived.risk_score, 0.0);
        assert!((derived.premium_to_coverage_ratio - 1_000.0 / 100_001.0).abs() < 1e-12);
    }

    #[test]
    fn test_risk_score() {
        let mut f = fact(30.0);
        f.prior_claim_count = Some(2.0);
        f.mvr_points = Some(3.0);
        f.license_revoked = 1.0;
        f.bodily_injuries_count = None;
        assert_eq!(DerivedFeatures::from_fact(&f).risk_score, 12.0);
    }

    #[test]
    fn test_matrix_shape_and_encoding() {
        let mut facts = vec![fact(25.0), fact(40.0), fact(-1.0)];
        facts[1].incident_type = None;

        let matrix = FeatureBuilder::new().build(&facts).unwrap();
        assert_eq!(matrix.values.dim(), (3, 29));
        assert_eq!(matrix.names[23], "age_group");

        // age_group classes sorted: "18-24", "35-44", "unbinned"
        assert_eq!(matrix.values[[0, 23]], 0.0);
        assert_eq!(matrix.values[[1, 23]], 1.0);
        assert_eq!(matrix.values[[2, 23]], 2.0);

        // incident_type classes: "Single Vehicle Collision", "missing"
        assert_eq!(matrix.values[[1, 27]], 1.0);
    }

    #[test]
    fn test_missing_numeric_values_take_median() {
        let mut facts = vec![fact(30.0), fact(40.0), fact(50.0)];
        facts[0].vehicle_year = Some(2010.0);
        facts[1].vehicle_year = None;
        facts[2].vehicle_year = Some(2014.0);

        let matrix = FeatureBuilder::new().build(&facts).unwrap();
        assert_eq!(matrix.values[[1, 4]], 2012.0);
        assert!(matrix.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(FeatureBuilder::new().build(&[]).is_err());
    }
}
