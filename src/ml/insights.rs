//! Descriptive comparison of severe and non-severe claims

use crate::ml::features::DerivedFeatures;
use crate::ml::models::ClaimFact;
use serde::Serialize;
use std::fmt;

/// How rows were assigned to the severe group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComparisonBasis {
    /// Observed claim amount, over every row
    Actual,
    /// Best model's prediction, over the held-out rows
    Predicted,
}

impl fmt::Display for ComparisonBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonBasis::Actual => write!(f, "actual severity"),
            ComparisonBasis::Predicted => write!(f, "predicted severity"),
        }
    }
}

/// Means over one partition; `None` when no row has a value
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupProfile {
    pub count: usize,
    pub mean_age: Option<f64>,
    pub mean_vehicle_age: Option<f64>,
    pub mean_prior_claims: Option<f64>,
    pub mean_mvr_points: Option<f64>,
    pub weekend_share: Option<f64>,
    pub mean_bodily_injuries: Option<f64>,
}

#[derive(Default)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| !v.is_nan()) {
            self.sum += v;
            self.n += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

impl GroupProfile {
    fn from_rows<'a>(rows: impl Iterator<Item = (&'a ClaimFact, &'a DerivedFeatures)>) -> Self {
        let mut count = 0;
        let (mut age, mut vehicle_age, mut prior, mut mvr, mut weekend, mut injuries) = (
            Mean::default(),
            Mean::default(),
            Mean::default(),
            Mean::default(),
            Mean::default(),
            Mean::default(),
        );
        for (fact, derived) in rows {
            count += 1;
            age.push(fact.age);
            vehicle_age.push(fact.vehicle_age);
            prior.push(Some(fact.prior_claim_count.unwrap_or(0.0)));
            mvr.push(Some(fact.mvr_points.unwrap_or(0.0)));
            weekend.push(Some(derived.is_weekend));
            injuries.push(fact.bodily_injuries_count);
        }
        Self {
            count,
            mean_age: age.get(),
            mean_vehicle_age: vehicle_age.get(),
            mean_prior_claims: prior.get(),
            mean_mvr_points: mvr.get(),
            weekend_share: weekend.get(),
            mean_bodily_injuries: injuries.get(),
        }
    }
}

/// Signed difference severe minus other, with its direction word
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskFactor {
    pub factor: &'static str,
    pub delta: f64,
    pub unit: &'static str,
    pub direction: &'static str,
}

impl RiskFactor {
    fn new(
        factor: &'static str,
        unit: &'static str,
        words: (&'static str, &'static str),
        severe: Option<f64>,
        other: Option<f64>,
    ) -> Option<Self> {
        let delta = severe? - other?;
        Some(Self {
            factor,
            delta,
            unit,
            direction: if delta > 0.0 { words.0 } else { words.1 },
        })
    }
}

/// Severe vs. non-severe profiles and their deltas
#[derive(Debug, Clone, Serialize)]
pub struct SeverityComparison {
    pub basis: ComparisonBasis,
    pub severe: GroupProfile,
    pub other: GroupProfile,
    pub risk_factors: Vec<RiskFactor>,
}

impl SeverityComparison {
    /// Partition `(fact, derived, is_severe)` rows and aggregate both sides
    pub fn compute<'a, I>(basis: ComparisonBasis, rows: I) -> Self
    where
        I: Iterator<Item = (&'a ClaimFact, &'a DerivedFeatures, bool)> + Clone,
    {
        let severe = GroupProfile::from_rows(rows.clone().filter(|r| r.2).map(|(f, d, _)| (f, d)));
        let other = GroupProfile::from_rows(rows.filter(|r| !r.2).map(|(f, d, _)| (f, d)));

        let risk_factors = [
            RiskFactor::new("Age", "years", ("older", "younger"), severe.mean_age, other.mean_age),
            RiskFactor::new(
                "Vehicle age",
                "years",
                ("older", "newer"),
                severe.mean_vehicle_age,
                other.mean_vehicle_age,
            ),
            RiskFactor::new(
                "Prior claims",
                "claims",
                ("more", "fewer"),
                severe.mean_prior_claims,
                other.mean_prior_claims,
            ),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self {
            basis,
            severe,
            other,
            risk_factors,
        }
    }
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "n/a".to_string(),
    }
}

impl fmt::Display for SeverityComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.severe;
        writeln!(
            f,
            "Severe Claims Characteristics ({}, {} of {} rows):",
            self.basis,
            s.count,
            s.count + self.other.count
        )?;
        writeln!(f, "  • Average age: {} years", fmt_opt(s.mean_age, 1))?;
        writeln!(f, "  • Average vehicle age: {} years", fmt_opt(s.mean_vehicle_age, 1))?;
        writeln!(f, "  • Prior claims: {}", fmt_opt(s.mean_prior_claims, 2))?;
        writeln!(f, "  • MVR points: {}", fmt_opt(s.mean_mvr_points, 1))?;
        writeln!(
            f,
            "  • Weekend incidents: {}%",
            fmt_opt(s.weekend_share.map(|w| w * 100.0), 1)
        )?;
        writeln!(f, "  • Bodily injuries: {}", fmt_opt(s.mean_bodily_injuries, 2))?;
        writeln!(f)?;
        writeln!(f, "Risk Factors for Severe Claims:")?;
        if self.risk_factors.is_empty() {
            writeln!(f, "  • not enough rows in both groups to compare")?;
        }
        for factor in &self.risk_factors {
            let precision = if factor.unit == "claims" { 2 } else { 1 };
            writeln!(
                f,
                "  • {}: {:.*} {} {}",
                factor.factor,
                precision,
                factor.delta.abs(),
                factor.unit,
                factor.direction
            )?;
        }
        Ok(())
    }
}
