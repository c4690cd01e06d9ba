//! Fixed description of the three claim extracts and their raw tables

use crate::ingest::coerce::ColumnType::{self, Float, Integer, Text};
use crate::ingest::schema::{ColumnMap, ColumnRule, TargetColumn};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// The three upstream systems feeding the warehouse
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum SourceKind {
    #[strum(to_string = "Customer A", serialize = "a", serialize = "customer_a")]
    CustomerA,
    #[strum(to_string = "Customer B", serialize = "b", serialize = "customer_b")]
    CustomerB,
    #[strum(to_string = "Customer C", serialize = "c", serialize = "customer_c")]
    CustomerC,
}

impl SourceKind {
    pub fn all() -> Vec<SourceKind> {
        SourceKind::iter().collect()
    }

    pub fn schema(self) -> SourceSchema {
        match self {
            SourceKind::CustomerA => SourceSchema {
                kind: self,
                system: "Comprehensive Claims System",
                table: "insurance_raw.customer_a_claims",
                file_hint: "insurance_claims.csv",
                rule: ColumnRule::Cleaned {
                    known: CUSTOMER_A_COLUMNS,
                },
                dropped: &["_c39"],
                required: &["policy_number", "age", "incident_type", "total_claim_amount"],
                sample: SampleSpec {
                    columns: &["policy_number", "age", "incident_type", "total_claim_amount"],
                    non_null: None,
                    limit: 5,
                },
                quality: None,
            },
            SourceKind::CustomerB => SourceSchema {
                kind: self,
                system: "Bodily Injury Claims System",
                table: "insurance_raw.customer_b_claims",
                file_hint: "AutoBi.csv",
                rule: ColumnRule::Mapped(CUSTOMER_B_MAPPING),
                dropped: &[],
                required: CUSTOMER_B_REQUIRED,
                sample: SampleSpec {
                    columns: &["case_number", "claimant_age", "attorney", "loss_amount"],
                    non_null: Some("claimant_age"),
                    limit: 5,
                },
                quality: None,
            },
            SourceKind::CustomerC => SourceSchema {
                kind: self,
                system: "Policy & Claims System",
                table: "insurance_raw.customer_c_policies",
                file_hint: "car_insurance_claim.csv",
                rule: ColumnRule::Mapped(CUSTOMER_C_MAPPING),
                dropped: &[],
                required: CUSTOMER_C_REQUIRED,
                sample: SampleSpec {
                    columns: &["record_id", "age", "gender", "car_type", "claim_flag"],
                    non_null: Some("age"),
                    limit: 5,
                },
                quality: Some(QualityCheck::ClaimRate {
                    flag_column: "claim_flag",
                }),
            },
        }
    }
}

/// Everything the loader needs to know about one extract
#[derive(Debug, Clone)]
pub struct SourceSchema {
    pub kind: SourceKind,
    /// Upstream system name, for banners
    pub system: &'static str,
    /// Destination table, schema-qualified
    pub table: &'static str,
    /// Default file name, used to label errors raised before the path is known
    pub file_hint: &'static str,
    pub rule: ColumnRule,
    /// Cleaned header names that are always discarded
    pub dropped: &'static [&'static str],
    /// Target columns that must survive normalization
    pub required: &'static [&'static str],
    pub sample: SampleSpec,
    pub quality: Option<QualityCheck>,
}

impl SourceSchema {
    /// Columns of the destination table for a fixed mapping, including the
    /// two trailing metadata columns
    pub fn declared_table_columns(&self) -> Vec<TargetColumn> {
        let mut columns: Vec<TargetColumn> = match self.rule {
            ColumnRule::Mapped(mapping) => mapping
                .iter()
                .map(|m| TargetColumn::new(m.target, m.ty))
                .collect(),
            ColumnRule::Cleaned { known } => known
                .iter()
                .map(|(name, ty)| TargetColumn::new(*name, *ty))
                .collect(),
        };
        columns.extend(metadata_columns());
        columns
    }
}

/// Trailing columns stamped onto every inserted row
pub fn metadata_columns() -> [TargetColumn; 2] {
    [
        TargetColumn::new(LOAD_TIMESTAMP_COLUMN, ColumnType::Timestamp),
        TargetColumn::new(SOURCE_FILE_COLUMN, ColumnType::Text),
    ]
}

pub const LOAD_TIMESTAMP_COLUMN: &str = "load_timestamp";
pub const SOURCE_FILE_COLUMN: &str = "source_file";

/// Post-load sample query
#[derive(Debug, Clone, Copy)]
pub struct SampleSpec {
    pub columns: &'static [&'static str],
    /// Only sample rows where this column is not null
    pub non_null: Option<&'static str>,
    pub limit: usize,
}

/// Extra post-load statistics
#[derive(Debug, Clone, Copy)]
pub enum QualityCheck {
    /// Share of rows whose 0/1 flag column is set
    ClaimRate { flag_column: &'static str },
}

const CUSTOMER_A_COLUMNS: &[(&str, ColumnType)] = &[
    ("months_as_customer", Integer),
    ("age", Integer),
    ("policy_number", Integer),
    ("policy_bind_date", Text),
    ("policy_state", Text),
    ("policy_csl", Text),
    ("policy_deductable", Integer),
    ("policy_annual_premium", Float),
    ("umbrella_limit", Integer),
    ("insured_zip", Integer),
    ("insured_sex", Text),
    ("insured_education_level", Text),
    ("insured_occupation", Text),
    ("insured_hobbies", Text),
    ("insured_relationship", Text),
    ("capital_gains", Integer),
    ("capital_loss", Integer),
    ("incident_date", Text),
    ("incident_type", Text),
    ("collision_type", Text),
    ("incident_severity", Text),
    ("authorities_contacted", Text),
    ("incident_state", Text),
    ("incident_city", Text),
    ("incident_location", Text),
    ("incident_hour_of_the_day", Integer),
    ("number_of_vehicles_involved", Integer),
    ("property_damage", Text),
    ("bodily_injuries", Integer),
    ("witnesses", Integer),
    ("police_report_available", Text),
    ("total_claim_amount", Integer),
    ("injury_claim", Integer),
    ("property_claim", Integer),
    ("vehicle_claim", Integer),
    ("auto_make", Text),
    ("auto_model", Text),
    ("auto_year", Integer),
    ("fraud_reported", Text),
];

const CUSTOMER_B_MAPPING: &[ColumnMap] = &[
    ColumnMap::new("Index", "index_id", Integer),
    ColumnMap::new("CASENUM", "case_number", Integer),
    ColumnMap::new("ATTORNEY", "attorney", Integer),
    ColumnMap::new("CLMSEX", "claimant_sex", Float),
    ColumnMap::new("MARITAL", "marital_status", Float),
    ColumnMap::new("CLMINSUR", "claimant_insured", Float),
    ColumnMap::new("SEATBELT", "seatbelt", Float),
    ColumnMap::new("CLMAGE", "claimant_age", Float),
    ColumnMap::new("LOSS", "loss_amount", Float),
];

const CUSTOMER_B_REQUIRED: &[&str] = &[
    "index_id",
    "case_number",
    "attorney",
    "claimant_sex",
    "marital_status",
    "claimant_insured",
    "seatbelt",
    "claimant_age",
    "loss_amount",
];

const CUSTOMER_C_MAPPING: &[ColumnMap] = &[
    ColumnMap::new("ID", "record_id", Integer),
    ColumnMap::new("KIDSDRIV", "kids_driving", Integer),
    ColumnMap::new("BIRTH", "birth_date", Text),
    ColumnMap::new("AGE", "age", Float),
    ColumnMap::new("HOMEKIDS", "home_kids", Integer),
    ColumnMap::new("YOJ", "years_on_job", Float),
    ColumnMap::new("INCOME", "income", Text),
    ColumnMap::new("PARENT1", "parent1", Text),
    ColumnMap::new("HOME_VAL", "home_value", Text),
    ColumnMap::new("MSTATUS", "marital_status", Text),
    ColumnMap::new("GENDER", "gender", Text),
    ColumnMap::new("EDUCATION", "education", Text),
    ColumnMap::new("OCCUPATION", "occupation", Text),
    ColumnMap::new("TRAVTIME", "travel_time", Integer),
    ColumnMap::new("CAR_USE", "car_use", Text),
    ColumnMap::new("BLUEBOOK", "bluebook_value", Text),
    ColumnMap::new("TIF", "time_in_force", Integer),
    ColumnMap::new("CAR_TYPE", "car_type", Text),
    ColumnMap::new("RED_CAR", "red_car", Text),
    ColumnMap::new("OLDCLAIM", "old_claim", Text),
    ColumnMap::new("CLM_FREQ", "claim_frequency", Integer),
    ColumnMap::new("REVOKED", "license_revoked", Text),
    ColumnMap::new("MVR_PTS", "mvr_points", Integer),
    ColumnMap::new("CLM_AMT", "claim_amount", Text),
    ColumnMap::new("CAR_AGE", "car_age", Float),
    ColumnMap::new("CLAIM_FLAG", "claim_flag", Integer),
    ColumnMap::new("URBANICITY", "urbanicity", Text),
];

const CUSTOMER_C_REQUIRED: &[&str] = &[
    "record_id",
    "kids_driving",
    "birth_date",
    "age",
    "home_kids",
    "years_on_job",
    "income",
    "parent1",
    "home_value",
    "marital_status",
    "gender",
    "education",
    "occupation",
    "travel_time",
    "car_use",
    "bluebook_value",
    "time_in_force",
    "car_type",
    "red_car",
    "old_claim",
    "claim_frequency",
    "license_revoked",
    "mvr_points",
    "claim_amount",
    "car_age",
    "claim_flag",
    "urbanicity",
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!(SourceKind::from_str("a").unwrap(), SourceKind::CustomerA);
        assert_eq!(SourceKind::from_str("B").unwrap(), SourceKind::CustomerB);
        assert_eq!(
            SourceKind::from_str("customer_c").unwrap(),
            SourceKind::CustomerC
        );
        assert!(SourceKind::from_str("d").is_err());
        assert_eq!(SourceKind::CustomerA.to_string(), "Customer A");
    }

    #[test]
    fn test_required_columns_cover_mappings() {
        for kind in [SourceKind::CustomerB, SourceKind::CustomerC] {
            let schema = kind.schema();
            if let ColumnRule::Mapped(mapping) = schema.rule {
                assert_eq!(mapping.len(), schema.required.len());
                for (entry, required) in mapping.iter().zip(schema.required) {
                    assert_eq!(entry.target, *required);
                }
            }
        }
    }

    #[test]
    fn test_declared_columns_end_with_metadata() {
        let columns = SourceKind::CustomerB.schema().declared_table_columns();
        assert_eq!(columns.len(), 11);
        assert_eq!(columns[9].name, LOAD_TIMESTAMP_COLUMN);
        assert_eq!(columns[10].name, SOURCE_FILE_COLUMN);

        let columns = SourceKind::CustomerC.schema().declared_table_columns();
        assert_eq!(columns.len(), 29);
    }

    #[test]
    fn test_sample_columns_exist_in_tables() {
        for kind in SourceKind::all() {
            let schema = kind.schema();
            let names: Vec<String> = schema
                .declared_table_columns()
                .into_iter()
                .map(|c| c.name)
                .collect();
            for column in schema.sample.columns {
                assert!(names.iter().any(|n| n == column), "{} missing", column);
            }
        }
    }
}
