use claims_warehouse::config::Config;
use claims_warehouse::ingest::{ColumnType, SourceKind, SqlValue, TargetColumn};
use claims_warehouse::load::load_source;
use claims_warehouse::warehouse::{InMemoryWarehouse, Warehouse};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const AUTOBI_HEADER: &str = "Index,CASENUM,ATTORNEY,CLMSEX,MARITAL,CLMINSUR,SEATBELT,CLMAGE,LOSS";

fn config_for(dir: &Path) -> Config {
    let mut config = Config::default();
    config.sources.data_dir = dir.to_path_buf();
    config
}

fn write_file(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

fn data_columns(kind: SourceKind) -> Vec<TargetColumn> {
    let mut columns = kind.schema().declared_table_columns();
    columns.truncate(columns.len() - 2);
    columns
}

fn sample_field(column: &TargetColumn, row: usize) -> String {
    match column.ty {
        ColumnType::Integer => (row + 1).to_string(),
        ColumnType::Float => format!("{}.5", row + 20),
        _ => format!("v{}", row),
    }
}

#[tokio::test]
async fn test_one_bad_row_is_skipped_and_counted() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "AutoBi.csv",
        &format!(
            "{}\n1,5,1,1,2,2,1,50,34.94\n2,13,2,2,2,1,1,abc,0.891\n3,66,2,1,2,2,1,5,0.33\n",
            AUTOBI_HEADER
        ),
    );
    let warehouse = InMemoryWarehouse::with_source_tables();

    let outcome = load_source(SourceKind::CustomerB, &config_for(dir.path()), &warehouse)
        .await
        .unwrap();

    assert_eq!(outcome.report.rows_read, 3);
    assert_eq!(outcome.report.rows_inserted, 2);
    assert_eq!(outcome.report.failures.len(), 1);
    assert_eq!(outcome.report.failures[0].row_index, 1);
    assert_eq!(
        warehouse
            .count_rows("insurance_raw.customer_b_claims")
            .await
            .unwrap(),
        2
    );
    assert_eq!(outcome.verification.row_count, Some(2));
    assert!(outcome.verification.count_matches());
    // Sample skips null ages and keeps the configured projection
    assert_eq!(outcome.verification.sample.len(), 2);
    assert_eq!(outcome.verification.sample[0][0], SqlValue::Integer(5));
}

#[tokio::test]
async fn test_reload_replaces_previous_contents() {
    let dir = TempDir::new().unwrap();
    let csv = format!(
        "{}\n1,5,1,1,2,2,1,50,34.94\n2,13,2,2,2,1,1,18,0.891\n",
        AUTOBI_HEADER
    );
    write_file(dir.path(), "AutoBi.csv", &csv);
    let config = config_for(dir.path());
    let warehouse = InMemoryWarehouse::with_source_tables();

    load_source(SourceKind::CustomerB, &config, &warehouse)
        .await
        .unwrap();
    let first: Vec<Vec<SqlValue>> = warehouse
        .committed_rows("insurance_raw.customer_b_claims")
        .unwrap();

    load_source(SourceKind::CustomerB, &config, &warehouse)
        .await
        .unwrap();
    let second = warehouse
        .committed_rows("insurance_raw.customer_b_claims")
        .unwrap();

    assert_eq!(second.len(), 2);
    // Identical apart from the load timestamp
    let strip = |rows: &[Vec<SqlValue>]| -> Vec<Vec<SqlValue>> {
        rows.iter()
            .map(|r| {
                let mut r = r.clone();
                let ts = r.len() - 2;
                r.remove(ts);
                r
            })
            .collect()
    };
    assert_eq!(strip(&first), strip(&second));
}

#[tokio::test]
async fn test_missing_file_leaves_table_untouched() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "AutoBi.csv",
        &format!("{}\n1,5,1,1,2,2,1,50,34.94\n", AUTOBI_HEADER),
    );
    let mut config = config_for(dir.path());
    let warehouse = InMemoryWarehouse::with_source_tables();
    load_source(SourceKind::CustomerB, &config, &warehouse)
        .await
        .unwrap();

    config.sources.customer_b.file_name = "missing.csv".to_string();
    let err = load_source(SourceKind::CustomerB, &config, &warehouse)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "SOURCE_ERROR");
    assert_eq!(
        warehouse
            .count_rows("insurance_raw.customer_b_claims")
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_missing_required_column_fails_before_truncate() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    let warehouse = InMemoryWarehouse::with_source_tables();

    write_file(
        dir.path(),
        "AutoBi.csv",
        &format!("{}\n1,5,1,1,2,2,1,50,34.94\n", AUTOBI_HEADER),
    );
    load_source(SourceKind::CustomerB, &config, &warehouse)
        .await
        .unwrap();

    write_file(
        dir.path(),
        "AutoBi.csv",
        "Index,CASENUM,ATTORNEY,CLMSEX,MARITAL,CLMINSUR,SEATBELT,CLMAGE\n1,5,1,1,2,2,1,50\n",
    );
    let err = load_source(SourceKind::CustomerB, &config, &warehouse)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "SOURCE_ERROR");
    assert!(err.to_string().contains("loss_amount"));
    assert_eq!(
        warehouse
            .count_rows("insurance_raw.customer_b_claims")
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_customer_a_drops_trailing_artifact_column() {
    let dir = TempDir::new().unwrap();
    let columns = data_columns(SourceKind::CustomerA);
    let mut header: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    header.push("_c39".to_string());

    let mut csv = header.join(",");
    csv.push('\n');
    for row in 0..4 {
        let mut fields: Vec<String> = columns.iter().map(|c| sample_field(c, row)).collect();
        fields.push(String::new());
        csv.push_str(&fields.join(","));
        csv.push('\n');
    }
    write_file(dir.path(), "insurance_claims.csv", &csv);

    let warehouse = InMemoryWarehouse::with_source_tables();
    let outcome = load_source(SourceKind::CustomerA, &config_for(dir.path()), &warehouse)
        .await
        .unwrap();

    assert_eq!(outcome.report.rows_inserted, 4);
    assert!(outcome.report.failures.is_empty());
    assert_eq!(outcome.verification.sample.len(), 4);
    assert_eq!(outcome.verification.sample_columns[0], "policy_number");
}

#[tokio::test]
async fn test_customer_c_reports_claim_rate() {
    let dir = TempDir::new().unwrap();
    let columns = data_columns(SourceKind::CustomerC);
    let sources = [
        "ID", "KIDSDRIV", "BIRTH", "AGE", "HOMEKIDS", "YOJ", "INCOME", "PARENT1", "HOME_VAL",
        "MSTATUS", "GENDER", "EDUCATION", "OCCUPATION", "TRAVTIME", "CAR_USE", "BLUEBOOK", "TIF",
        "CAR_TYPE", "RED_CAR", "OLDCLAIM", "CLM_FREQ", "REVOKED", "MVR_PTS", "CLM_AMT", "CAR_AGE",
        "CLAIM_FLAG", "URBANICITY",
    ];
    assert_eq!(sources.len(), columns.len());

    let mut csv = sources.join(",");
    csv.push('\n');
    for row in 0..8 {
        let fields: Vec<String> = columns
            .iter()
            .map(|c| match c.name.as_str() {
                "claim_flag" => usize::from(row % 4 == 0).to_string(),
                _ => sample_field(c, row),
            })
            .collect();
        csv.push_str(&fields.join(","));
        csv.push('\n');
    }
    write_file(dir.path(), "car_insurance_claim.csv", &csv);

    let warehouse = InMemoryWarehouse::with_source_tables();
    let outcome = load_source(SourceKind::CustomerC, &config_for(dir.path()), &warehouse)
        .await
        .unwrap();

    let stats = outcome.verification.claim_stats.unwrap();
    assert_eq!(stats.total, 8);
    assert_eq!(stats.flagged, 2);
    assert_eq!(stats.rate_pct(), 25.0);
    assert!(outcome.verification.to_string().contains("Claim rate: 25.0%"));
}

#[tokio::test]
async fn test_text_columns_keep_numeric_looking_fields() {
    let dir = TempDir::new().unwrap();
    let columns = data_columns(SourceKind::CustomerC);
    let header = [
        "ID", "KIDSDRIV", "BIRTH", "AGE", "HOMEKIDS", "YOJ", "INCOME", "PARENT1", "HOME_VAL",
        "MSTATUS", "GENDER", "EDUCATION", "OCCUPATION", "TRAVTIME", "CAR_USE", "BLUEBOOK", "TIF",
        "CAR_TYPE", "RED_CAR", "OLDCLAIM", "CLM_FREQ", "REVOKED", "MVR_PTS", "CLM_AMT", "CAR_AGE",
        "CLAIM_FLAG", "URBANICITY",
    ];
    let fields: Vec<String> = columns
        .iter()
        .map(|c| match c.name.as_str() {
            "income" => "007500".to_string(),
            "home_value" => "1.50".to_string(),
            _ => sample_field(c, 0),
        })
        .collect();
    write_file(
        dir.path(),
        "car_insurance_claim.csv",
        &format!("{}\n{}\n", header.join(","), fields.join(",")),
    );

    let warehouse = InMemoryWarehouse::with_source_tables();
    let outcome = load_source(SourceKind::CustomerC, &config_for(dir.path()), &warehouse)
        .await
        .unwrap();
    assert_eq!(outcome.report.rows_inserted, 1);

    let rows = warehouse
        .committed_rows("insurance_raw.customer_c_policies")
        .unwrap();
    let position = |name: &str| columns.iter().position(|c| c.name == name).unwrap();
    assert_eq!(rows[0][position("income")], SqlValue::Text("007500".to_string()));
    assert_eq!(rows[0][position("home_value")], SqlValue::Text("1.50".to_string()));
}
