//! PostgreSQL backend

use crate::config::WarehouseConfig;
use crate::error::{AppError, Result};
use crate::ingest::{ColumnType, SampleSpec, SqlValue};
use crate::ml::ClaimFact;
use crate::warehouse::{quote_ident, FlagStats, InsertStatement, ServerTypes, Warehouse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row, Statement};

const ROW_SAVEPOINT: &str = "row_insert";

const COLUMN_TYPES_SQL: &str = "SELECT column_name::TEXT, \
        (CASE WHEN data_type IN ('USER-DEFINED', 'ARRAY') \
            THEN format('%I.%I', udt_schema, udt_name) \
            ELSE data_type END)::TEXT \
     FROM information_schema.columns \
     WHERE table_schema::TEXT = $1 AND table_name::TEXT = $2";

/// PostgreSQL warehouse over a single session.
///
/// Inserts open a transaction lazily and wrap every row in a savepoint, so a
/// rejected row is rolled back alone and the rest of the batch survives until
/// the next `commit`.
pub struct PostgresWarehouse {
    client: Client,
    connection: JoinHandle<()>,
    analytics_view: String,
    in_transaction: Mutex<bool>,
    statements: DashMap<String, Statement>,
    column_types: DashMap<String, ServerTypes>,
}

impl PostgresWarehouse {
    pub async fn connect(config: &WarehouseConfig) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .user(&config.user)
            .dbname(&config.dbname)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if !config.password.is_empty() {
            pg.password(&config.password);
        }

        let (client, connection) = pg
            .connect(NoTls)
            .await
            .map_err(|e| AppError::Connection(e.to_string()))?;

        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Warehouse connection error");
            }
        });

        tracing::info!(
            host = %config.host,
            port = config.port,
            dbname = %config.dbname,
            "Connected to warehouse"
        );

        Ok(Self {
            client,
            connection,
            analytics_view: config.analytics_view.clone(),
            in_transaction: Mutex::new(false),
            statements: DashMap::new(),
            column_types: DashMap::new(),
        })
    }

    /// Declared column types of a table, read once per session
    async fn server_types(&self, table: &str) -> Result<ServerTypes> {
        if let Some(cached) = self.column_types.get(table) {
            return Ok(cached.clone());
        }
        let (schema, name) = split_table(table);
        let rows = self.client.query(COLUMN_TYPES_SQL, &[&schema, &name]).await?;
        let types = rows
            .iter()
            .map(|row| -> Result<(String, String)> { Ok((row.try_get(0)?, row.try_get(1)?)) })
            .collect::<Result<ServerTypes>>()?;
        tracing::debug!(table = table, columns = types.len(), "Resolved column types");
        self.column_types.insert(table.to_string(), types.clone());
        Ok(types)
    }

    async fn prepared(&self, statement: &InsertStatement) -> Result<Statement> {
        let server_types = self.server_types(&statement.table).await?;
        let sql = statement.sql_for(&server_types);
        if let Some(cached) = self.statements.get(&sql) {
            return Ok(cached.clone());
        }
        let prepared = self.client.prepare(&sql).await?;
        self.statements.insert(sql, prepared.clone());
        Ok(prepared)
    }

    async fn begin_if_needed(&self) -> Result<()> {
        let mut open = self.in_transaction.lock().await;
        if !*open {
            self.client.batch_execute("BEGIN").await?;
            *open = true;
        }
        Ok(())
    }
}

/// Schema and relation of a possibly qualified table name
fn split_table(table: &str) -> (&str, &str) {
    table.split_once('.').unwrap_or(("public", table))
}

/// Box a value as the Rust type matching the column's parameter cast
fn bind(value: &SqlValue, ty: ColumnType) -> Result<Box<dyn ToSql + Sync + Send>> {
    let boxed: Box<dyn ToSql + Sync + Send> = match (ty, value) {
        (ColumnType::Integer, SqlValue::Null) => Box::new(None::<i64>),
        (ColumnType::Integer, SqlValue::Integer(i)) => Box::new(Some(*i)),
        (ColumnType::Float, SqlValue::Null) => Box::new(None::<f64>),
        (ColumnType::Float, SqlValue::Integer(i)) => Box::new(Some(*i as f64)),
        (ColumnType::Float, SqlValue::Float(f)) => Box::new(Some(*f)),
        (ColumnType::Text, SqlValue::Null) => Box::new(None::<String>),
        (ColumnType::Text, SqlValue::Text(s)) => Box::new(Some(s.clone())),
        (ColumnType::Timestamp, SqlValue::Null) => Box::new(None::<DateTime<Utc>>),
        (ColumnType::Timestamp, SqlValue::Timestamp(ts)) => Box::new(Some(*ts)),
        (ty, value) => {
            return Err(AppError::RowRejected(format!(
                "invalid input syntax for type {}: \"{}\"",
                ty.sql_cast().to_lowercase(),
                value
            )))
        }
    };
    Ok(boxed)
}

fn float(row: &Row, column: &str) -> Result<Option<f64>> {
    row.try_get::<_, Option<f64>>(column)
        .map_err(|e| AppError::Database(format!("column {}: {}", column, e)))
}

fn flag(row: &Row, column: &str) -> Result<f64> {
    Ok(float(row, column)?.unwrap_or(0.0))
}

fn text(row: &Row, column: &str) -> Result<Option<String>> {
    row.try_get::<_, Option<String>>(column)
        .map_err(|e| AppError::Database(format!("column {}: {}", column, e)))
}

fn claim_fact_from_row(row: &Row) -> Result<ClaimFact> {
    Ok(ClaimFact {
        total_claim_amount: float(row, "total_claim_amount")?.unwrap_or(0.0),
        age: float(row, "age")?,
        is_male: flag(row, "is_male")?,
        is_married: flag(row, "is_married")?,
        education_level: text(row, "education_level")?,
        occupation: text(row, "occupation")?,
        vehicle_age: float(row, "vehicle_age")?,
        vehicle_year: float(row, "vehicle_year")?,
        vehicle_make: text(row, "vehicle_make")?,
        vehicle_type: text(row, "vehicle_type")?,
        is_red_car: flag(row, "is_red_car")?,
        policy_annual_premium: float(row, "policy_annual_premium")?,
        policy_deductible: float(row, "policy_deductible")?,
        coverage_limit_bi: float(row, "coverage_limit_bi")?,
        months_as_customer: float(row, "months_as_customer")?,
        incident_month: float(row, "incident_month")?,
        incident_day_of_week: float(row, "incident_day_of_week")?,
        incident_hour: float(row, "incident_hour")?,
        is_weekend: float(row, "is_weekend")?,
        incident_type: text(row, "incident_type")?,
        collision_type: text(row, "collision_type")?,
        incident_severity: text(row, "incident_severity")?,
        vehicles_involved: float(row, "vehicles_involved")?,
        bodily_injuries_count: float(row, "bodily_injuries_count")?,
        witnesses_count: float(row, "witnesses_count")?,
        has_police_report: flag(row, "has_police_report")?,
        has_property_damage: flag(row, "has_property_damage")?,
        prior_claim_count: float(row, "prior_claim_count")?,
        prior_claim_total: float(row, "prior_claim_total")?,
        mvr_points: float(row, "mvr_points")?,
        license_revoked: flag(row, "license_revoked")?,
        income_annual: float(row, "income_annual")?,
        home_value: float(row, "home_value")?,
        is_fraud: flag(row, "is_fraud")?,
    })
}

/// Query over the analytic view; every column is cast to DOUBLE PRECISION or
/// TEXT so rows decode into `ClaimFact` without per-view type knowledge
fn claim_facts_sql(view: &str) -> String {
    format!(
        "SELECT \
            age::DOUBLE PRECISION AS age, \
            (CASE WHEN gender = 'M' THEN 1 ELSE 0 END)::DOUBLE PRECISION AS is_male, \
            (CASE WHEN marital_status = 'Married' THEN 1 ELSE 0 END)::DOUBLE PRECISION AS is_married, \
            education_level::TEXT AS education_level, \
            occupation::TEXT AS occupation, \
            vehicle_age::DOUBLE PRECISION AS vehicle_age, \
            vehicle_year::DOUBLE PRECISION AS vehicle_year, \
            vehicle_make::TEXT AS vehicle_make, \
            vehicle_type::TEXT AS vehicle_type, \
            (CASE WHEN is_red_car = TRUE THEN 1 ELSE 0 END)::DOUBLE PRECISION AS is_red_car, \
            policy_annual_premium::DOUBLE PRECISION AS policy_annual_premium, \
            policy_deductible::DOUBLE PRECISION AS policy_deductible, \
            coverage_limit_bi::DOUBLE PRECISION AS coverage_limit_bi, \
            months_as_customer::DOUBLE PRECISION AS months_as_customer, \
            EXTRACT(MONTH FROM incident_date)::DOUBLE PRECISION AS incident_month, \
            EXTRACT(DOW FROM incident_date)::DOUBLE PRECISION AS incident_day_of_week, \
            incident_hour::DOUBLE PRECISION AS incident_hour, \
            (CASE WHEN incident_is_weekend THEN 1 ELSE 0 END)::DOUBLE PRECISION AS is_weekend, \
            incident_type::TEXT AS incident_type, \
            collision_type::TEXT AS collision_type, \
            incident_severity::TEXT AS incident_severity, \
            vehicles_involved::DOUBLE PRECISION AS vehicles_involved, \
            bodily_injuries_count::DOUBLE PRECISION AS bodily_injuries_count, \
            witnesses_count::DOUBLE PRECISION AS witnesses_count, \
            (CASE WHEN police_report_available = TRUE THEN 1 ELSE 0 END)::DOUBLE PRECISION AS has_police_report, \
            (CASE WHEN property_damage = TRUE THEN 1 ELSE 0 END)::DOUBLE PRECISION AS has_property_damage, \
            COALESCE(prior_claim_count, 0)::DOUBLE PRECISION AS prior_claim_count, \
            COALESCE(prior_claim_total_amount, 0)::DOUBLE PRECISION AS prior_claim_total, \
            COALESCE(mvr_points, 0)::DOUBLE PRECISION AS mvr_points, \
            (CASE WHEN license_revoked = TRUE THEN 1 ELSE 0 END)::DOUBLE PRECISION AS license_revoked, \
            income_annual::DOUBLE PRECISION AS income_annual, \
            home_value::DOUBLE PRECISION AS home_value, \
            (CASE WHEN fraud_reported = TRUE THEN 1 ELSE 0 END)::DOUBLE PRECISION AS is_fraud, \
            total_claim_amount::DOUBLE PRECISION AS total_claim_amount \
         FROM {} \
         WHERE total_claim_amount > 0 \
           AND total_claim_amount < 1000000 \
           AND age IS NOT NULL",
        view
    )
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn truncate(&self, table: &str) -> Result<()> {
        // Anything still pending belongs to an earlier load
        self.commit().await?;
        self.client
            .batch_execute(&format!("TRUNCATE TABLE {}", table))
            .await?;
        tracing::debug!(table = table, "Table truncated");
        Ok(())
    }

    async fn insert(&self, statement: &InsertStatement, values: &[SqlValue]) -> Result<()> {
        if values.len() != statement.columns.len() {
            return Err(AppError::RowRejected(format!(
                "INSERT has {} values for {} columns",
                values.len(),
                statement.columns.len()
            )));
        }

        let boxed = values
            .iter()
            .zip(&statement.columns)
            .map(|(value, column)| bind(value, column.ty))
            .collect::<Result<Vec<_>>>()?;
        let params: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let prepared = self.prepared(statement).await?;
        self.begin_if_needed().await?;
        self.client
            .batch_execute(&format!("SAVEPOINT {}", ROW_SAVEPOINT))
            .await?;

        match self.client.execute(&prepared, &params).await {
            Ok(_) => {
                self.client
                    .batch_execute(&format!("RELEASE SAVEPOINT {}", ROW_SAVEPOINT))
                    .await?;
                Ok(())
            }
            Err(e) => match e.as_db_error() {
                Some(db) => {
                    let message = db.message().to_string();
                    self.client
                        .batch_execute(&format!("ROLLBACK TO SAVEPOINT {}", ROW_SAVEPOINT))
                        .await?;
                    Err(AppError::RowRejected(message))
                }
                None => Err(AppError::Connection(e.to_string())),
            },
        }
    }

    async fn commit(&self) -> Result<()> {
        let mut open = self.in_transaction.lock().await;
        if *open {
            self.client.batch_execute("COMMIT").await?;
            *open = false;
        }
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let row = self
            .client
            .query_one(&format!("SELECT COUNT(*) FROM {}", table), &[])
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }

    async fn sample_rows(&self, table: &str, spec: &SampleSpec) -> Result<Vec<Vec<SqlValue>>> {
        let columns: Vec<String> = spec
            .columns
            .iter()
            .map(|c| format!("{}::TEXT", quote_ident(c)))
            .collect();
        let filter = spec
            .non_null
            .map(|c| format!(" WHERE {} IS NOT NULL", quote_ident(c)))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {} FROM {}{} LIMIT {}",
            columns.join(", "),
            table,
            filter,
            spec.limit
        );

        let rows = self.client.query(&sql, &[]).await?;
        rows.iter()
            .map(|row| -> Result<Vec<SqlValue>> {
                (0..spec.columns.len())
                    .map(|idx| -> Result<SqlValue> {
                        let value: Option<String> = row.try_get(idx)?;
                        Ok(value.map(SqlValue::Text).unwrap_or(SqlValue::Null))
                    })
                    .collect()
            })
            .collect()
    }

    async fn flag_stats(&self, table: &str, flag_column: &str) -> Result<FlagStats> {
        let sql = format!(
            "SELECT COUNT(*)::BIGINT, COALESCE(SUM(CASE WHEN {} = 1 THEN 1 ELSE 0 END), 0)::BIGINT FROM {}",
            quote_ident(flag_column),
            table
        );
        let row = self.client.query_one(&sql, &[]).await?;
        let total: i64 = row.try_get(0)?;
        let flagged: i64 = row.try_get(1)?;
        Ok(FlagStats {
            total: total as u64,
            flagged: flagged as u64,
        })
    }

    async fn fetch_claim_facts(&self) -> Result<Vec<ClaimFact>> {
        let rows = self
            .client
            .query(&claim_facts_sql(&self.analytics_view), &[])
            .await?;
        tracing::info!(view = %self.analytics_view, rows = rows.len(), "Fetched claim facts");
        rows.iter().map(claim_fact_from_row).collect()
    }

    async fn close(&self) -> Result<()> {
        let mut open = self.in_transaction.lock().await;
        if *open {
            self.client.batch_execute("ROLLBACK").await?;
            *open = false;
        }
        self.connection.abort();
        tracing::info!("Warehouse connection closed");
        Ok(())
    }
}
