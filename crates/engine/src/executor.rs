use crate::error::DbError;
use async_trait::async_trait;
use chrono::NaiveDate;
use model::{core::value::Value, records::row::Row};
use mysql_async::{Pool, Value as MySqlValue, prelude::*};
use mysql_common::{constants::ColumnType, params::Params};
use tracing::{debug, error};

/// Runs compiled selector SQL. Queries are read-only and run outside any
/// transaction.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError>;
}

#[derive(Clone)]
pub struct MySqlExecutor {
    pool: Pool,
}

impl MySqlExecutor {
    pub fn new(pool: Pool) -> Self {
        MySqlExecutor { pool }
    }

    pub fn from_url(url: &str) -> Result<Self, DbError> {
        let opts = mysql_async::Opts::from_url(url).map_err(|e| {
            error!("MySQL connection string parse failed: {}", e);
            DbError::MySql(mysql_async::Error::Url(e))
        })?;
        Ok(Self::new(Pool::new(opts)))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn disconnect(self) -> Result<(), DbError> {
        self.pool.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl QueryExecutor for MySqlExecutor {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<mysql_async::Row> = conn
            .exec(sql, MySqlParams::from_values(params).into_params())
            .await
            .map_err(|source| DbError::Query {
                sql: sql.to_string(),
                source,
            })?;
        debug!("Fetched {} row(s)", rows.len());

        rows.iter().map(convert_row).collect()
    }
}

/// Stands in for a database when selectors are only compiled.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineExecutor;

#[async_trait]
impl QueryExecutor for OfflineExecutor {
    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>, DbError> {
        Err(DbError::Unavailable)
    }
}

/// Positional parameters in the driver's representation.
pub struct MySqlParams(Vec<MySqlValue>);

impl MySqlParams {
    pub fn from_values(values: &[Value]) -> Self {
        MySqlParams(values.iter().map(to_mysql_value).collect())
    }

    pub fn into_params(self) -> Params {
        if self.0.is_empty() {
            Params::Empty
        } else {
            Params::Positional(self.0)
        }
    }
}

fn to_mysql_value(value: &Value) -> MySqlValue {
    use chrono::{Datelike, Timelike};

    match value {
        Value::Int(i) => MySqlValue::Int(*i),
        Value::Uint(u) => MySqlValue::UInt(*u),
        Value::Float(f) => MySqlValue::Double(*f),
        Value::String(s) => MySqlValue::Bytes(s.clone().into_bytes()),
        Value::Boolean(b) => MySqlValue::Int(i64::from(*b)),
        Value::Bytes(b) => MySqlValue::Bytes(b.clone()),
        Value::Date(d) => MySqlValue::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Timestamp(ts) => MySqlValue::Date(
            ts.year() as u16,
            ts.month() as u8,
            ts.day() as u8,
            ts.hour() as u8,
            ts.minute() as u8,
            ts.second() as u8,
            ts.and_utc().timestamp_subsec_micros(),
        ),
        Value::Null => MySqlValue::NULL,
    }
}

fn convert_row(row: &mysql_async::Row) -> Result<Row, DbError> {
    let mut converted = Row::default();
    for (index, column) in row.columns_ref().iter().enumerate() {
        let name = column.name_str().into_owned();
        let value = match row.as_ref(index) {
            Some(raw) => from_mysql_value(raw, column.column_type(), &name)?,
            None => Value::Null,
        };
        converted.push(name, value);
    }
    Ok(converted)
}

fn from_mysql_value(raw: &MySqlValue, column_type: ColumnType, column: &str) -> Result<Value, DbError> {
    let value = match raw {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Int(i) => Value::Int(*i),
        MySqlValue::UInt(u) => Value::Uint(*u),
        MySqlValue::Float(f) => Value::Float(f64::from(*f)),
        MySqlValue::Double(f) => Value::Float(*f),
        MySqlValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::Bytes(bytes.clone()),
        },
        MySqlValue::Date(year, month, day, hour, minute, second, micros) => {
            // Zero dates (`0000-00-00`) have no calendar representation.
            let Some(date) = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day)) else {
                return Ok(Value::Null);
            };
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                Value::Date(date)
            } else {
                let timestamp = date
                    .and_hms_micro_opt(u32::from(*hour), u32::from(*minute), u32::from(*second), *micros)
                    .ok_or_else(|| DbError::Conversion {
                        column: column.to_string(),
                        message: format!("invalid time {hour}:{minute}:{second}.{micros}"),
                    })?;
                Value::Timestamp(timestamp)
            }
        }
        MySqlValue::Time(negative, days, hours, minutes, seconds, _) => {
            let total_hours = u32::from(*hours) + days * 24;
            let sign = if *negative { "-" } else { "" };
            Value::String(format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}"))
        }
    };
    Ok(value)
}
