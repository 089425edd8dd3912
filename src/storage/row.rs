//! Engine-agnostic values and rows.
//!
//! Executors convert driver rows into [`Row`] before handing them out, so the
//! repository scans results the same way regardless of the backing engine.

use crate::storage::{StorageError, StorageResult};
use tokio::sync::mpsc;

/// A single bound argument or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Conversion from a single result cell.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> StorageResult<Self>;
}

fn mismatch(expected: &str, found: &Value) -> StorageError {
    StorageError::Decode(format!("expected {expected}, found {}", found.kind()))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Integer(v) => Ok(*v),
            other => Err(mismatch("INTEGER", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> StorageResult<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide)
            .map_err(|_| StorageError::Decode(format!("integer {wide} out of range for i32")))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Integer(0) => Ok(false),
            Value::Integer(1) => Ok(true),
            other => Err(mismatch("0 or 1", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Real(v) => Ok(*v),
            Value::Integer(v) => Ok(*v as f64),
            other => Err(mismatch("REAL", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Text(v) => Ok(v.clone()),
            other => Err(mismatch("TEXT", other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Blob(v) => Ok(v.clone()),
            Value::Text(v) => Ok(v.as_bytes().to_vec()),
            other => Err(mismatch("BLOB", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// A fully materialized result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get<T: FromValue>(&self, idx: usize) -> StorageResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            StorageError::Decode(format!(
                "column index {idx} out of bounds for row of {} columns",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    pub fn get_by_name<T: FromValue>(&self, name: &str) -> StorageResult<T> {
        let idx = self
            .columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| StorageError::Decode(format!("no column named '{name}'")))?;
        self.get(idx)
    }
}

/// Conversion from a whole row.
///
/// Tuple implementations require the row to have exactly as many columns as
/// the tuple has fields.
pub trait Scan: Sized {
    fn scan(row: &Row) -> StorageResult<Self>;
}

macro_rules! impl_scan_tuple {
    ($($idx:tt => $ty:ident),+) => {
        impl<$($ty: FromValue),+> Scan for ($($ty,)+) {
            fn scan(row: &Row) -> StorageResult<Self> {
                let expected = [$($idx),+].len();
                if row.len() != expected {
                    return Err(StorageError::Decode(format!(
                        "expected {expected} columns, found {}",
                        row.len()
                    )));
                }
                Ok(($(row.get::<$ty>($idx)?,)+))
            }
        }
    };
}

impl_scan_tuple!(0 => A);
impl_scan_tuple!(0 => A, 1 => B);
impl_scan_tuple!(0 => A, 1 => B, 2 => C);
impl_scan_tuple!(0 => A, 1 => B, 2 => C, 3 => D);
impl_scan_tuple!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E);
impl_scan_tuple!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F);

/// Cursor over the rows of a multi-row query.
///
/// Rows arrive from the executor one at a time as [`Rows::advance`] is
/// awaited. Call it before every [`Rows::scan`]; once it returns `false`
/// check [`Rows::err`] for a failure that cut iteration short. An open cursor
/// may hold a pooled connection until it is drained or closed.
#[derive(Debug)]
pub struct Rows {
    receiver: Option<mpsc::Receiver<StorageResult<Row>>>,
    peeked: Option<Row>,
    current: Option<Row>,
    failure: Option<StorageError>,
}

impl Rows {
    /// Wrap a channel fed by the executor. `first` is a row already taken off
    /// the channel while checking that the statement started cleanly.
    pub fn new(receiver: mpsc::Receiver<StorageResult<Row>>, first: Option<Row>) -> Self {
        Self {
            receiver: Some(receiver),
            peeked: first,
            current: None,
            failure: None,
        }
    }

    /// A cursor over rows that are already in memory, optionally ending in
    /// `failure`.
    pub fn from_rows(rows: Vec<Row>, failure: Option<StorageError>) -> Self {
        let (tx, rx) = mpsc::channel(rows.len() + 1);
        for row in rows {
            let _ = tx.try_send(Ok(row));
        }
        if let Some(err) = failure {
            let _ = tx.try_send(Err(err));
        }
        Self::new(rx, None)
    }

    /// Move to the next row. Returns `false` once exhausted, failed or closed.
    pub async fn advance(&mut self) -> bool {
        self.current = self.peeked.take();
        if self.current.is_some() {
            return true;
        }

        let Some(receiver) = self.receiver.as_mut() else {
            return false;
        };
        match receiver.recv().await {
            Some(Ok(row)) => {
                self.current = Some(row);
                true
            }
            Some(Err(err)) => {
                self.failure = Some(err);
                self.receiver = None;
                false
            }
            None => {
                self.receiver = None;
                false
            }
        }
    }

    pub fn scan<T: Scan>(&self) -> StorageResult<T> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| StorageError::Decode("scan called without a current row".to_string()))?;
        T::scan(row)
    }

    /// Stop reading. The producer sees the dropped receiver and releases its
    /// connection.
    pub fn close(&mut self) {
        self.receiver = None;
        self.peeked = None;
        self.current = None;
    }

    pub fn err(&self) -> Option<&StorageError> {
        self.failure.as_ref()
    }

    /// Drain the cursor, scanning every remaining row.
    pub async fn scan_all<T: Scan>(mut self) -> StorageResult<Vec<T>> {
        let mut out = Vec::new();
        while self.advance().await {
            out.push(self.scan()?);
        }
        match self.failure {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }
}

/// Handle returned by single-row queries. Execution errors are deferred to
/// [`SingleRow::scan`], and an empty result scans as [`StorageError::NotFound`].
#[derive(Debug)]
pub struct SingleRow {
    result: StorageResult<Option<Row>>,
}

impl SingleRow {
    pub fn new(result: StorageResult<Option<Row>>) -> Self {
        Self { result }
    }

    pub fn scan<T: Scan>(self) -> StorageResult<T> {
        match self.result? {
            Some(row) => T::scan(&row),
            None => Err(StorageError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        Row::new(
            vec!["id".into(), "code".into(), "note".into()],
            vec![Value::Integer(7), Value::Text("abc".into()), Value::Null],
        )
    }

    #[test]
    fn test_scan_tuple_matches_columns() {
        let (id, code, note) = <(i64, String, Option<String>)>::scan(&sample_row()).unwrap();
        assert_eq!(id, 7);
        assert_eq!(code, "abc");
        assert_eq!(note, None);
    }

    #[test]
    fn test_scan_rejects_column_count_mismatch() {
        let err = <(i64, String)>::scan(&sample_row()).unwrap_err();
        assert!(matches!(err, StorageError::Decode(_)));
    }

    #[test]
    fn test_type_mismatch_is_decode_error() {
        let row = sample_row();
        assert!(matches!(row.get::<i64>(1), Err(StorageError::Decode(_))));
        assert!(matches!(row.get::<String>(2), Err(StorageError::Decode(_))));
        assert!(matches!(row.get::<i64>(9), Err(StorageError::Decode(_))));
    }

    #[test]
    fn test_get_by_name() {
        let row = sample_row();
        assert_eq!(row.get_by_name::<String>("code").unwrap(), "abc");
        assert!(row.get_by_name::<String>("missing").is_err());
    }

    #[test]
    fn test_bool_and_narrow_integers() {
        assert!(bool::from_value(&Value::Integer(1)).unwrap());
        assert!(!bool::from_value(&Value::Integer(0)).unwrap());
        assert!(bool::from_value(&Value::Integer(2)).is_err());
        assert!(i32::from_value(&Value::Integer(i64::MAX)).is_err());
        assert_eq!(f64::from_value(&Value::Integer(3)).unwrap(), 3.0);
    }

    #[test]
    fn test_option_arguments_become_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert_eq!(Value::from(true), Value::Integer(1));
    }

    #[tokio::test]
    async fn test_cursor_advances_then_stops() {
        let rows = vec![
            Row::new(vec!["n".into()], vec![Value::Integer(1)]),
            Row::new(vec!["n".into()], vec![Value::Integer(2)]),
        ];
        let mut cursor = Rows::from_rows(rows, None);

        assert!(cursor.scan::<(i64,)>().is_err());
        assert!(cursor.advance().await);
        assert_eq!(cursor.scan::<(i64,)>().unwrap(), (1,));
        assert!(cursor.advance().await);
        assert_eq!(cursor.scan::<(i64,)>().unwrap(), (2,));
        assert!(!cursor.advance().await);
        assert!(cursor.err().is_none());
    }

    #[tokio::test]
    async fn test_peeked_row_comes_first() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Row::new(vec!["n".into()], vec![Value::Integer(2)])))
            .await
            .unwrap();
        drop(tx);

        let first = Row::new(vec!["n".into()], vec![Value::Integer(1)]);
        let values = Rows::new(rx, Some(first))
            .scan_all::<(i64,)>()
            .await
            .unwrap();
        assert_eq!(values, vec![(1,), (2,)]);
    }

    #[tokio::test]
    async fn test_closed_cursor_yields_nothing() {
        let rows = vec![Row::new(vec!["n".into()], vec![Value::Integer(1)])];
        let mut cursor = Rows::from_rows(rows, None);
        cursor.close();
        assert!(!cursor.advance().await);
    }

    #[tokio::test]
    async fn test_close_releases_producer() {
        let (tx, rx) = mpsc::channel(1);
        let mut cursor = Rows::new(rx, None);
        cursor.close();
        assert!(tx
            .send(Ok(Row::new(vec![], vec![])))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_scan_all_surfaces_iteration_failure() {
        let rows = vec![Row::new(vec!["n".into()], vec![Value::Integer(1)])];
        let cursor = Rows::from_rows(rows, Some(StorageError::Decode("bad cell".into())));
        assert!(matches!(
            cursor.scan_all::<(i64,)>().await,
            Err(StorageError::Decode(_))
        ));
    }

    #[test]
    fn test_single_row_empty_is_not_found() {
        let err = SingleRow::new(Ok(None)).scan::<(i64,)>().unwrap_err();
        assert!(err.is_not_found());

        let err = SingleRow::new(Err(StorageError::Timeout))
            .scan::<(i64,)>()
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
