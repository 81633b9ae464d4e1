// sqlx error mapping onto the record store port's error

use provisioning_core::port::StoreError;

/// SQLite UNIQUE / PRIMARY KEY constraint failure (https://www.sqlite.org/rescode.html)
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some("2067") | Some("1555")
        ),
        _ => false,
    }
}

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => match code.as_ref() {
                // SQLITE_BUSY
                "5" => StoreError::Backend(format!("database locked: {}", db_err.message())),
                // SQLITE_FULL
                "13" => StoreError::Backend(format!("database full: {}", db_err.message())),
                other => StoreError::Backend(format!(
                    "database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            },
            None => StoreError::Backend(format!("database error: {}", db_err.message())),
        },
        sqlx::Error::ColumnNotFound(col) => StoreError::Backend(format!("column not found: {}", col)),
        // Connection, pool, protocol errors
        _ => StoreError::Backend(err.to_string()),
    }
}

pub(crate) fn corrupt_record(err: serde_json::Error) -> StoreError {
    StoreError::Backend(format!("corrupt job record: {}", err))
}
