use std::str::FromStr;

use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;

use crate::store::postgres::{connect_with_options, migrate_with_options};

/// Environment variable holding the URL of the Postgres server used by database tests.
pub const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

/// Returns the options of the test server, `None` when database tests are disabled.
///
/// # Panics
///
/// Panics if the URL is set but invalid.
pub fn test_database_options() -> Option<PgConnectOptions> {
    let url = std::env::var(TEST_DATABASE_URL).ok()?;
    Some(PgConnectOptions::from_str(&url).expect("invalid TEST_DATABASE_URL"))
}

/// Creates a database with a random name on the test server, applies the migrations and
/// returns a pool connected to it.
///
/// # Panics
///
/// Panics if the server cannot be reached or the database cannot be prepared.
pub async fn spawn_test_database(options: PgConnectOptions) -> PgPool {
    let name = Uuid::new_v4().to_string();

    let mut connection = PgConnection::connect_with(&options)
        .await
        .expect("Failed to connect to the test server");
    connection
        .execute(format!(r#"create database "{name}""#).as_str())
        .await
        .expect("Failed to create the test database");

    let options = options.database(&name);
    migrate_with_options(options.clone())
        .await
        .expect("Failed to apply migrations");

    connect_with_options(options)
        .await
        .expect("Failed to connect to the test database")
}
