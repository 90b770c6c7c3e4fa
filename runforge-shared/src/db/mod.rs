/// Database connectivity
///
/// - `pool`: PostgreSQL connection pool construction
/// - `migrations`: embedded sqlx migration runner

pub mod migrations;
pub mod pool;
