use sqlx::PgPool;

/// Runs the SQL query objects defined across the crate.
///
/// Each query is a plain struct with a `kanau::processor::Processor`
/// implementation on this type, so callers hold one value and pick the
/// query by its input type.
#[derive(Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
