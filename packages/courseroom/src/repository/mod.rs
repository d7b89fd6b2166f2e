// Repository layer: each domain lives in its own file with `impl CourseRepository`.

use sqlx::sqlite::SqlitePool;

mod courses;
mod messages;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct CourseRepository {
    pub(crate) pool: SqlitePool,
}

impl CourseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
