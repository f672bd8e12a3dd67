use sqlx::{Database, query_builder::Separated};

/// This module contains the SQLite writer implementation.
pub mod sqlite_writer;

/// Trait for binding item data to database query parameters.
///
/// This trait is generic over the database type so that one binder
/// abstraction serves every SQLx backend.
///
/// # Type Parameters
///
/// * `O` - The item type to bind
/// * `DB` - The SQLx database type (e.g., `Sqlite`)
///
/// # Examples
///
/// ```no_run
/// use batch_import::item::rdbc::DatabaseItemBinder;
/// use sqlx::{query_builder::Separated, Sqlite};
///
/// struct User {
///     id: i32,
///     name: String,
/// }
///
/// struct UserBinder;
/// impl DatabaseItemBinder<User, Sqlite> for UserBinder {
///     fn bind(&self, item: &User, mut query_builder: Separated<Sqlite, &str>) {
///         query_builder.push_bind(item.id);
///         query_builder.push_bind(item.name.clone());
///     }
/// }
/// ```
pub trait DatabaseItemBinder<O, DB: Database> {
    /// Binds the properties of an item to a separated query builder.
    ///
    /// # Arguments
    ///
    /// * `item` - The item whose properties should be bound.
    /// * `query_builder` - The separated query builder to bind parameters to.
    fn bind(&self, item: &O, query_builder: Separated<DB, &str>);
}

pub use sqlite_writer::{
    CustomerBinder, SqliteItemWriter, SqliteItemWriterBuilder, SqliteWriterFactory,
    create_customer_table,
};
