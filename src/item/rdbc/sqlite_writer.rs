use std::sync::Arc;

use sqlx::{Pool, QueryBuilder, Sqlite, query_builder::Separated};
use tokio::runtime::Handle;

use crate::BatchError;
use crate::core::item::{ItemWriter, ItemWriterFactory, ItemWriterResult};
use crate::core::partition::Partition;
use crate::domain::{CUSTOMER_COLUMNS, CustomerRecord};
use crate::item::rdbc::DatabaseItemBinder;

// SQLITE_MAX_VARIABLE_NUMBER of the bundled SQLite
const BIND_LIMIT: usize = 32766;

type SharedBinder<O> = Arc<dyn DatabaseItemBinder<O, Sqlite> + Send + Sync>;

/// Binds the six customer fields positionally.
#[derive(Debug, Default, Clone, Copy)]
pub struct CustomerBinder;

impl DatabaseItemBinder<CustomerRecord, Sqlite> for CustomerBinder {
    fn bind(&self, item: &CustomerRecord, mut query_builder: Separated<Sqlite, &str>) {
        query_builder.push_bind(item.first_name.clone());
        query_builder.push_bind(item.last_name.clone());
        query_builder.push_bind(item.address.clone());
        query_builder.push_bind(item.city.clone());
        query_builder.push_bind(item.zip.clone());
        query_builder.push_bind(item.phone.clone());
    }
}

/// A writer inserting items into a SQLite table using SQLx.
///
/// Every call to `write` runs in its own transaction: the chunk is either
/// fully inserted or not at all. Chunks larger than the bind limit are split
/// into several statements inside that transaction.
///
/// The writer drives SQLx from synchronous code through a runtime [`Handle`].
/// It must be called from a thread that is not itself running async code,
/// and the handle must belong to a multi-thread runtime.
pub struct SqliteItemWriter<O> {
    pool: Pool<Sqlite>,
    handle: Handle,
    table: String,
    columns: Vec<String>,
    item_binder: SharedBinder<O>,
}

impl<O> ItemWriter<O> for SqliteItemWriter<O> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        if items.is_empty() {
            return Ok(());
        }

        let rows_per_statement = (BIND_LIMIT / self.columns.len()).max(1);

        let result = self.handle.block_on(async {
            let mut transaction = self.pool.begin().await?;

            for rows in items.chunks(rows_per_statement) {
                let mut query_builder: QueryBuilder<Sqlite> = QueryBuilder::new("INSERT INTO ");
                query_builder.push(&self.table);
                query_builder.push(" (");
                query_builder.push(self.columns.join(","));
                query_builder.push(") ");
                query_builder.push_values(rows, |b, item| {
                    self.item_binder.bind(item, b);
                });

                query_builder.build().execute(&mut *transaction).await?;
            }

            transaction.commit().await
        });

        match result {
            Ok(()) => {
                log::debug!(
                    "Successfully wrote {} items to SQLite table {}",
                    items.len(),
                    self.table
                );
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to write items to SQLite table {}: {}", self.table, e);
                Err(BatchError::Write(format!("SQLite write failed: {}", e)))
            }
        }
    }
}

/// Builder for [`SqliteItemWriter`].
///
/// # Examples
///
/// ```no_run
/// use batch_import::item::rdbc::{CustomerBinder, SqliteItemWriterBuilder};
/// use batch_import::domain::CustomerRecord;
/// use sqlx::SqlitePool;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = tokio::runtime::Runtime::new()?;
/// let pool = runtime.block_on(SqlitePool::connect("sqlite://customers.db"))?;
///
/// let writer = SqliteItemWriterBuilder::<CustomerRecord>::new()
///     .pool(pool)
///     .handle(runtime.handle().clone())
///     .table("CUSTOMER")
///     .add_column("firstName")
///     .add_column("lastName")
///     .item_binder(CustomerBinder)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SqliteItemWriterBuilder<O> {
    pool: Option<Pool<Sqlite>>,
    handle: Option<Handle>,
    table: Option<String>,
    columns: Vec<String>,
    item_binder: Option<SharedBinder<O>>,
}

impl<O> Default for SqliteItemWriterBuilder<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> SqliteItemWriterBuilder<O> {
    pub fn new() -> Self {
        Self {
            pool: None,
            handle: None,
            table: None,
            columns: Vec::new(),
            item_binder: None,
        }
    }

    /// Sets the connection pool. Required.
    pub fn pool(mut self, pool: Pool<Sqlite>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Sets the runtime driving the pool. Required.
    pub fn handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Sets the target table. Required.
    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    /// Adds a column; columns are bound in the order they are added.
    pub fn add_column(mut self, column: &str) -> Self {
        self.columns.push(column.to_string());
        self
    }

    /// Sets the item binder. Required.
    pub fn item_binder<B>(mut self, item_binder: B) -> Self
    where
        B: DatabaseItemBinder<O, Sqlite> + Send + Sync + 'static,
    {
        self.item_binder = Some(Arc::new(item_binder));
        self
    }

    fn shared_binder(mut self, item_binder: SharedBinder<O>) -> Self {
        self.item_binder = Some(item_binder);
        self
    }

    /// # Errors
    /// `BatchError::Configuration` when a required parameter is missing.
    pub fn build(self) -> Result<SqliteItemWriter<O>, BatchError> {
        let missing = |what: &str| BatchError::Configuration(format!("{what} is mandatory"));

        if self.columns.is_empty() {
            return Err(BatchError::Configuration(
                "One or more columns are required".to_string(),
            ));
        }

        Ok(SqliteItemWriter {
            pool: self.pool.ok_or_else(|| missing("Pool"))?,
            handle: self.handle.ok_or_else(|| missing("Runtime handle"))?,
            table: self.table.ok_or_else(|| missing("Table name"))?,
            columns: self.columns,
            item_binder: self.item_binder.ok_or_else(|| missing("Item binder"))?,
        })
    }
}

/// Creates one [`SqliteItemWriter`] per partition over a shared pool.
///
/// Each writer checks out its own connection for every chunk it commits.
pub struct SqliteWriterFactory<O> {
    pool: Pool<Sqlite>,
    handle: Handle,
    table: String,
    columns: Vec<String>,
    item_binder: SharedBinder<O>,
}

impl<O> SqliteWriterFactory<O> {
    pub fn new<B>(pool: Pool<Sqlite>, handle: Handle, table: &str, columns: &[&str], item_binder: B) -> Self
    where
        B: DatabaseItemBinder<O, Sqlite> + Send + Sync + 'static,
    {
        Self {
            pool,
            handle,
            table: table.to_string(),
            columns: columns.iter().map(|column| column.to_string()).collect(),
            item_binder: Arc::new(item_binder),
        }
    }
}

impl SqliteWriterFactory<CustomerRecord> {
    /// Factory writing customers to `table` with the standard column layout.
    pub fn customers(pool: Pool<Sqlite>, handle: Handle, table: &str) -> Self {
        Self::new(pool, handle, table, &CUSTOMER_COLUMNS, CustomerBinder)
    }
}

impl<O: 'static> ItemWriterFactory<O> for SqliteWriterFactory<O> {
    fn create(&self, partition: &Partition) -> Result<Box<dyn ItemWriter<O>>, BatchError> {
        log::debug!(
            "Creating SQLite writer on {} for partition {}",
            self.table,
            partition.index
        );

        let builder = self
            .columns
            .iter()
            .fold(SqliteItemWriterBuilder::new(), |builder, column| builder.add_column(column))
            .pool(self.pool.clone())
            .handle(self.handle.clone())
            .table(&self.table)
            .shared_binder(Arc::clone(&self.item_binder));

        Ok(Box::new(builder.build()?))
    }
}

/// Creates the customer table when it does not exist yet.
///
/// `table` is interpolated as is and must be a plain identifier.
pub async fn create_customer_table(pool: &Pool<Sqlite>, table: &str) -> Result<(), BatchError> {
    let columns = CUSTOMER_COLUMNS
        .iter()
        .map(|column| format!("{column} TEXT NOT NULL"))
        .collect::<Vec<_>>()
        .join(", ");

    sqlx::query(&format!("CREATE TABLE IF NOT EXISTS {table} ({columns})"))
        .execute(pool)
        .await
        .map_err(|e| BatchError::Write(format!("Cannot create table {table}: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
    use tokio::runtime::Runtime;

    use super::*;

    const CREATE_CUSTOMER: &str = r#"
        CREATE TABLE CUSTOMER (
            firstName TEXT NOT NULL,
            lastName TEXT NOT NULL,
            address TEXT NOT NULL,
            city TEXT NOT NULL,
            zip TEXT NOT NULL,
            phone TEXT NOT NULL UNIQUE
        )
    "#;

    fn setup_test_db(runtime: &Runtime) -> SqlitePool {
        runtime.block_on(async {
            // A single connection keeps the in-memory database alive and shared
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .unwrap();
            sqlx::query(CREATE_CUSTOMER).execute(&pool).await.unwrap();
            pool
        })
    }

    fn count(runtime: &Runtime, pool: &SqlitePool) -> i64 {
        runtime.block_on(async {
            sqlx::query_scalar("SELECT COUNT(*) FROM CUSTOMER")
                .fetch_one(pool)
                .await
                .unwrap()
        })
    }

    fn customer(i: usize) -> CustomerRecord {
        CustomerRecord {
            first_name: format!("First{i}"),
            last_name: format!("Last{i}"),
            address: format!("{i} Main Street"),
            city: "Springfield".to_string(),
            zip: "12345".to_string(),
            phone: format!("555-{i:04}"),
        }
    }

    fn partition() -> Partition {
        Partition {
            index: 0,
            file: PathBuf::from("/tmp/inbound/customers.csv"),
        }
    }

    #[test]
    fn builder_validation() {
        let result = SqliteItemWriterBuilder::<CustomerRecord>::new()
            .table("CUSTOMER")
            .build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));

        let runtime = Runtime::new().unwrap();
        let pool = setup_test_db(&runtime);
        let result = SqliteItemWriterBuilder::<CustomerRecord>::new()
            .pool(pool)
            .handle(runtime.handle().clone())
            .add_column("firstName")
            .item_binder(CustomerBinder)
            .build();
        assert!(matches!(result, Err(BatchError::Configuration(msg)) if msg.contains("Table")));
    }

    #[test]
    fn writes_a_chunk_in_one_transaction() {
        let runtime = Runtime::new().unwrap();
        let pool = setup_test_db(&runtime);
        let factory = SqliteWriterFactory::customers(pool.clone(), runtime.handle().clone(), "CUSTOMER");
        let writer = factory.create(&partition()).unwrap();

        let customers: Vec<CustomerRecord> = (0..400).map(customer).collect();
        writer.write(&customers).unwrap();
        writer.write(&[]).unwrap();

        assert_eq!(count(&runtime, &pool), 400);

        let first: String = runtime.block_on(async {
            sqlx::query_scalar("SELECT firstName FROM CUSTOMER WHERE phone = '555-0007'")
                .fetch_one(&pool)
                .await
                .unwrap()
        });
        assert_eq!(first, "First7");
    }

    #[test]
    fn failed_chunk_is_rolled_back_and_earlier_chunks_stay() {
        let runtime = Runtime::new().unwrap();
        let pool = setup_test_db(&runtime);
        let factory = SqliteWriterFactory::customers(pool.clone(), runtime.handle().clone(), "CUSTOMER");
        let writer = factory.create(&partition()).unwrap();

        writer.write(&[customer(1), customer(2)]).unwrap();

        // The second row repeats a unique phone number
        let result = writer.write(&[customer(3), customer(1)]);

        match result {
            Err(BatchError::Write(msg)) => assert!(msg.contains("SQLite write failed")),
            other => panic!("expected a write error, got {other:?}"),
        }
        assert_eq!(count(&runtime, &pool), 2);
    }
}
