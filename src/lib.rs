#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Batch Import

 A batch job importing zipped customer files into a relational database, built
 on the chunk-oriented processing model of Spring Batch.

 ## Core Concepts

- **ImportPipeline:** the orchestrator. It extracts the archives of an import
  request, partitions the extracted files and dispatches one worker per
  partition, recording every phase in a `JobRunState`.
- **Partition:** one input file. Partitions are independent: a failed partition
  never stops the others.
- **PartitionLauncher:** runs one partition and reports its result, either on a
  thread of the current process or in a separate worker process.
- **Step:** reads items one at a time with an `ItemReader` and hands them to an
  `ItemWriter` in chunks. A chunk is committed as a whole.

 ## Features

| **Feature**   | **Description**                                                |
|---------------|----------------------------------------------------------------|
| rdbc-sqlite   | Enables the SQLite `ItemWriter` for customer records           |
| ftp           | Enables synchronizing the inbound directory from an FTP server |
| logger        | Enables a logger `ItemWriter`, useful for dry runs             |
| cli           | Builds the `import-job` binary                                 |
| full          | Enables all available features                                 |

 ## Getting Started

```rust
# use std::{fs::File, io::Write, sync::{Arc, Mutex}};
# use batch_import::{
#     core::{item::ItemWriter, job::{ImportRequest, JobPhase, RunProfile}, partition::Partition},
#     domain::CustomerRecord,
#     loader::RecordTransformLoader,
#     pipeline::ImportPipeline,
#     BatchError,
# };
# struct Collector(Arc<Mutex<Vec<CustomerRecord>>>);
# impl ItemWriter<CustomerRecord> for Collector {
#     fn write(&self, items: &[CustomerRecord]) -> Result<(), BatchError> {
#         self.0.lock().unwrap().extend_from_slice(items);
#         Ok(())
#     }
# }
fn main() -> Result<(), BatchError> {
    let inbound = tempfile::tempdir()?;
    let archive = inbound.path().join("customers.zip");

    let mut zip = zip::ZipWriter::new(File::create(&archive)?);
    zip.start_file("customers.csv", zip::write::SimpleFileOptions::default())
        .map_err(|e| BatchError::Io(std::io::Error::other(e)))?;
    zip.write_all(b"firstName,lastName,address,city,zip,phone\nAda,Lovelace,12 St James's Square,London,SW1Y,555-0100\n")?;
    zip.finish().map_err(|e| BatchError::Io(std::io::Error::other(e)))?;

    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);

    let loader = RecordTransformLoader::builder()
        .writer_factory(move |_: &Partition| -> Result<Box<dyn ItemWriter<CustomerRecord>>, BatchError> {
            Ok(Box::new(Collector(Arc::clone(&sink))))
        })
        .chunk_size(400)
        .build()?;

    let pipeline = ImportPipeline::builder()
        .launcher(loader)
        .build()?;

    let request = ImportRequest::new(vec![archive.display().to_string()], RunProfile::Orchestrator)?;
    let state = pipeline.run(&request);

    assert_eq!(state.phase(), JobPhase::Completed);
    assert_eq!(records.lock().unwrap()[0].last_name, "Lovelace");

    Ok(())
}
```
 */

/// Configuration of the import job
pub mod config;

/// Core module for batch operations
pub mod core;

/// Customer records
pub mod domain;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Archive extraction
pub mod extract;

/// Inbound directory polling
pub mod inbound;

/// Set of items readers / writers
pub mod item;

/// Task launch requests and worker processes
pub mod launch;

/// Partition loading
pub mod loader;

/// The import orchestrator
pub mod pipeline;
