/// Delimited-file support for the customer import.
///
/// The reader skips exactly one header line, trims every field, and maps each
/// remaining row to a [`CustomerRecord`](crate::domain::CustomerRecord). Rows
/// are checked for their field count by the mapper rather than by the CSV
/// parser, so a malformed row is reported with its row number.
///
/// # Examples
///
/// ```
/// use batch_import::item::csv::customer_reader::CustomerItemReaderBuilder;
/// use batch_import::core::item::ItemReader;
///
/// let data = "\
/// firstName,lastName,address,city,zip,phone
/// Ada,Lovelace,12 St James's Square,London,SW1Y,555-0100
/// ";
///
/// let reader = CustomerItemReaderBuilder::new().from_reader(data.as_bytes());
///
/// let customer = reader.read().unwrap().unwrap();
/// assert_eq!(customer.first_name, "Ada");
/// assert!(reader.read().unwrap().is_none());
/// ```

/// A module providing the customer record reader.
pub mod customer_reader;
