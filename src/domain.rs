use csv::StringRecord;
use serde::{Deserialize, Serialize};

use crate::BatchError;

/// Column names of the `CUSTOMER` table, in positional order.
pub const CUSTOMER_COLUMNS: [&str; 6] = ["firstName", "lastName", "address", "city", "zip", "phone"];

/// Maximum length, in characters, of every customer field.
pub const MAX_FIELD_LENGTH: usize = 255;

/// One customer row of an import file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRecord {
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub city: String,
    pub zip: String,
    pub phone: String,
}

impl CustomerRecord {
    /// Maps a delimited row to a customer.
    ///
    /// `row` is the 1-based data row number, used in error messages.
    ///
    /// # Errors
    /// `BatchError::Parse` when the row does not have exactly six fields or a
    /// field is longer than [`MAX_FIELD_LENGTH`].
    pub fn from_record(row: usize, record: &StringRecord) -> Result<Self, BatchError> {
        if record.len() != CUSTOMER_COLUMNS.len() {
            return Err(BatchError::Parse {
                row,
                reason: format!(
                    "expected {} fields, found {}",
                    CUSTOMER_COLUMNS.len(),
                    record.len()
                ),
            });
        }

        for (column, value) in CUSTOMER_COLUMNS.iter().zip(record.iter()) {
            let length = value.chars().count();
            if length > MAX_FIELD_LENGTH {
                return Err(BatchError::Parse {
                    row,
                    reason: format!(
                        "{column} is {length} characters long, the maximum is {MAX_FIELD_LENGTH}"
                    ),
                });
            }
        }

        Ok(Self {
            first_name: record[0].to_string(),
            last_name: record[1].to_string(),
            address: record[2].to_string(),
            city: record[3].to_string(),
            zip: record[4].to_string(),
            phone: record[5].to_string(),
        })
    }
}
