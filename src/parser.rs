// 🏗️ Parser Framework - CSV exports → raw rows
// Column positions come from the export formats in schema.rs

use crate::schema::{Column, LayoutError, LinkFormat, PaymentFormat, PayoutFormat};
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

// ============================================================================
// EXPORT TABLE
// ============================================================================

/// A whole export file held in memory, with its header row indexed by name
pub struct ExportTable {
    source_file: String,
    header_index: Option<HashMap<String, usize>>,
    records: Vec<StringRecord>,
}

impl ExportTable {
    pub fn open(file_path: &Path, has_headers: bool) -> Result<Self> {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

        let filename = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv");

        Self::from_reader(file, filename, has_headers)
    }

    pub fn from_reader<R: Read>(reader: R, source_file: &str, has_headers: bool) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(has_headers)
            .flexible(true)
            .from_reader(reader);

        let header_index = if has_headers {
            let headers = reader
                .headers()
                .with_context(|| format!("Failed to read header row of {}", source_file))?;
            Some(
                headers
                    .iter()
                    .enumerate()
                    .map(|(index, name)| (name.trim().to_string(), index))
                    .collect(),
            )
        } else {
            None
        };

        let mut records = Vec::new();
        for (row_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| {
                format!(
                    "Failed to parse CSV line {} in {}",
                    first_data_line(has_headers) + row_num,
                    source_file
                )
            })?;
            records.push(record);
        }

        Ok(ExportTable {
            source_file: source_file.to_string(),
            header_index,
            records,
        })
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Resolve a column to its position; named columns need a header row
    pub fn column_index(&self, column: &Column) -> Result<usize, LayoutError> {
        match (column, &self.header_index) {
            (Column::Index(index), _) => Ok(*index),
            (Column::Name(name), Some(headers)) => {
                headers
                    .get(name)
                    .copied()
                    .ok_or_else(|| LayoutError::MissingColumn {
                        column: column.to_string(),
                        source_file: self.source_file.clone(),
                    })
            }
            (Column::Name(_), None) => Err(LayoutError::NoHeaderRow {
                column: column.to_string(),
                source_file: self.source_file.clone(),
            }),
        }
    }

    pub fn optional_column_index(&self, column: Option<&Column>) -> Result<Option<usize>, LayoutError> {
        column.map(|c| self.column_index(c)).transpose()
    }

    pub fn rows(&self) -> impl Iterator<Item = RawRow<'_>> {
        let first_line = first_data_line(self.header_index.is_some());
        self.records
            .iter()
            .enumerate()
            .map(move |(row_num, record)| RawRow {
                source_file: &self.source_file,
                line_number: first_line + row_num,
                record,
            })
    }
}

fn first_data_line(has_headers: bool) -> usize {
    if has_headers {
        2
    } else {
        1
    }
}

/// One data row plus where it came from
pub struct RawRow<'a> {
    source_file: &'a str,
    line_number: usize,
    record: &'a StringRecord,
}

impl<'a> RawRow<'a> {
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Value at a required column; a short row is an error
    pub fn get(&self, index: usize) -> Result<&'a str, LayoutError> {
        self.record
            .get(index)
            .map(str::trim)
            .ok_or_else(|| LayoutError::ShortRow {
                source_file: self.source_file.to_string(),
                line: self.line_number,
                index,
            })
    }

    /// Value at an optional column; absent column reads as empty
    pub fn get_optional(&self, index: Option<usize>) -> Result<&'a str, LayoutError> {
        match index {
            Some(index) => self.get(index),
            None => Ok(""),
        }
    }
}

// ============================================================================
// RAW RECORDS
// ============================================================================

/// Provenance shared by every raw record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub source_file: String,
    pub line_number: usize,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} line {}", self.source_file, self.line_number)
    }
}

impl From<&RawRow<'_>> for SourceLocation {
    fn from(row: &RawRow<'_>) -> Self {
        SourceLocation {
            source_file: row.source_file.to_string(),
            line_number: row.line_number,
        }
    }
}

/// RawPayment - one payment export row, still as strings.
/// Columns the export does not carry are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPayment {
    pub status: String,
    pub timestamp: String,
    pub amount: String,
    pub first_name: String,
    pub last_name: String,
    pub payment_method: String,
    pub transaction_id: String,
    pub email: String,
    pub tax: String,
    pub country_code: String,
    pub tax_number: String,
    pub vat_rate: String,
    pub ip_address: String,
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPayout {
    pub id: String,
    pub arrival_date: String,
    pub amount: String,
    pub status: String,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLink {
    pub payment_id: String,
    pub customer_id: String,
    pub timestamp: String,
    pub payout_id: String,
    pub status: String,
    pub location: SourceLocation,
}

// ============================================================================
// EXPORT PARSER TRAIT
// ============================================================================

/// ExportParser - turns an export table into raw records.
///
/// Implemented by each format description, so a new export version is a new
/// value of an existing format type rather than a new parser.
pub trait ExportParser {
    type Record;

    fn has_headers(&self) -> bool;

    fn parse_table(&self, table: &ExportTable) -> Result<Vec<Self::Record>>;

    fn parse(&self, file_path: &Path) -> Result<Vec<Self::Record>> {
        let table = ExportTable::open(file_path, self.has_headers())?;
        self.parse_table(&table)
    }
}

impl ExportParser for PaymentFormat {
    type Record = RawPayment;

    fn has_headers(&self) -> bool {
        self.has_headers
    }

    fn parse_table(&self, table: &ExportTable) -> Result<Vec<RawPayment>> {
        let c = &self.columns;
        let status = table.column_index(&c.status)?;
        let timestamp = table.column_index(&c.timestamp)?;
        let amount = table.column_index(&c.amount)?;
        let first_name = table.column_index(&c.first_name)?;
        let last_name = table.optional_column_index(c.last_name.as_ref())?;
        let payment_method = table.optional_column_index(c.payment_method.as_ref())?;
        let transaction_id = table.optional_column_index(c.transaction_id.as_ref())?;
        let email = table.optional_column_index(c.email.as_ref())?;
        let tax = table.optional_column_index(c.tax.as_ref())?;
        let country_code = table.optional_column_index(c.country_code.as_ref())?;
        let tax_number = table.optional_column_index(c.tax_number.as_ref())?;
        let vat_rate = table.optional_column_index(c.vat_rate.as_ref())?;
        let ip_address = table.optional_column_index(c.ip_address.as_ref())?;

        let mut payments = Vec::with_capacity(table.len());
        for row in table.rows() {
            payments.push(RawPayment {
                status: row.get(status)?.to_string(),
                timestamp: row.get(timestamp)?.to_string(),
                amount: row.get(amount)?.to_string(),
                first_name: row.get(first_name)?.to_string(),
                last_name: row.get_optional(last_name)?.to_string(),
                payment_method: row.get_optional(payment_method)?.to_string(),
                transaction_id: row.get_optional(transaction_id)?.to_string(),
                email: row.get_optional(email)?.to_string(),
                tax: row.get_optional(tax)?.to_string(),
                country_code: row.get_optional(country_code)?.to_string(),
                tax_number: row.get_optional(tax_number)?.to_string(),
                vat_rate: row.get_optional(vat_rate)?.to_string(),
                ip_address: row.get_optional(ip_address)?.to_string(),
                location: Some(SourceLocation::from(&row)),
            });
        }

        tracing::debug!(
            source = table.source_file(),
            format = %self.name,
            rows = payments.len(),
            "parsed payment export"
        );
        Ok(payments)
    }
}

impl ExportParser for PayoutFormat {
    type Record = RawPayout;

    fn has_headers(&self) -> bool {
        self.has_headers
    }

    fn parse_table(&self, table: &ExportTable) -> Result<Vec<RawPayout>> {
        let c = &self.columns;
        let id = table.column_index(&c.id)?;
        let arrival_date = table.column_index(&c.arrival_date)?;
        let amount = table.column_index(&c.amount)?;
        let status = table.column_index(&c.status)?;

        let mut payouts = Vec::with_capacity(table.len());
        for row in table.rows() {
            payouts.push(RawPayout {
                id: row.get(id)?.to_string(),
                arrival_date: row.get(arrival_date)?.to_string(),
                amount: row.get(amount)?.to_string(),
                status: row.get(status)?.to_string(),
                location: SourceLocation::from(&row),
            });
        }

        tracing::debug!(source = table.source_file(), rows = payouts.len(), "parsed payout export");
        Ok(payouts)
    }
}

impl ExportParser for LinkFormat {
    type Record = RawLink;

    fn has_headers(&self) -> bool {
        self.has_headers
    }

    fn parse_table(&self, table: &ExportTable) -> Result<Vec<RawLink>> {
        let c = &self.columns;
        let payment_id = table.column_index(&c.payment_id)?;
        let customer_id = table.column_index(&c.customer_id)?;
        let timestamp = table.column_index(&c.timestamp)?;
        let payout_id = table.column_index(&c.payout_id)?;
        let status = table.column_index(&c.status)?;

        let mut links = Vec::with_capacity(table.len());
        for row in table.rows() {
            links.push(RawLink {
                payment_id: row.get(payment_id)?.to_string(),
                customer_id: row.get(customer_id)?.to_string(),
                timestamp: row.get(timestamp)?.to_string(),
                payout_id: row.get(payout_id)?.to_string(),
                status: row.get(status)?.to_string(),
                location: SourceLocation::from(&row),
            });
        }

        tracing::debug!(source = table.source_file(), rows = links.len(), "parsed payment-to-payout export");
        Ok(links)
    }
}

// ============================================================================
// TESTS
// ============================================================================
