use std::io::Write;
use std::path::Path;

use csv::WriterBuilder;

use crate::error::ExtractError;
use crate::model::{CourseRecord, RECORD_COLUMNS};

/// Writes the fixed header row followed by one line per record. The header
/// is written even when there are no records.
pub fn write_records<W, I>(writer: W, records: I, delimiter: u8) -> Result<usize, ExtractError>
where
    W: Write,
    I: IntoIterator<Item = CourseRecord>,
{
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(writer);
    writer.write_record(RECORD_COLUMNS)?;
    let mut count = 0;
    for record in records {
        writer.serialize(&record)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

pub fn write_records_to_path<I>(path: &Path, records: I, delimiter: u8) -> Result<usize, ExtractError>
where
    I: IntoIterator<Item = CourseRecord>,
{
    let file = std::fs::File::create(path)?;
    write_records(std::io::BufWriter::new(file), records, delimiter)
}

pub fn write_records_to_string<I>(records: I, delimiter: u8) -> Result<String, ExtractError>
where
    I: IntoIterator<Item = CourseRecord>,
{
    let mut buffer = Vec::new();
    write_records(&mut buffer, records, delimiter)?;
    String::from_utf8(buffer)
        .map_err(|error| ExtractError::InvalidOption(format!("invalid utf-8 csv output: {error}")))
}
