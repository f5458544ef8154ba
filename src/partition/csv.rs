use crate::error::Error;
use crate::partition::consts::{
    BLOCK_SIZE,
    KB,
    MB,
};
use crate::partition::PartitionTable;

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    subtype: String,
    offset: String,
    size: String,
    flags: Option<String>,
}

/// Parse a partition table from CSV content in the canonical ESP-IDF form:
/// `name, type, subtype, offset, size, flags`, with `#`-prefixed comment
/// rows. Offsets and sizes accept decimal, hex and `M`/`K`/`B` suffixes.
///
/// The `type` column is informational: the subtype name alone determines
/// both type bytes. Rows are added through the normal `add_part` path (so an
/// empty offset auto-places the partition and an empty size fills the
/// remaining flash), then the table is checked.
pub(crate) fn parse_csv(content: &str, max_size: u32) -> Result<PartitionTable, Error> {
    let mut table = PartitionTable::new(max_size);
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .flexible(true)
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    for result in reader.deserialize() {
        let row: CsvRow = result?;
        let _ = row.ty;
        let offset = parse_size(&row.offset)?;
        let size = parse_size(&row.size)?;
        let flags = parse_size(row.flags.as_deref().unwrap_or(""))?;
        table.add_part(&row.name, &row.subtype, size, offset, flags)?;
    }
    table.check()?;
    Ok(table)
}

/// Serialize a partition table to CSV in the same form `parse_csv` accepts.
pub(crate) fn write_csv(table: &PartitionTable) -> Result<String, Error> {
    let mut out = String::from("# Name,Type,SubType,Offset,Size,Flags\n");
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    for p in table {
        writer.write_record([
            p.name(),
            p.type_name(),
            p.subtype_name(),
            format!("{:#x}", p.offset),
            format!("{:#x}", p.size),
            format!("{:#x}", p.flags),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    out.push_str(&String::from_utf8(bytes).expect("CSV output is UTF-8"));
    Ok(out)
}

/// Parse a size or offset argument: a decimal or hex (`0x`) number with an
/// optional unit suffix: `M` = megabytes, `K` = kilobytes, `B` = flash
/// blocks (0x1000 bytes). An empty string parses as 0.
///
/// Eg. `"8M"` is 8 megabytes, `"0x1fB"` is 31 blocks (0x1f000), `"4K"` is 4
/// kilobytes.
pub fn parse_size(arg: &str) -> Result<u32, Error> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Ok(0);
    }
    let upper = arg.to_ascii_uppercase();
    let (number, unit) = match upper.strip_suffix("MB").or_else(|| upper.strip_suffix('M')) {
        Some(n) => (n, MB),
        None => match upper.strip_suffix("KB").or_else(|| upper.strip_suffix('K')) {
            Some(n) => (n, KB),
            None => match upper.strip_suffix('B') {
                Some(n) => (n, BLOCK_SIZE),
                None => (upper.as_str(), 1),
            },
        },
    };
    let value = match number.strip_prefix("0X") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => number.parse::<u32>(),
    }
    .map_err(|_| Error::InvalidSizeArg(arg.to_string()))?;
    value
        .checked_mul(unit)
        .ok_or_else(|| Error::InvalidSizeArg(arg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::parse_size;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("").unwrap(), 0);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_size("8M").unwrap(), 8 * 0x100_000);
        assert_eq!(parse_size("4K").unwrap(), 4 * 0x400);
        assert_eq!(parse_size("0x1fB").unwrap(), 0x1F000);
        assert_eq!(parse_size("2MB").unwrap(), 2 * 0x100_000);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("12x4").is_err());
        assert!(parse_size("M").is_err());
    }
}
