//! CSV record codec for bulk alert import and export.
//!
//! The interchange format is comma separated with double-quote quoting and
//! doubled-quote escaping. The first row is the header; its width is the
//! canonical row width. Short rows are padded with empty cells and extra cells
//! are dropped. Cell-level problems never abort an import: they degrade to a
//! default value and are reported as [`RowWarning`]s. Only an unreadable header
//! is fatal.
//!
//! A double quote opens a quoted section only at the start of a cell. Anywhere
//! else it is a literal character and does not hide delimiters, so `a"b,c"d`
//! is the two cells `a"b` and `c"d`.

use crate::error::{Error, Result};
use crate::record::Alert;
use std::fmt;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

/// Canonical export column order.
pub const CANONICAL_HEADERS: [&str; 17] = [
    "Status",
    "Verification Status",
    "Alert Name",
    "Timestamp",
    "Tenant",
    "Kill Chain Stage",
    "Technique",
    "SRC IP",
    "SRC IP Type",
    "SRC Geo Code",
    "Destination IP",
    "DST IP Type",
    "DST Geo Code",
    "Source Host",
    "Description",
    "Remarks",
    "Links",
];

/// Cell format for timestamps (`MM/DD/YYYY HH:mm:ss`, UTC).
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[month]/[day]/[year] [hour]:[minute]:[second]");

/// Characters spreadsheet tools leave behind in cells they could not render.
const PLACEHOLDER_MARKERS: [char; 3] = ['#', '?', '\u{FFFD}'];

/// An alert field addressable from a CSV column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertField {
    Status,
    VerificationStatus,
    AlertName,
    Timestamp,
    Tenant,
    KillChainStage,
    Technique,
    SrcIp,
    SrcIpType,
    SourceGeoCountry,
    DestinationIp,
    DstIpType,
    DestinationGeoCountry,
    SourceHost,
    Description,
    Remarks,
    Links,
}

impl AlertField {
    const ALL: [AlertField; 17] = [
        Self::Status,
        Self::VerificationStatus,
        Self::AlertName,
        Self::Timestamp,
        Self::Tenant,
        Self::KillChainStage,
        Self::Technique,
        Self::SrcIp,
        Self::SrcIpType,
        Self::SourceGeoCountry,
        Self::DestinationIp,
        Self::DstIpType,
        Self::DestinationGeoCountry,
        Self::SourceHost,
        Self::Description,
        Self::Remarks,
        Self::Links,
    ];

    /// The canonical CSV header for this field.
    pub fn header(&self) -> &'static str {
        CANONICAL_HEADERS[*self as usize]
    }

    /// Document path of this field; nested fields use a dotted path.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::VerificationStatus => "verificationStatus",
            Self::AlertName => "alertName",
            Self::Timestamp => "timestamp",
            Self::Tenant => "tenant",
            Self::KillChainStage => "killChainStage",
            Self::Technique => "technique",
            Self::SrcIp => "srcIp",
            Self::SrcIpType => "srcIpType",
            Self::SourceGeoCountry => "sourceGeo.country",
            Self::DestinationIp => "destinationIp",
            Self::DstIpType => "dstIpType",
            Self::DestinationGeoCountry => "destinationGeo.country",
            Self::SourceHost => "sourceHost",
            Self::Description => "description",
            Self::Remarks => "remarks",
            Self::Links => "links",
        }
    }

    /// Look up a field by header name, ignoring case and surrounding whitespace.
    pub fn from_header(header: &str) -> Option<Self> {
        let header = header.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.header().eq_ignore_ascii_case(header))
    }

    fn text_mut<'a>(&self, alert: &'a mut Alert) -> Option<&'a mut String> {
        let slot = match self {
            Self::Status => &mut alert.status,
            Self::VerificationStatus => &mut alert.verification_status,
            Self::AlertName => &mut alert.alert_name,
            Self::Timestamp => return None,
            Self::Tenant => &mut alert.tenant,
            Self::KillChainStage => &mut alert.kill_chain_stage,
            Self::Technique => &mut alert.technique,
            Self::SrcIp => &mut alert.src_ip,
            Self::SrcIpType => &mut alert.src_ip_type,
            Self::SourceGeoCountry => &mut alert.source_geo.country,
            Self::DestinationIp => &mut alert.destination_ip,
            Self::DstIpType => &mut alert.dst_ip_type,
            Self::DestinationGeoCountry => &mut alert.destination_geo.country,
            Self::SourceHost => &mut alert.source_host,
            Self::Description => &mut alert.description,
            Self::Remarks => &mut alert.remarks,
            Self::Links => &mut alert.links,
        };
        Some(slot)
    }

    fn text<'a>(&self, alert: &'a Alert) -> Option<&'a str> {
        let value = match self {
            Self::Status => &alert.status,
            Self::VerificationStatus => &alert.verification_status,
            Self::AlertName => &alert.alert_name,
            Self::Timestamp => return None,
            Self::Tenant => &alert.tenant,
            Self::KillChainStage => &alert.kill_chain_stage,
            Self::Technique => &alert.technique,
            Self::SrcIp => &alert.src_ip,
            Self::SrcIpType => &alert.src_ip_type,
            Self::SourceGeoCountry => &alert.source_geo.country,
            Self::DestinationIp => &alert.destination_ip,
            Self::DstIpType => &alert.dst_ip_type,
            Self::DestinationGeoCountry => &alert.destination_geo.country,
            Self::SourceHost => &alert.source_host,
            Self::Description => &alert.description,
            Self::Remarks => &alert.remarks,
            Self::Links => &alert.links,
        };
        Some(value)
    }
}

/// Header column to alert field mapping for one import.
#[derive(Clone, Debug)]
pub struct ColumnMapping {
    columns: Vec<Option<AlertField>>,
}

impl ColumnMapping {
    /// Build the mapping from a header row.
    ///
    /// Fails with [`Error::Format`] if no header names a known field.
    pub fn from_headers(headers: &[String]) -> Result<Self> {
        let columns: Vec<_> = headers.iter().map(|h| AlertField::from_header(h)).collect();
        if columns.iter().all(Option::is_none) {
            return Err(Error::Format(format!(
                "header row has no recognised columns: {headers:?}"
            )));
        }
        Ok(Self { columns })
    }

    /// Number of columns in the header row.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Field mapped to the given column, if any.
    pub fn field(&self, column: usize) -> Option<AlertField> {
        self.columns.get(column).copied().flatten()
    }
}

/// A recoverable problem with a single cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowWarning {
    /// 1-based data row number (the header is row 0).
    pub row: usize,
    /// Canonical header of the affected column.
    pub field: String,
    pub message: String,
}

impl fmt::Display for RowWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}: {}", self.row, self.field, self.message)
    }
}

/// Output of decoding a full CSV import.
#[derive(Clone, Debug, Default)]
pub struct DecodedImport {
    pub alerts: Vec<Alert>,
    pub warnings: Vec<RowWarning>,
    /// Header names that did not map to any field.
    pub ignored_columns: Vec<String>,
}

/// Split raw delimited text into rows of cells.
///
/// Blank lines are skipped. Row widths are left as found; padding to the
/// header width happens in [`decode_row`].
pub fn parse_delimited_text(raw: &str) -> Result<Vec<Vec<String>>> {
    let raw = raw.strip_prefix('\u{FEFF}').unwrap_or(raw);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(raw.as_bytes());

    let mut rows = Vec::new();
    for result in reader.byte_records() {
        let record = result.map_err(|e| Error::Format(format!("unreadable row: {e}")))?;
        let row: Vec<String> = record
            .iter()
            .map(|cell| String::from_utf8_lossy(cell).into_owned())
            .collect();
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Decode one data row into an alert.
///
/// Every field starts at its default; mapped cells overwrite it. A timestamp
/// that is empty, carries a placeholder marker or fails to parse is replaced
/// by `now` and reported as a warning.
pub fn decode_row(
    mapping: &ColumnMapping,
    values: &[String],
    row: usize,
    now: OffsetDateTime,
) -> (Alert, Vec<RowWarning>) {
    let mut alert = Alert::new(now);
    let mut warnings = Vec::new();
    let mut saw_timestamp = false;

    for column in 0..mapping.width() {
        let Some(field) = mapping.field(column) else {
            continue;
        };
        let value = values.get(column).map(String::as_str).unwrap_or_default();

        if field == AlertField::Timestamp {
            saw_timestamp = true;
            match parse_timestamp(value) {
                Ok(timestamp) => alert.timestamp = timestamp,
                Err(reason) => warnings.push(RowWarning {
                    row,
                    field: field.header().to_string(),
                    message: format!("{reason}; using current time"),
                }),
            }
        } else if let Some(slot) = field.text_mut(&mut alert) {
            *slot = value.to_string();
        }
    }

    if !saw_timestamp {
        warnings.push(RowWarning {
            row,
            field: AlertField::Timestamp.header().to_string(),
            message: "no timestamp column; using current time".to_string(),
        });
    }

    // Empty status cells keep the documented defaults.
    if alert.status.is_empty() {
        alert.status = Alert::DEFAULT_STATUS.to_string();
    }
    if alert.verification_status.is_empty() {
        alert.verification_status = Alert::DEFAULT_VERIFICATION_STATUS.to_string();
    }

    (alert, warnings)
}

/// Decode a complete CSV document into alerts.
pub fn decode_alerts(raw: &str, now: OffsetDateTime) -> Result<DecodedImport> {
    let mut rows = parse_delimited_text(raw)?.into_iter();
    let headers = rows
        .next()
        .ok_or_else(|| Error::Format("missing header row".to_string()))?;
    let mapping = ColumnMapping::from_headers(&headers)?;

    let ignored_columns = headers
        .iter()
        .enumerate()
        .filter(|(column, _)| mapping.field(*column).is_none())
        .map(|(_, header)| header.clone())
        .collect();

    let mut decoded = DecodedImport {
        ignored_columns,
        ..DecodedImport::default()
    };
    for (index, values) in rows.enumerate() {
        let (alert, warnings) = decode_row(&mapping, &values, index + 1, now);
        for warning in &warnings {
            tracing::warn!(row = warning.row, field = %warning.field, "{}", warning.message);
        }
        decoded.alerts.push(alert);
        decoded.warnings.extend(warnings);
    }

    Ok(decoded)
}

/// Encode alerts as CSV with every cell quoted.
///
/// Headers that do not name a known field produce empty cells.
pub fn encode_rows(alerts: &[Alert], headers: &[&str]) -> Result<String> {
    let fields: Vec<_> = headers.iter().map(|h| AlertField::from_header(h)).collect();
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());

    writer.write_record(headers).map_err(encode_error)?;
    for alert in alerts {
        let mut cells = Vec::with_capacity(fields.len());
        for field in &fields {
            let cell = match field {
                Some(AlertField::Timestamp) => format_timestamp(alert.timestamp)?,
                Some(field) => field.text(alert).unwrap_or_default().to_string(),
                None => String::new(),
            };
            cells.push(cell);
        }
        writer.write_record(&cells).map_err(encode_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Serialization(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode alerts with the canonical header set.
pub fn encode_alerts(alerts: &[Alert]) -> Result<String> {
    encode_rows(alerts, &CANONICAL_HEADERS)
}

fn encode_error(err: csv::Error) -> Error {
    Error::Serialization(err.to_string())
}

/// Format a timestamp as a CSV cell (UTC).
pub fn format_timestamp(timestamp: OffsetDateTime) -> Result<String> {
    timestamp
        .to_offset(time::UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Parse a `MM/DD/YYYY HH:mm:ss` cell as a UTC instant.
///
/// Single-digit components are accepted.
pub fn parse_timestamp(cell: &str) -> std::result::Result<OffsetDateTime, String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Err("empty timestamp".to_string());
    }
    if cell.contains(PLACEHOLDER_MARKERS) {
        return Err(format!("placeholder timestamp {cell:?}"));
    }

    let (date, clock) = cell
        .split_once(char::is_whitespace)
        .ok_or_else(|| format!("timestamp {cell:?} is missing a time"))?;
    let [month, day, year] = components::<3>(date, '/', cell)?;
    let [hour, minute, second] = components::<3>(clock.trim(), ':', cell)?;

    let month = u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .ok_or_else(|| format!("invalid month in {cell:?}"))?;
    let year = i32::try_from(year).map_err(|_| format!("invalid year in {cell:?}"))?;
    let day = u8::try_from(day).map_err(|_| format!("invalid day in {cell:?}"))?;
    let date = Date::from_calendar_date(year, month, day).map_err(|e| format!("{e} in {cell:?}"))?;

    let narrow = |v: u32| u8::try_from(v).map_err(|_| format!("invalid time in {cell:?}"));
    let time = Time::from_hms(narrow(hour)?, narrow(minute)?, narrow(second)?)
        .map_err(|e| format!("{e} in {cell:?}"))?;

    Ok(PrimitiveDateTime::new(date, time).assume_utc())
}

fn components<const N: usize>(
    part: &str,
    separator: char,
    cell: &str,
) -> std::result::Result<[u32; N], String> {
    let mut out = [0u32; N];
    let mut pieces = part.split(separator);
    for slot in &mut out {
        let piece = pieces
            .next()
            .ok_or_else(|| format!("timestamp {cell:?} has too few components"))?;
        *slot = piece
            .trim()
            .parse()
            .map_err(|_| format!("non-numeric component {piece:?} in {cell:?}"))?;
    }
    if pieces.next().is_some() {
        return Err(format!("timestamp {cell:?} has too many components"));
    }
    Ok(out)
}
