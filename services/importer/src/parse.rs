//! Upload parser - workbook or CSV bytes into validated generic rows
//!
//! Responsibilities:
//! - Detect the payload format by magic bytes (zip/OLE2 workbooks vs text)
//! - Locate the template sheet, falling back to the first sheet
//! - Read the fixed layout and bind cells to template columns BY POSITION
//! - Enforce required columns and numeric fields with Spanish row errors
//!
//! Parsing never fails hard: an unreadable workbook yields an empty failed
//! ParseResult, so callers always get row accounting. Text payloads always
//! read as CSV.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde::Serialize;

use crate::template::{template_for, TemplateDefinition};
use crate::values::{align_tax_rate, parse_locale_number, parse_tax_rate};
use crate::EntityType;

// Fixed sheet layout, shared with the workbook writer: row 1 carries the
// instruction banner, row 2 the headers, row 3 the column notes, and data
// starts at row 4. Indices are 0-based.
pub(crate) const INSTRUCTION_ROW: usize = 0;
pub(crate) const HEADER_ROW: usize = 1;
pub(crate) const DESCRIPTION_ROW: usize = 2;
pub(crate) const FIRST_DATA_ROW: usize = 3;

const ZIP_MAGIC: &[u8] = b"PK";
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// A non-blank cell. Blank cells are simply absent from the row map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            CellValue::Number(_) => None,
        }
    }

    /// Numeric view: numbers pass through unchanged, text goes through the
    /// locale parser.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => parse_locale_number(s),
        }
    }

    /// Tax-rate view: numbers snap straight onto the IVA whitelist, text is
    /// parsed first.
    pub fn as_tax_rate(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => align_tax_rate(*n),
            CellValue::Text(s) => parse_tax_rate(s),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            // whole numbers render without the trailing .0 Excel never shows
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            CellValue::Number(n) => write!(f, "{}", n),
        }
    }
}

/// One data row bound to the template, plus its validation errors.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedRow {
    /// 1-based physical spreadsheet row the user would scroll to.
    pub row_number: usize,
    pub data: BTreeMap<&'static str, CellValue>,
    pub errors: Vec<String>,
}

impl ParsedRow {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn value(&self, key: &str) -> Option<&CellValue> {
        self.data.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(CellValue::as_text)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(CellValue::as_number)
    }

    /// String form of a cell: text as is, numbers rendered like Excel shows
    /// them. SKUs and CUITs typed as numeric cells come out right.
    pub fn string(&self, key: &str) -> Option<String> {
        self.data.get(key).map(|v| v.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseResult {
    /// True iff no row carries an error. An upload with zero data rows is
    /// trivially successful.
    pub success: bool,
    pub rows: Vec<ParsedRow>,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub error_rows: usize,
    /// Header strings as uploaded, required marker stripped. Display only:
    /// binding stays positional regardless of what the header row says.
    pub headers: Vec<String>,
}

impl ParseResult {
    /// What an unreadable upload parses to: zero rows, failed.
    fn unreadable() -> Self {
        ParseResult {
            success: false,
            rows: Vec::new(),
            total_rows: 0,
            valid_rows: 0,
            error_rows: 0,
            headers: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows parsed: {} valid, {} with errors",
            self.total_rows, self.valid_rows, self.error_rows
        )
    }
}

type Grid = Vec<Vec<Option<CellValue>>>;

/// Parse an uploaded spreadsheet for the given entity.
pub fn parse(buffer: &[u8], entity: EntityType) -> ParseResult {
    let template = template_for(entity);
    let grid = if is_workbook_payload(buffer) {
        grid_from_workbook(buffer, template.sheet_name)
    } else {
        grid_from_csv(buffer)
    };
    let Some(grid) = grid else {
        return ParseResult::unreadable();
    };

    let mut headers: Vec<String> = grid
        .get(HEADER_ROW)
        .map(|row| row.iter().map(header_text).collect())
        .unwrap_or_default();
    while headers.last().is_some_and(|h| h.is_empty()) {
        headers.pop();
    }

    let mut rows: Vec<ParsedRow> = Vec::new();
    for raw in grid.into_iter().skip(FIRST_DATA_ROW) {
        if raw.iter().all(Option::is_none) {
            continue;
        }
        let row_number = rows.len() + FIRST_DATA_ROW + 1;
        rows.push(bind_row(template, raw, row_number));
    }

    let error_rows = rows.iter().filter(|r| !r.is_valid()).count();
    ParseResult {
        success: error_rows == 0,
        total_rows: rows.len(),
        valid_rows: rows.len() - error_rows,
        error_rows,
        headers,
        rows,
    }
}

fn is_workbook_payload(buffer: &[u8]) -> bool {
    buffer.starts_with(ZIP_MAGIC) || buffer.starts_with(OLE2_MAGIC)
}

fn grid_from_workbook(buffer: &[u8], sheet_name: &str) -> Option<Grid> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(buffer)).ok()?;

    let names = workbook.sheet_names().to_vec();
    if names.is_empty() {
        return None;
    }
    let picked = names
        .iter()
        .find(|n| n.as_str() == sheet_name)
        .unwrap_or(&names[0])
        .clone();

    let range = workbook.worksheet_range(&picked).ok()?;

    // calamine ranges start at the first used cell, not at A1; pad so that
    // grid indices are absolute sheet coordinates
    let Some((start_row, start_col)) = range.start() else {
        return Some(Vec::new());
    };
    let mut grid: Grid = vec![Vec::new(); start_row as usize];
    for cells in range.rows() {
        let mut row: Vec<Option<CellValue>> = vec![None; start_col as usize];
        row.extend(cells.iter().map(cell_value));
        grid.push(row);
    }
    Some(grid)
}

fn cell_value(cell: &Data) -> Option<CellValue> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(CellValue::Text(trimmed.to_string()))
            }
        }
        Data::Float(f) => Some(CellValue::Number(*f)),
        Data::Int(i) => Some(CellValue::Number(*i as f64)),
        Data::Bool(b) => Some(CellValue::Text(if *b { "si" } else { "no" }.to_string())),
        Data::DateTime(dt) => Some(CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(CellValue::Text(s.clone())),
    }
}

fn grid_from_csv(buffer: &[u8]) -> Option<Grid> {
    let text = decode_text(buffer);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    let delimiter = detect_delimiter(text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut grid: Grid = Vec::new();
    for record in reader.records() {
        match record {
            Ok(fields) => grid.push(
                fields
                    .iter()
                    .map(|field| {
                        if field.is_empty() {
                            None
                        } else {
                            Some(CellValue::Text(field.to_string()))
                        }
                    })
                    .collect(),
            ),
            Err(e) => tracing::warn!(error = %e, "skipping malformed CSV record"),
        }
    }
    Some(grid)
}

fn decode_text(buffer: &[u8]) -> String {
    match std::str::from_utf8(buffer) {
        Ok(s) => s.to_string(),
        Err(_) => {
            // legacy exports from es-AR Windows machines
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(buffer);
            text.into_owned()
        }
    }
}

fn detect_delimiter(text: &str) -> u8 {
    // the header line is free of decimal commas, so count there
    let line = text.lines().nth(HEADER_ROW).or_else(|| text.lines().next());
    let line = line.unwrap_or("");
    if line.matches(';').count() >= line.matches(',').count() {
        b';'
    } else {
        b','
    }
}

fn header_text(cell: &Option<CellValue>) -> String {
    let raw = match cell {
        Some(v) => v.to_string(),
        None => return String::new(),
    };
    strip_required_marker(raw.trim()).to_string()
}

fn strip_required_marker(header: &str) -> &str {
    header
        .strip_suffix('*')
        .map(str::trim_end)
        .unwrap_or(header)
}

fn bind_row(template: &TemplateDefinition, raw: Vec<Option<CellValue>>, row_number: usize) -> ParsedRow {
    let mut data = BTreeMap::new();
    let mut errors = Vec::new();

    for (i, column) in template.columns.iter().enumerate() {
        match raw.get(i).cloned().flatten() {
            Some(value) => {
                data.insert(column.key, value);
            }
            None if column.required => {
                errors.push(format!("{} es obligatorio", column.header));
            }
            None => {}
        }
    }

    validate_row(template.entity, &data, &mut errors);
    ParsedRow {
        row_number,
        data,
        errors,
    }
}

fn validate_row(
    entity: EntityType,
    data: &BTreeMap<&'static str, CellValue>,
    errors: &mut Vec<String>,
) {
    match entity {
        EntityType::Products => {
            check_number(data, "price", "Precio con IVA", errors);
            check_number(data, "cost", "Costo sin IVA", errors);
            check_tax_rate(data, errors);
        }
        EntityType::Stock => {
            check_number(data, "quantity", "Cantidad", errors);
        }
        EntityType::Prices => {
            check_number(data, "price", "Precio con IVA", errors);
            check_number(data, "cost", "Costo sin IVA", errors);
        }
        EntityType::Customers | EntityType::Suppliers => {}
    }
}

fn check_number(
    data: &BTreeMap<&'static str, CellValue>,
    key: &str,
    header: &str,
    errors: &mut Vec<String>,
) {
    if let Some(value) = data.get(key) {
        if value.as_number().is_none() {
            errors.push(format!("{} debe ser un número válido: \"{}\"", header, value));
        }
    }
}

fn check_tax_rate(data: &BTreeMap<&'static str, CellValue>, errors: &mut Vec<String>) {
    if let Some(value) = data.get("tax_rate") {
        if value.as_tax_rate().is_none() {
            errors.push(format!(
                "Alícuota IVA inválida: \"{}\" (valores permitidos: 0, 2.5, 5, 10.5, 21, 27)",
                value
            ));
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    /// Build workbook bytes with the given rows on one sheet. Empty strings
    /// leave the cell unwritten.
    fn workbook_bytes(sheet_name: &str, rows: &[&[&str]]) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet_name).unwrap();
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                if !cell.is_empty() {
                    worksheet
                        .write_string(r as u32, c as u16, *cell)
                        .unwrap();
                }
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    fn products_sheet(data_rows: &[&[&str]]) -> Vec<u8> {
        let mut rows: Vec<&[&str]> = vec![
            &["Complete una fila por producto"],
            &[
                "Código SKU *",
                "Nombre *",
                "Descripción",
                "Categoría",
                "Subcategoría",
                "Precio con IVA",
                "Costo sin IVA",
                "Alícuota IVA",
                "Proveedor",
                "Código de barras",
                "Visibilidad",
                "Tipo de producto",
            ],
            &["notas"],
        ];
        rows.extend_from_slice(data_rows);
        workbook_bytes("Productos", &rows)
    }

    // -------------------------------------------------------------------------
    // LAYOUT AND BINDING TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_products_basic() {
        let bytes = products_sheet(&[&["A1", "Tornillo", "", "Ferretería"]]);
        let result = parse(&bytes, EntityType::Products);

        assert!(result.success);
        assert_eq!(result.total_rows, 1);
        assert_eq!(result.valid_rows, 1);
        assert_eq!(result.error_rows, 0);

        let row = &result.rows[0];
        assert_eq!(row.row_number, 4);
        assert_eq!(row.text("sku"), Some("A1"));
        assert_eq!(row.text("name"), Some("Tornillo"));
        assert_eq!(row.text("category"), Some("Ferretería"));
        assert_eq!(row.value("description"), None);
    }

    #[test]
    fn test_parse_headers_reported_without_marker() {
        let bytes = products_sheet(&[&["A1", "Tornillo"]]);
        let result = parse(&bytes, EntityType::Products);
        assert_eq!(result.headers[0], "Código SKU");
        assert_eq!(result.headers[1], "Nombre");
    }

    #[test]
    fn test_parse_missing_required_column() {
        let bytes = products_sheet(&[&["A1", ""]]);
        let result = parse(&bytes, EntityType::Products);

        assert!(!result.success);
        assert_eq!(result.error_rows, 1);
        assert_eq!(result.rows[0].errors, vec!["Nombre es obligatorio"]);
        // the missing key stores nothing
        assert_eq!(result.rows[0].value("name"), None);
    }

    #[test]
    fn test_parse_blank_rows_dropped_and_renumbered() {
        let bytes = products_sheet(&[
            &["A1", "Tornillo"],
            &["", "", "", "", "", "", "", "", "", "", "", ""],
            &["A2", "Tuerca"],
        ]);
        let result = parse(&bytes, EntityType::Products);

        assert_eq!(result.total_rows, 2);
        assert_eq!(result.rows[0].row_number, 4);
        assert_eq!(result.rows[1].row_number, 5);
    }

    #[test]
    fn test_parse_falls_back_to_first_sheet() {
        let rows: &[&[&str]] = &[
            &["instrucciones"],
            &["Código SKU *", "Nombre *"],
            &["notas"],
            &["A1", "Tornillo"],
        ];
        let bytes = workbook_bytes("Hoja1", rows);
        let result = parse(&bytes, EntityType::Products);
        assert_eq!(result.total_rows, 1);
        assert_eq!(result.rows[0].text("sku"), Some("A1"));
    }

    #[test]
    fn test_parse_corrupt_workbook_is_failed_and_empty() {
        let result = parse(b"PK\x03\x04not a real workbook", EntityType::Products);
        assert!(!result.success);
        assert_eq!(result.total_rows, 0);
        assert!(result.rows.is_empty());
        assert!(result.headers.is_empty());
    }

    #[test]
    fn test_parse_no_data_rows_is_trivial_success() {
        let bytes = products_sheet(&[]);
        let result = parse(&bytes, EntityType::Products);
        assert!(result.success);
        assert_eq!(result.total_rows, 0);
    }

    #[test]
    fn test_parse_binds_absolute_positions_when_row_one_is_empty() {
        // nothing written in the banner row: the stored range starts at row 2
        // but binding must stay anchored to absolute coordinates
        let rows: &[&[&str]] = &[
            &[],
            &["Código SKU *", "Nombre *"],
            &["notas"],
            &["A1", "Tornillo"],
        ];
        let bytes = workbook_bytes("Productos", rows);
        let result = parse(&bytes, EntityType::Products);
        assert_eq!(result.total_rows, 1);
        assert_eq!(result.rows[0].text("sku"), Some("A1"));
        assert_eq!(result.rows[0].row_number, 4);
    }

    // -------------------------------------------------------------------------
    // VALUE AND VALIDATION TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_numeric_cells_stay_numeric() {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name("Productos").unwrap();
        worksheet.write_string(0, 0, "instrucciones").unwrap();
        worksheet.write_string(1, 0, "Código SKU *").unwrap();
        worksheet.write_string(1, 1, "Nombre *").unwrap();
        worksheet.write_string(1, 5, "Precio con IVA").unwrap();
        worksheet.write_string(2, 0, "notas").unwrap();
        worksheet.write_number(3, 0, 123.0).unwrap();
        worksheet.write_string(3, 1, "Tornillo").unwrap();
        worksheet.write_number(3, 5, 1210.5).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let result = parse(&bytes, EntityType::Products);
        let row = &result.rows[0];
        // numeric SKU renders like Excel shows it
        assert_eq!(row.string("sku"), Some("123".to_string()));
        assert_eq!(row.number("price"), Some(1210.5));
        assert!(result.success);
    }

    #[test]
    fn test_parse_rejects_bad_price_and_tax_rate() {
        let bytes = products_sheet(&[&[
            "A1", "Tornillo", "", "", "", "caro", "", "19", "", "", "", "",
        ]]);
        let result = parse(&bytes, EntityType::Products);

        assert!(!result.success);
        let errors = &result.rows[0].errors;
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("Precio con IVA"));
        assert!(errors[1].contains("Alícuota IVA"));
        // the raw value stays in the map for the error file
        assert_eq!(result.rows[0].text("price"), Some("caro"));
    }

    #[test]
    fn test_parse_locale_price_text_is_valid() {
        let bytes = products_sheet(&[&[
            "A1", "Tornillo", "", "", "", "$ 1.210,50", "", "21%", "", "", "", "",
        ]]);
        let result = parse(&bytes, EntityType::Products);
        assert!(result.success);
        assert_eq!(result.rows[0].number("price"), Some(1210.5));
        assert_eq!(
            result.rows[0].value("tax_rate").and_then(CellValue::as_tax_rate),
            Some(21.0)
        );
    }

    #[test]
    fn test_parse_stock_quantity_must_be_numeric() {
        let rows: &[&[&str]] = &[
            &["instrucciones"],
            &["Código SKU *", "Cantidad *", "Ubicación"],
            &["notas"],
            &["A1", "muchas", "Depósito"],
        ];
        let bytes = workbook_bytes("Stock", rows);
        let result = parse(&bytes, EntityType::Stock);
        assert!(!result.success);
        assert!(result.rows[0].errors[0].contains("Cantidad"));
    }

    // -------------------------------------------------------------------------
    // CSV TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_csv_semicolon_delimited() {
        let csv = "Stock de productos\n\
                   Código SKU;Cantidad;Ubicación\n\
                   notas;;\n\
                   A1;170,5;Depósito\n\
                   A2;3;\n";
        let result = parse(csv.as_bytes(), EntityType::Stock);

        assert!(result.success);
        assert_eq!(result.total_rows, 2);
        assert_eq!(result.rows[0].number("quantity"), Some(170.5));
        assert_eq!(result.rows[0].text("location"), Some("Depósito"));
        assert_eq!(result.rows[1].value("location"), None);
    }

    #[test]
    fn test_parse_csv_comma_delimited_with_bom() {
        let csv = "\u{feff}Clientes,\n\
                   Nombre,CUIT,Email\n\
                   notas,,\n\
                   Juan Pérez,20-12345678-9,juan@example.com\n";
        let result = parse(csv.as_bytes(), EntityType::Customers);

        assert!(result.success);
        assert_eq!(result.rows[0].text("name"), Some("Juan Pérez"));
        assert_eq!(result.rows[0].text("tax_id"), Some("20-12345678-9"));
    }

    #[test]
    fn test_parse_csv_windows_1252_fallback() {
        // "María" with í encoded as 0xED, invalid UTF-8
        let mut csv: Vec<u8> = Vec::new();
        csv.extend_from_slice(b"Clientes\n");
        csv.extend_from_slice(b"Nombre;CUIT\n");
        csv.extend_from_slice(b"notas;\n");
        csv.extend_from_slice(b"Mar\xEDa;27-1111-1\n");
        let result = parse(&csv, EntityType::Customers);

        assert!(result.success);
        assert_eq!(result.rows[0].text("name"), Some("María"));
    }

    // -------------------------------------------------------------------------
    // CELL VALUE TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_cell_value_display() {
        assert_eq!(CellValue::Number(121.0).to_string(), "121");
        assert_eq!(CellValue::Number(121.5).to_string(), "121.5");
        assert_eq!(CellValue::Text("abc".into()).to_string(), "abc");
    }

    #[test]
    fn test_strip_required_marker_variants() {
        assert_eq!(strip_required_marker("Nombre *"), "Nombre");
        assert_eq!(strip_required_marker("Nombre*"), "Nombre");
        assert_eq!(strip_required_marker("Nombre"), "Nombre");
    }
}
