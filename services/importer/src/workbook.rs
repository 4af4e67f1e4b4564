//! Workbook output - downloadable templates and error files
//!
//! Responsibilities:
//! - Generate the per-entity upload template (instruction banner, marked
//!   headers, description row)
//! - Generate the error workbook after a run: the same layout, failing
//!   rows only, plus a trailing "Errores" column with the row's messages
//!
//! CRITICAL: the error file must stay re-uploadable as-is. It keeps the
//! template's exact column order; the extra error column sits past the
//! template columns where positional binding never reads it.

use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

use crate::parse::{CellValue, ParsedRow, DESCRIPTION_ROW, FIRST_DATA_ROW, HEADER_ROW, INSTRUCTION_ROW};
use crate::reconcile::{ImportRowError, ERROR_JOINER};
use crate::template::{template_for, TemplateDefinition};
use crate::EntityType;

pub const ERROR_COLUMN_HEADER: &str = "Errores";

const COLUMN_WIDTH: f64 = 18.0;
const ERROR_COLUMN_WIDTH: f64 = 40.0;

/// Build the empty upload template for an entity.
pub fn generate_template(entity: EntityType) -> Result<Vec<u8>> {
    let template = template_for(entity);
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    write_layout(worksheet, template, false)
        .with_context(|| format!("failed to lay out {} template", entity))?;
    workbook
        .save_to_buffer()
        .context("failed to serialize template workbook")
}

/// Build the error workbook for a finished run.
///
/// `extra_errors` carries the reconciliation failures; they are merged into
/// the rows' own parse errors by row number, skipping messages the row
/// already has. Only rows left with at least one error are written.
pub fn generate_error_file(
    entity: EntityType,
    rows: &[ParsedRow],
    extra_errors: &[ImportRowError],
) -> Result<Vec<u8>> {
    let template = template_for(entity);
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    write_layout(worksheet, template, true)
        .with_context(|| format!("failed to lay out {} error sheet", entity))?;

    let error_column = template.columns.len() as u16;
    let mut out_row = FIRST_DATA_ROW as u32;
    for row in rows {
        let errors = merged_errors(row, extra_errors);
        if errors.is_empty() {
            continue;
        }
        for (col, column) in template.columns.iter().enumerate() {
            match row.value(column.key) {
                Some(CellValue::Number(n)) => worksheet.write_number(out_row, col as u16, *n)?,
                Some(CellValue::Text(s)) => worksheet.write_string(out_row, col as u16, s)?,
                None => continue,
            };
        }
        worksheet.write_string(out_row, error_column, &errors.join(ERROR_JOINER))?;
        out_row += 1;
    }

    workbook
        .save_to_buffer()
        .context("failed to serialize error workbook")
}

/// Instruction, header and description rows, shared by both outputs.
fn write_layout(
    worksheet: &mut Worksheet,
    template: &TemplateDefinition,
    with_errors: bool,
) -> Result<(), XlsxError> {
    worksheet.set_name(template.sheet_name)?;
    let bold = Format::new().set_bold();

    worksheet.write_string_with_format(INSTRUCTION_ROW as u32, 0, template.instruction, &bold)?;
    for (col, column) in template.columns.iter().enumerate() {
        // required markers go on the blank template only; the error sheet
        // writes plain headers
        let header = if column.required && !with_errors {
            format!("{} *", column.header)
        } else {
            column.header.to_string()
        };
        worksheet.write_string_with_format(HEADER_ROW as u32, col as u16, &header, &bold)?;
        worksheet.write_string(DESCRIPTION_ROW as u32, col as u16, column.description)?;
        worksheet.set_column_width(col as u16, COLUMN_WIDTH)?;
    }
    if with_errors {
        let col = template.columns.len() as u16;
        worksheet.write_string_with_format(HEADER_ROW as u32, col, ERROR_COLUMN_HEADER, &bold)?;
        worksheet.set_column_width(col, ERROR_COLUMN_WIDTH)?;
    }
    Ok(())
}

/// A row's parse errors plus any reconciliation errors reported for its
/// row number. Reconciliation re-joins parse errors when echoing a failed
/// row, so merging splits on the joiner and drops exact repeats.
fn merged_errors(row: &ParsedRow, extra_errors: &[ImportRowError]) -> Vec<String> {
    let mut errors = row.errors.clone();
    for extra in extra_errors.iter().filter(|e| e.row_number == row.row_number) {
        for piece in extra.error.split(ERROR_JOINER) {
            let piece = piece.trim();
            if !piece.is_empty() && !errors.iter().any(|e| e == piece) {
                errors.push(piece.to_string());
            }
        }
    }
    errors
}

// =============================================================================
// TESTS
// =============================================================================
