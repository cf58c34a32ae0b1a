//! PDF rendering for lot labels and QC reports

use std::io::BufWriter;

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference};
use shared::{Lot, LotQc, Packaging, QcMeasurements, QcMetrics, Reception, SampleQc};

use crate::error::{AppError, AppResult};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const LABEL_COLUMNS: usize = 2;
const LABEL_ROWS: usize = 5;
const LABEL_WIDTH: f32 = 95.0;
const LABEL_HEIGHT: f32 = 55.0;

fn pdf_error(e: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("PDF error: {}", e))
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

fn fonts(doc: &PdfDocumentReference) -> AppResult<Fonts> {
    Ok(Fonts {
        regular: doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(pdf_error)?,
        bold: doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(pdf_error)?,
    })
}

fn finish(doc: PdfDocumentReference) -> AppResult<Vec<u8>> {
    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf).map_err(pdf_error)?;
    buf.into_inner().map_err(pdf_error)
}

/// Label sheet with one label per packaging unit of the lot
pub fn render_lot_labels(
    lot: &Lot,
    reception: &Reception,
    packaging: &Packaging,
) -> AppResult<Vec<u8>> {
    let title = format!("Etiquetas Lote {}", lot.display_number());
    let (doc, first_page, first_layer) =
        PdfDocument::new(&title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Labels");
    let fonts = fonts(&doc)?;

    let total = lot.packagings_quantity.max(1) as usize;
    let per_page = LABEL_COLUMNS * LABEL_ROWS;
    let mut layer = doc.get_page(first_page).get_layer(first_layer);

    for index in 0..total {
        let slot = index % per_page;
        if index > 0 && slot == 0 {
            let (page, page_layer) = doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Labels");
            layer = doc.get_page(page).get_layer(page_layer);
        }

        let x = Mm(10.0 + (slot % LABEL_COLUMNS) as f32 * LABEL_WIDTH);
        let top = PAGE_HEIGHT - 15.0 - (slot / LABEL_COLUMNS) as f32 * LABEL_HEIGHT;

        layer.use_text(
            format!("LOT-{}", lot.display_number()),
            18.0,
            x,
            Mm(top),
            &fonts.bold,
        );
        let lines = [
            format!("Guía: {}", reception.waybill),
            format!("Recepción: {} {}", reception.date, reception.time.format("%H:%M")),
            format!("Patente: {}", reception.truck_plate),
            format!("Envase: {}", packaging.name),
            format!("Unidad {} de {}", index + 1, total),
        ];
        let mut y = top - 8.0;
        for line in lines {
            layer.use_text(line, 9.0, x, Mm(y), &fonts.regular);
            y -= 5.0;
        }
    }

    finish(doc)
}

fn measurement_lines(measurements: &QcMeasurements, metrics: &QcMetrics) -> Vec<String> {
    let mut lines = vec![
        format!("Analista: {}", measurements.analyst),
        format!(
            "Fecha: {} {}",
            measurements.date,
            measurements.time.format("%H:%M")
        ),
        format!("Peso con cáscara: {} g", measurements.inshell_weight),
        String::new(),
        "Calibres (unidades)".to_string(),
    ];
    for (field, value) in measurements.sizes.fields() {
        lines.push(format!("  {}: {}", field, value));
    }
    lines.push(format!("  Total: {}", metrics.units));
    lines.push(String::new());
    lines.push("Defectos (unidades)".to_string());
    for (field, value) in measurements.defects.fields() {
        lines.push(format!("  {}: {}", field, value));
    }
    lines.push(format!("  Total: {}", measurements.defects.total()));
    lines.push(String::new());
    lines.push("Colores (g)".to_string());
    for (field, value) in measurements.colors.fields() {
        lines.push(format!("  {}: {}", field, value));
    }
    lines.push(String::new());
    lines.push(format!("Peso pulpa: {} g", metrics.shelled_weight));
    lines.push(format!("Rendimiento: {} %", metrics.yieldpercentage));
    lines
}

fn render_report(title: &str, header: &[String], body: &[String]) -> AppResult<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Report");
    let layer = doc.get_page(page).get_layer(layer);
    let fonts = fonts(&doc)?;

    let mut y = Mm(280.0);
    layer.use_text(title, 14.0, Mm(20.0), y, &fonts.bold);
    y -= Mm(10.0);
    for line in header {
        layer.use_text(line.as_str(), 10.0, Mm(20.0), y, &fonts.bold);
        y -= Mm(5.5);
    }
    y -= Mm(4.0);
    for line in body {
        layer.use_text(line.as_str(), 9.0, Mm(20.0), y, &fonts.regular);
        y -= Mm(4.5);
    }

    finish(doc)
}

/// QC report of a lot
pub fn render_lot_qc_report(lot: &Lot, qc: &LotQc) -> AppResult<Vec<u8>> {
    let header = vec![
        format!("Lote: {}", lot.display_number()),
        format!("Registro QC: {}", qc.id),
    ];
    render_report(
        &format!("Informe QC Lote {}", lot.display_number()),
        &header,
        &measurement_lines(&qc.measurements, &qc.metrics),
    )
}

/// QC report of a grower sample
pub fn render_sample_qc_report(sample: &SampleQc) -> AppResult<Vec<u8>> {
    let header = vec![
        format!("Productor: {}", sample.grower),
        format!("Traída por: {}", sample.brought_by),
    ];
    render_report(
        &format!("Informe QC Muestra {}", sample.id),
        &header,
        &measurement_lines(&sample.measurements, &sample.metrics),
    )
}
