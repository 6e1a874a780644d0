//! CSV/PDF export of queried audit rows (§4.8).

use crate::{query_for_export, AuditEventRow, Filter};
use printpdf::{BuiltinFont, Mm, PdfDocument};
use sqlx::PgPool;
use std::io::BufWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Pdf,
}

const COLUMNS: [&str; 9] = ["id", "created_at", "event_type", "entity_type", "entity_id", "action", "status", "user_email", "details"];

pub async fn to_csv(pool: &PgPool, filter: &Filter) -> anyhow::Result<Vec<u8>> {
    let rows = query_for_export(pool, filter).await?;
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(COLUMNS)?;
    for row in &rows {
        wtr.write_record(row_to_record(row))?;
    }
    Ok(wtr.into_inner()?)
}

fn row_to_record(row: &AuditEventRow) -> [String; 9] {
    [
        row.id.to_string(),
        row.created_at.to_rfc3339(),
        row.event_type.clone(),
        row.entity_type.clone(),
        row.entity_id.clone(),
        row.action.clone(),
        row.status.clone(),
        row.user_email.clone().unwrap_or_default(),
        row.details.to_string(),
    ]
}

/// Renders one page per ~40 rows, a simple tabular layout (id/timestamp/
/// type/action/status per line). No crate in this pack writes PDFs;
/// printpdf is the standard choice and is used standalone here.
pub async fn to_pdf(pool: &PgPool, filter: &Filter) -> anyhow::Result<Vec<u8>> {
    let rows = query_for_export(pool, filter).await?;

    let (doc, page1, layer1) = PdfDocument::new("Audit Export", Mm(210.0), Mm(297.0), "Layer 1");
    let font = doc.add_builtin_font(BuiltinFont::Helvetica)?;

    const ROWS_PER_PAGE: usize = 40;
    const LINE_HEIGHT_MM: f64 = 6.5;
    const TOP_MARGIN_MM: f64 = 280.0;

    let mut current_page = page1;
    let mut current_layer = doc.get_page(current_page).get_layer(layer1);

    if rows.is_empty() {
        current_layer.use_text("No audit events matched this filter.", 10.0, Mm(15.0), Mm(TOP_MARGIN_MM), &font);
    }

    for (i, row) in rows.iter().enumerate() {
        let slot = i % ROWS_PER_PAGE;
        if i > 0 && slot == 0 {
            let (page, layer) = doc.add_page(Mm(210.0), Mm(297.0), "Layer 1");
            current_page = page;
            current_layer = doc.get_page(current_page).get_layer(layer);
        }
        let y = TOP_MARGIN_MM - (slot as f64) * LINE_HEIGHT_MM;
        let line = format!(
            "{}  {}  {:<20}  {:<10}  {}",
            row.created_at.to_rfc3339(),
            row.id,
            row.action,
            row.status,
            row.entity_id
        );
        current_layer.use_text(line, 8.0, Mm(10.0), Mm(y), &font);
    }

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf)?;
    Ok(buf.into_inner()?)
}
