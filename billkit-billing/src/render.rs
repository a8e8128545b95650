//! Invoice document rendering
//!
//! A pure function of an already-computed invoice snapshot; nothing here
//! recalculates totals. The HTML output is what the PDF pipeline consumes.

use crate::invoice::Invoice;
use chrono::{DateTime, Utc};

/// Output format for an invoice document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceFormat {
    Json,
    PlainText,
    Html,
}

/// Render a finalized invoice snapshot.
pub fn render(invoice: &Invoice, format: InvoiceFormat) -> String {
    match format {
        InvoiceFormat::Json => serde_json::to_string_pretty(invoice).unwrap_or_default(),
        InvoiceFormat::PlainText => to_plain_text(invoice),
        InvoiceFormat::Html => to_html(invoice),
    }
}

fn to_plain_text(invoice: &Invoice) -> String {
    let mut text = String::new();
    text.push_str(&format!("INVOICE #{}\n", invoice.number));
    text.push_str(&format!("Status: {}\n", invoice.status));
    text.push_str(&format!("Date: {}\n", format_date(invoice.issue_date)));
    text.push_str(&format!("Due: {}\n\n", format_date(invoice.due_date)));

    text.push_str("LINES:\n");
    for line in &invoice.lines {
        text.push_str(&format!(
            "  {} x {} @ {} = {}\n",
            line.quantity, line.description, line.unit_price, line.amount
        ));
    }

    text.push_str(&format!("\nSubtotal: {}\n", invoice.subtotal));
    text.push_str(&format!("Tax: {}\n", invoice.tax_amount));
    text.push_str(&format!("TOTAL: {}\n", invoice.total_amount));
    if !invoice.paid_amount.is_zero() {
        text.push_str(&format!("Paid: {}\n", invoice.paid_amount));
    }
    if let Some(notes) = &invoice.notes {
        text.push_str(&format!("\nNotes: {}\n", notes));
    }
    text
}

fn to_html(invoice: &Invoice) -> String {
    let mut html = String::new();
    html.push_str("<div class=\"invoice\">\n");
    html.push_str(&format!("<h1>Invoice #{}</h1>\n", invoice.number));
    html.push_str(&format!(
        "<p>Date: {} / Due: {}</p>\n",
        format_date(invoice.issue_date),
        format_date(invoice.due_date)
    ));

    html.push_str("<table>\n<thead><tr><th>Item</th><th>Qty</th><th>Price</th><th>Amount</th></tr></thead>\n<tbody>\n");
    for line in &invoice.lines {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            line.description, line.quantity, line.unit_price, line.amount
        ));
    }
    html.push_str("</tbody>\n</table>\n");

    html.push_str(&format!("<p>Subtotal: {}</p>\n", invoice.subtotal));
    html.push_str(&format!("<p>Tax: {}</p>\n", invoice.tax_amount));
    html.push_str(&format!(
        "<p class=\"total\"><strong>Total: {}</strong></p>\n",
        invoice.total_amount
    ));
    html.push_str("</div>\n");
    html
}

fn format_date(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::InvoiceLine;
    use crate::Amount;
    use uuid::Uuid;

    fn sample_invoice() -> Invoice {
        let mut invoice = Invoice::new("INV-000042", Uuid::new_v4());
        invoice
            .add_line(
                InvoiceLine::new("Hosting", 2, Amount::from_major(500), Amount::zero(), None)
                    .unwrap(),
            )
            .unwrap();
        invoice
    }

    #[test]
    fn test_render_json() {
        let json = render(&sample_invoice(), InvoiceFormat::Json);
        assert!(json.contains("INV-000042"));
        assert!(json.contains("Hosting"));
    }

    #[test]
    fn test_render_plain_text() {
        let text = render(&sample_invoice(), InvoiceFormat::PlainText);
        assert!(text.contains("INVOICE #INV-000042"));
        assert!(text.contains("2 x Hosting @ 500 = 1000"));
        assert!(text.contains("TOTAL: 1000"));
    }

    #[test]
    fn test_render_html() {
        let html = render(&sample_invoice(), InvoiceFormat::Html);
        assert!(html.contains("<h1>Invoice #INV-000042</h1>"));
        assert!(html.contains("<td>Hosting</td>"));
    }
}
