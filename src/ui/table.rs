use comfy_table::{Attribute, Cell, ContentArrangement, Table};

/// Build a table with a bold header row.
pub fn build(headers: &[&str], rows: &[Vec<String>]) -> Table {
    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|header| Cell::new(header).add_attribute(Attribute::Bold)),
        );
    for row in rows {
        table.add_row(row.clone());
    }
    table
}

/// Render without terminal styling.
pub fn render(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut table = build(headers, rows);
    table.force_no_tty();
    table.to_string()
}

/// Print a table, styled only when stdout is a terminal.
pub fn print(headers: &[&str], rows: &[Vec<String>]) {
    let mut table = build(headers, rows);
    if !super::is_interactive() {
        table.force_no_tty();
    }
    println!("{}", table);
}
