//! Read-only questions over the concert CSV.
//!
//! Every operation returns the exact text handed to the model, whether it
//! is called as an agent tool or through the MCP server.

pub mod tools;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::concert::CSV_HEADER;
use crate::error::Error;

pub use self::tools::query_tools;

/// Search results listed before the remainder is summarized.
const SEARCH_LIMIT: usize = 10;

pub const EMBEDDED_INSTRUCTIONS: &str = "\
You are a helpful assistant that answers questions about concert data.
You have access to a CSV database containing information about bands, their genres,
countries of origin, concert venues, locations, and dates.
The CSV columns are: timestamp, source_image, band_name, genre, country, venue, location, date, event_name

Rules:
- ONLY answer questions based on the data provided to you
- If the information is not in the data, say \"I don't have this information in the database\"
- Be precise and count carefully when asked about numbers
- When listing items, format them nicely
- Be concise but helpful";

pub const TOOL_INSTRUCTIONS: &str = "\
You are a helpful assistant that answers questions about concert data.
You have access to tools that can query a CSV database containing information
about bands, their genres, countries of origin, concert venues, locations, and dates.

Available tools:
- get_total_records: Get total count of records
- list_all_bands: List all unique band names
- list_all_genres: List genres with counts
- list_all_countries: List countries with counts
- get_bands_by_genre: Get bands matching a genre
- get_bands_by_country: Get bands from a country
- get_band_details: Get full details for a band
- count_bands_by_genre: Count bands of a genre
- search_records: Search all fields for a term

Rules:
- Use the appropriate tool to answer questions
- Be precise and use tool results accurately
- If no matching data is found, say so clearly
- Be concise but helpful";

/// System prompt with the whole CSV appended.
pub fn embedded_prompt(csv_data: &str) -> String {
    format!("{EMBEDDED_INSTRUCTIONS}\n\nHere is the concert database:\n\n{csv_data}")
}

/// The CSV loaded by header. A missing file is an empty table.
#[derive(Debug, Clone, Default)]
pub struct ConcertTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ConcertTable {
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let headers = reader.headers()?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(String::from).collect());
        }
        Ok(Self { headers, rows })
    }

    /// Build a table from in-memory rows with the standard columns.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            headers: CSV_HEADER.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// `column` of every row; short rows and unknown columns read as "".
    fn values<'a>(&'a self, column: &str) -> impl Iterator<Item = (&'a [String], &'a str)> + 'a {
        let idx = self.column(column);
        self.rows.iter().map(move |row| {
            let value = idx
                .and_then(|i| row.get(i))
                .map(String::as_str)
                .unwrap_or("");
            (row.as_slice(), value)
        })
    }

    fn field<'a>(&self, row: &'a [String], column: &str) -> &'a str {
        self.column(column)
            .and_then(|i| row.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Rows whose `column` contains `needle`, case-insensitively.
    fn matching<'a>(&'a self, column: &str, needle: &str) -> Vec<&'a [String]> {
        let needle = needle.to_lowercase();
        self.values(column)
            .filter(|(_, value)| value.to_lowercase().contains(&needle))
            .map(|(row, _)| row)
            .collect()
    }

    fn band_names<'a>(&self, rows: &[&'a [String]]) -> BTreeSet<&'a str> {
        rows.iter().map(|&row| self.field(row, "band_name")).collect()
    }

    pub fn total_records(&self) -> String {
        format!("Total records: {}", self.rows.len())
    }

    pub fn list_all_bands(&self) -> String {
        let bands: BTreeSet<&str> = self
            .values("band_name")
            .map(|(_, v)| v)
            .filter(|v| !v.is_empty())
            .collect();
        format!(
            "Bands ({}): {}",
            bands.len(),
            bands.into_iter().collect::<Vec<_>>().join(", ")
        )
    }

    pub fn list_all_genres(&self) -> String {
        format!("Genres:\n{}", self.counts("genre"))
    }

    pub fn list_all_countries(&self) -> String {
        format!("Countries:\n{}", self.counts("country"))
    }

    /// `value: count` lines, most common first, ties in first-seen order.
    fn counts(&self, column: &str) -> String {
        let mut order: Vec<&str> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for (_, value) in self.values(column) {
            if value.is_empty() {
                continue;
            }
            let count = counts.entry(value).or_insert(0);
            if *count == 0 {
                order.push(value);
            }
            *count += 1;
        }

        let mut ranked: Vec<(&str, usize)> = order.into_iter().map(|v| (v, counts[v])).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
            .iter()
            .map(|(value, count)| format!("{value}: {count}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn bands_by_genre(&self, genre: &str) -> String {
        let matches = self.matching("genre", genre);
        if matches.is_empty() {
            return format!("No bands found with genre matching '{genre}'");
        }
        let bands = self.band_names(&matches);
        format!(
            "Bands with genre '{genre}' ({}): {}",
            bands.len(),
            bands.into_iter().collect::<Vec<_>>().join(", ")
        )
    }

    pub fn bands_by_country(&self, country: &str) -> String {
        let matches = self.matching("country", country);
        if matches.is_empty() {
            return format!("No bands found from country matching '{country}'");
        }
        let bands = self.band_names(&matches);
        format!(
            "Bands from '{country}' ({}): {}",
            bands.len(),
            bands.into_iter().collect::<Vec<_>>().join(", ")
        )
    }

    pub fn band_details(&self, band_name: &str) -> String {
        let matches = self.matching("band_name", band_name);
        if matches.is_empty() {
            return format!("No band found matching '{band_name}'");
        }
        matches
            .iter()
            .map(|row| {
                format!(
                    "- {}: {} from {}, playing at {}, {} on {}",
                    self.field(row, "band_name"),
                    self.field(row, "genre"),
                    self.field(row, "country"),
                    self.field(row, "venue"),
                    self.field(row, "location"),
                    self.field(row, "date"),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn count_bands_by_genre(&self, genre: &str) -> String {
        let matches = self.matching("genre", genre);
        let bands = self.band_names(&matches);
        format!("Number of {genre} bands: {}", bands.len())
    }

    pub fn search_records(&self, search_term: &str) -> String {
        let term = search_term.to_lowercase();
        let matches: Vec<&Vec<String>> = self
            .rows
            .iter()
            .filter(|row| row.iter().any(|v| v.to_lowercase().contains(&term)))
            .collect();
        if matches.is_empty() {
            return format!("No records found containing '{search_term}'");
        }

        let mut lines = vec![format!(
            "Found {} record(s) containing '{search_term}':",
            matches.len()
        )];
        for row in matches.iter().take(SEARCH_LIMIT) {
            lines.push(format!(
                "- {}: {} ({})",
                self.field(row, "band_name"),
                self.field(row, "genre"),
                self.field(row, "country"),
            ));
        }
        if matches.len() > SEARCH_LIMIT {
            lines.push(format!("... and {} more", matches.len() - SEARCH_LIMIT));
        }
        lines.join("\n")
    }

    /// The whole table as prompt text: a summary line, the columns, a rule,
    /// then one `{'column': 'value', ...}` line per row.
    pub fn render(&self) -> String {
        if self.rows.is_empty() {
            return "The CSV file is empty.".into();
        }
        let mut lines = vec![
            format!("CSV Data ({} records):", self.rows.len()),
            format!("Columns: {}", self.headers.join(", ")),
            "-".repeat(50),
        ];
        for row in &self.rows {
            let pairs: Vec<String> = self
                .headers
                .iter()
                .enumerate()
                .map(|(i, h)| {
                    let value = row.get(i).map(String::as_str).unwrap_or("");
                    format!("{}: {}", quote(h), quote(value))
                })
                .collect();
            lines.push(format!("{{{}}}", pairs.join(", ")));
        }
        lines.join("\n")
    }
}

/// Quote like a Python string repr: single quotes unless the value holds a
/// single quote and no double quote.
fn quote(value: &str) -> String {
    let delim = if value.contains('\'') && !value.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(value.len() + 2);
    out.push(delim);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delim);
    out
}

/// Load `path` and render it for a system prompt.
pub fn render_for_prompt(path: &Path) -> Result<String, Error> {
    if !path.exists() {
        return Ok("CSV file does not exist.".into());
    }
    Ok(ConcertTable::load(path)?.render())
}
