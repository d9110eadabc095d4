use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;

use crate::error::Error;
use crate::llm::types::ToolDefinition;
use crate::tool::{Tool, ToolOutput};

use super::ConcertTable;

/// One read-only question the CSV can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    TotalRecords,
    ListAllBands,
    ListAllGenres,
    ListAllCountries,
    BandsByGenre,
    BandsByCountry,
    BandDetails,
    CountBandsByGenre,
    SearchRecords,
}

impl QueryKind {
    pub const ALL: [QueryKind; 9] = [
        QueryKind::TotalRecords,
        QueryKind::ListAllBands,
        QueryKind::ListAllGenres,
        QueryKind::ListAllCountries,
        QueryKind::BandsByGenre,
        QueryKind::BandsByCountry,
        QueryKind::BandDetails,
        QueryKind::CountBandsByGenre,
        QueryKind::SearchRecords,
    ];

    pub fn name(self) -> &'static str {
        match self {
            QueryKind::TotalRecords => "get_total_records",
            QueryKind::ListAllBands => "list_all_bands",
            QueryKind::ListAllGenres => "list_all_genres",
            QueryKind::ListAllCountries => "list_all_countries",
            QueryKind::BandsByGenre => "get_bands_by_genre",
            QueryKind::BandsByCountry => "get_bands_by_country",
            QueryKind::BandDetails => "get_band_details",
            QueryKind::CountBandsByGenre => "count_bands_by_genre",
            QueryKind::SearchRecords => "search_records",
        }
    }

    fn description(self) -> &'static str {
        match self {
            QueryKind::TotalRecords => "Get the total number of records in the CSV database",
            QueryKind::ListAllBands => "List all unique band names in the database",
            QueryKind::ListAllGenres => "List all unique genres in the database with counts",
            QueryKind::ListAllCountries => {
                "List all unique countries of origin in the database with counts"
            }
            QueryKind::BandsByGenre => {
                "Get all bands of a specific genre (case-insensitive partial match)"
            }
            QueryKind::BandsByCountry => {
                "Get all bands from a specific country (case-insensitive partial match)"
            }
            QueryKind::BandDetails => {
                "Get all details for a specific band (case-insensitive partial match)"
            }
            QueryKind::CountBandsByGenre => "Count how many bands match a specific genre",
            QueryKind::SearchRecords => {
                "Search all fields for a term (case-insensitive). Returns matching records."
            }
        }
    }

    /// The single string argument, if the query takes one.
    fn argument(self) -> Option<(&'static str, &'static str)> {
        match self {
            QueryKind::BandsByGenre | QueryKind::CountBandsByGenre => {
                Some(("genre", "Genre to match, e.g. \"metal\""))
            }
            QueryKind::BandsByCountry => Some(("country", "Country to match, e.g. \"Finland\"")),
            QueryKind::BandDetails => Some(("band_name", "Band name to look up")),
            QueryKind::SearchRecords => Some(("search_term", "Text to look for in any column")),
            _ => None,
        }
    }

    fn input_schema(self) -> serde_json::Value {
        match self.argument() {
            Some((arg, description)) => json!({
                "type": "object",
                "properties": {
                    arg: {"type": "string", "description": description}
                },
                "required": [arg]
            }),
            None => json!({"type": "object", "properties": {}}),
        }
    }

    /// Answer against an already-loaded table.
    pub fn run(self, table: &ConcertTable, arg: &str) -> String {
        match self {
            QueryKind::TotalRecords => table.total_records(),
            QueryKind::ListAllBands => table.list_all_bands(),
            QueryKind::ListAllGenres => table.list_all_genres(),
            QueryKind::ListAllCountries => table.list_all_countries(),
            QueryKind::BandsByGenre => table.bands_by_genre(arg),
            QueryKind::BandsByCountry => table.bands_by_country(arg),
            QueryKind::BandDetails => table.band_details(arg),
            QueryKind::CountBandsByGenre => table.count_bands_by_genre(arg),
            QueryKind::SearchRecords => table.search_records(arg),
        }
    }
}

/// A query exposed as a tool. The CSV is re-read on every call so rows
/// appended by a running pipeline are visible.
pub struct QueryTool {
    kind: QueryKind,
    csv_path: PathBuf,
}

impl QueryTool {
    pub fn new(kind: QueryKind, csv_path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            csv_path: csv_path.into(),
        }
    }
}

impl Tool for QueryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.kind.name().into(),
            description: self.kind.description().into(),
            input_schema: self.kind.input_schema(),
        }
    }

    fn execute(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, Error>> + Send + '_>> {
        Box::pin(async move {
            let arg = match self.kind.argument() {
                Some((name, _)) => input
                    .get(name)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::Agent(format!("{name} is required")))?
                    .to_string(),
                None => String::new(),
            };

            let path = self.csv_path.clone();
            let table = tokio::task::spawn_blocking(move || ConcertTable::load(&path))
                .await
                .map_err(|e| Error::Agent(format!("CSV load task failed: {e}")))??;

            Ok(ToolOutput::success(self.kind.run(&table, &arg)))
        })
    }
}

/// All nine query tools over the CSV at `csv_path`.
pub fn query_tools(csv_path: impl Into<PathBuf>) -> Vec<Arc<dyn Tool>> {
    let csv_path = csv_path.into();
    QueryKind::ALL
        .iter()
        .map(|&kind| Arc::new(QueryTool::new(kind, csv_path.clone())) as Arc<dyn Tool>)
        .collect()
}
