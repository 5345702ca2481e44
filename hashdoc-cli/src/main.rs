use clap::{Args, Parser, Subcommand, ValueEnum};
use hashdoc::{Database, SearchRequest};
use serde_json::{json, Value};
use std::process;

/// hashdoc CLI: work with the documents of a hashdoc data directory
#[derive(Parser)]
#[command(name = "hashdoc", version, about)]
struct Cli {
    /// Path to the data directory holding schema.yaml (default: current directory)
    #[arg(long, default_value = ".")]
    data_dir: String,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Get a single document by id or key
    Get {
        /// Document type
        document: String,
        /// Document id or full key
        id: String,
    },

    /// Save a document; without an id field a new id is generated
    Save {
        /// Document type
        document: String,
        /// Field values (e.g. --field name="Pere" --field age=44)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a document
    Delete {
        /// Document type
        document: String,
        /// Document id or full key
        id: String,
    },

    /// Run an index query
    Search {
        /// Document type
        document: String,
        /// Query, e.g. "@name:pere*"
        #[arg(default_value = "*")]
        query: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[command(flatten)]
        order: OrderArgs,
    },

    /// Show one page of an index query
    Page {
        /// Document type
        document: String,
        #[arg(default_value = "*")]
        query: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 10)]
        per_page: usize,
        #[command(flatten)]
        order: OrderArgs,
    },

    /// Show the on-table columns of the documents matching a query
    Table {
        /// Document type
        document: String,
        #[arg(default_value = "*")]
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Describe one document type, or all of them
    Info {
        /// Document type
        document: Option<String>,
    },

    /// Build a key from its parts (e.g. `key country es`)
    Key {
        #[arg(required = true)]
        parts: Vec<String>,
    },
}

#[derive(Args)]
struct OrderArgs {
    /// Field to sort by
    #[arg(long, default_value = "id")]
    sort_by: String,
    /// Sort descending
    #[arg(long)]
    desc: bool,
    /// Maximum edit distance when matching terms
    #[arg(long, default_value_t = 0)]
    fuzziness: u8,
}

impl OrderArgs {
    fn request(&self, query: &str) -> SearchRequest {
        SearchRequest::new(query)
            .sort_by(&self.sort_by, !self.desc)
            .fuzziness(self.fuzziness)
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(&cli.data_dir)?;
    log::debug!("Using data directory {}", cli.data_dir);

    match cli.command {
        Command::Get { document, id } => {
            let doc = db.document(&document)?.get(&id)?;
            print_output(&json!(doc), &cli.format)?;
        }

        Command::Save { document, fields } => {
            let data = fields_to_value(&fields);
            let key = db.document(&document)?.save(&data)?;
            print_output(&json!({ "id": key }), &cli.format)?;
        }

        Command::Delete { document, id } => {
            let engine = db.document(&document)?;
            let key = engine.key(&id)?;
            engine.delete(&key)?;
            print_output(&json!({ "ok": true, "deleted": key }), &cli.format)?;
        }

        Command::Search {
            document,
            query,
            offset,
            limit,
            order,
        } => {
            let request = order.request(&query).window(offset, limit);
            let result = db.document(&document)?.search(&request)?;
            print_output(&serde_json::to_value(result)?, &cli.format)?;
        }

        Command::Page {
            document,
            query,
            page,
            per_page,
            order,
        } => {
            let page = db
                .document(&document)?
                .paginate(&order.request(&query), page, per_page)?;
            print_output(
                &json!({
                    "page": page.page,
                    "per_page": page.per_page,
                    "pages": page.pages(),
                    "total": page.total,
                    "items": page.items,
                }),
                &cli.format,
            )?;
        }

        Command::Table {
            document,
            query,
            limit,
        } => {
            let engine = db.document(&document)?;
            let result = engine.search(&SearchRequest::new(&query).window(0, limit))?;
            let rows: Vec<Vec<Value>> = result.docs.iter().map(|d| engine.table_row(d)).collect();
            print_output(
                &json!({
                    "columns": engine.definition().table_fields(),
                    "rows": rows,
                    "total": result.total,
                }),
                &cli.format,
            )?;
        }

        Command::Info { document } => {
            let info = match document {
                Some(name) => serde_json::to_value(db.document(&name)?.info()?)?,
                None => {
                    let all = db
                        .documents()
                        .map(|engine| engine.info())
                        .collect::<hashdoc::Result<Vec<_>>>()?;
                    json!({
                        "delimiter": db.delimiter().to_string(),
                        "foreign_keys": db.dependencies().all(),
                        "documents": all,
                    })
                }
            };
            print_output(&info, &cli.format)?;
        }

        Command::Key { parts } => {
            let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
            print_output(&json!({ "key": db.key(&parts) }), &cli.format)?;
        }
    }

    Ok(())
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}

/// Field values are read as JSON when they parse (numbers, nested
/// documents), as plain strings otherwise.
fn fields_to_value(fields: &[(String, String)]) -> Value {
    let mut map = serde_json::Map::new();
    for (key, val) in fields {
        let json_val = serde_json::from_str(val).unwrap_or_else(|_| Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("name=Pere Soler").unwrap(),
            ("name".to_string(), "Pere Soler".to_string())
        );
        assert_eq!(
            parse_key_value("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("name").is_err());
    }

    #[test]
    fn test_fields_to_value() {
        let value = fields_to_value(&[
            ("name".into(), "Pere".into()),
            ("age".into(), "44".into()),
        ]);
        assert_eq!(value, json!({ "name": "Pere", "age": 44 }));
    }

    #[test]
    fn test_cli_parses_search() {
        let cli = Cli::try_parse_from([
            "hashdoc", "--format", "json", "search", "person", "@name:pere*", "--sort-by", "age",
            "--desc",
        ])
        .unwrap();
        match cli.command {
            Command::Search { query, order, .. } => {
                let request = order.request(&query);
                assert_eq!(request.sort_by, "age");
                assert!(!request.ascending);
            }
            _ => panic!("expected search"),
        }
    }
}
