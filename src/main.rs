use ese_reader::database::Database;
use ese_reader::error::{self, Result};
use env_logger::Env;

// Driver program for exploring an ESE database file from the command
// line; not part of the library's public API.
fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();

    let args = std::env::args().collect::<Vec<_>>();
    match args.len() {
        0 | 1 => return Err(error::Error::Argument("missing <database path> and <command>".into())),
        2 => return Err(error::Error::Argument("missing <command>".into())),
        _ => {}
    }

    let mut database = Database::open(&args[1])?;

    let command = &args[2];
    match command.as_str() {
        ".tables" => {
            let table_names: String = database.table_names().collect::<Vec<_>>().join(", ");
            println!("{table_names}");
        }
        ".table" => {
            let table_name = args.get(3).ok_or_else(|| {
                error::Error::Argument("missing <table name> for .table".into())
            })?;
            let rows = database.rows(table_name)?;
            println!("{} rows for table {table_name}:", rows.len());
            for row in &rows {
                let fields: Vec<String> = row
                    .iter()
                    .map(|(name, value)| format!("{name}={value:?}"))
                    .collect();
                println!("{}", fields.join(", "));
            }
        }
        ".schema" => {
            let table_name = args.get(3).ok_or_else(|| {
                error::Error::Argument("missing <table name> for .schema".into())
            })?;
            let table = database
                .table(table_name)
                .ok_or_else(|| error::Error::Catalog(format!("no such table: {table_name}")))?;
            for column in &table.columns {
                println!("{} {:?}", column.name, column.column_type);
            }
        }
        other => {
            return Err(error::Error::Argument(format!("unknown command: {other}")));
        }
    }

    Ok(())
}
